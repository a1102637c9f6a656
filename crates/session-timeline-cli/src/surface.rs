//! Headless map surface
//!
//! Stands in for an interactive map: it records placed markers and bound listeners so
//! the report can show what a real map would display.

use geo::Coord;
use session_timeline_lib::{
    CameraTarget, ListenerId, MapSurface, MarkerEvent, MarkerKey, MarkerStyle, Result,
    TimelineError,
};
use std::collections::{BTreeMap, HashMap};

const DEFAULT_VIEWPORT: (f64, f64) = (1280.0, 800.0);
const DEFAULT_MAX_ZOOM: f64 = 19.0;

/// A marker as the headless surface holds it
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedMarker {
    pub key: MarkerKey,
    pub position: Coord<f64>,
    pub label: Option<String>,
}

#[derive(Debug)]
pub struct HeadlessSurface {
    zoom: f64,
    next_id: u64,
    markers: BTreeMap<u64, PlacedMarker>,
    listeners: HashMap<u64, (u64, MarkerEvent)>,
    camera: Option<CameraTarget>,
}

impl HeadlessSurface {
    pub fn new(zoom: f64) -> Self {
        Self {
            zoom,
            next_id: 0,
            markers: BTreeMap::new(),
            listeners: HashMap::new(),
            camera: None,
        }
    }

    pub fn markers(&self) -> impl Iterator<Item = &PlacedMarker> {
        self.markers.values()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Last camera move requested by a cluster click
    pub fn camera(&self) -> Option<CameraTarget> {
        self.camera
    }

    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MapSurface for HeadlessSurface {
    type Marker = u64;

    fn zoom(&self) -> f64 {
        self.zoom
    }

    fn max_zoom(&self) -> f64 {
        DEFAULT_MAX_ZOOM
    }

    fn viewport_px(&self) -> (f64, f64) {
        DEFAULT_VIEWPORT
    }

    fn fly_to(&mut self, target: CameraTarget) {
        tracing::debug!(
            "Camera to ({:.5}, {:.5}) at zoom {:.2}",
            target.center.y,
            target.center.x,
            target.zoom
        );
        self.camera = Some(target);
    }

    fn place_marker(
        &mut self,
        key: &MarkerKey,
        position: Coord<f64>,
        style: &MarkerStyle,
    ) -> Result<u64> {
        if !position.x.is_finite() || !position.y.is_finite() {
            return Err(TimelineError::Surface(format!(
                "non-finite position for {key:?}"
            )));
        }
        let id = self.fresh_id();
        self.markers.insert(
            id,
            PlacedMarker {
                key: key.clone(),
                position,
                label: style.label.clone(),
            },
        );
        Ok(id)
    }

    fn reposition_marker(&mut self, marker: &mut u64, position: Coord<f64>) -> Result<()> {
        match self.markers.get_mut(marker) {
            Some(placed) => {
                placed.position = position;
                Ok(())
            }
            None => Err(TimelineError::Surface(format!("unknown marker {marker}"))),
        }
    }

    fn remove_marker(&mut self, marker: u64) {
        self.markers.remove(&marker);
    }

    fn listen(&mut self, marker: &u64, event: MarkerEvent) -> Result<ListenerId> {
        if !self.markers.contains_key(marker) {
            return Err(TimelineError::Surface(format!("unknown marker {marker}")));
        }
        let id = self.fresh_id();
        self.listeners.insert(id, (*marker, event));
        Ok(ListenerId(id))
    }

    fn unlisten(&mut self, listener: ListenerId) {
        self.listeners.remove(&listener.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_timeline_lib::{MarkerLayer, RenderItem, RenderPlan};

    fn plan(ids: &[&str]) -> RenderPlan {
        RenderPlan {
            zoom: 12.0,
            clustering_enabled: false,
            items: ids
                .iter()
                .enumerate()
                .map(|(i, id)| RenderItem::Marker {
                    session_id: id.to_string(),
                    position: Coord {
                        x: i as f64,
                        y: i as f64,
                    },
                })
                .collect(),
        }
    }

    #[test]
    fn test_layer_lifecycle_on_headless_surface() {
        let mut surface = HeadlessSurface::new(12.0);
        let mut layer = MarkerLayer::new(&[MarkerEvent::Click, MarkerEvent::Hover]);

        layer.sync(&mut surface, &plan(&["a", "b", "c"]));
        assert_eq!(surface.marker_count(), 3);
        assert_eq!(surface.listener_count(), 6);

        layer.sync(&mut surface, &plan(&["a"]));
        assert_eq!(surface.marker_count(), 1);
        assert_eq!(surface.listener_count(), 2);

        layer.clear(&mut surface);
        assert_eq!(surface.marker_count(), 0);
        assert_eq!(surface.listener_count(), 0);
    }

    #[test]
    fn test_rejects_non_finite_position() {
        let mut surface = HeadlessSurface::new(3.0);
        let key = MarkerKey::Session("x".into());
        let bad = Coord {
            x: f64::NAN,
            y: 0.0,
        };
        assert!(surface.place_marker(&key, bad, &MarkerStyle::session()).is_err());
        assert_eq!(surface.marker_count(), 0);
    }
}
