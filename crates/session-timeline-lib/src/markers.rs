//! Marker reconciliation against a map surface
//!
//! The map widget itself is an external component. [`MapSurface`] is the narrow seam the
//! engine needs from it, and [`MarkerLayer`] keeps the widget's markers in step with a
//! [`RenderPlan`] by diffing: markers whose key survives keep their identity (and their
//! listeners), vanished keys are detached, new keys are placed.
//!
//! Marker lifecycle:
//!
//! ```text
//! absent -> placed (listeners bound) -> [repositioned]* -> detached (listeners unbound, removed)
//! ```

use crate::cluster::{CameraTarget, ClusterFeature, RenderItem, RenderPlan};
use crate::Result;
use geo::Coord;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Positions closer than this (in degrees) count as unchanged
const POSITION_EPSILON: f64 = 1e-9;

/// Identifier of an event listener bound on the surface
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Events the layer subscribes to on every marker it places
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MarkerEvent {
    Click,
    Hover,
}

/// Stable identity of a drawn marker
///
/// A cluster is identified by its first member and size, so it keeps its marker while
/// its membership is unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarkerKey {
    Session(String),
    Cluster { lead: String, count: usize },
}

/// How a marker should be drawn
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerStyle {
    pub radius_px: f32,
    /// Fill colour (RGB)
    pub color: [u8; 3],
    pub label: Option<String>,
}

impl MarkerStyle {
    /// Plain session dot
    pub fn session() -> Self {
        Self {
            radius_px: 6.0,
            color: [70, 130, 220],
            label: None,
        }
    }

    /// Cluster badge showing the member count
    pub fn cluster(cluster: &ClusterFeature) -> Self {
        let tier = cluster.tier();
        Self {
            radius_px: tier.radius_px(),
            color: tier.color(),
            label: Some(cluster.point_count.to_string()),
        }
    }
}

/// Operations the engine needs from an interactive map widget
pub trait MapSurface {
    /// Surface-side marker object
    type Marker;

    fn zoom(&self) -> f64;

    fn max_zoom(&self) -> f64;

    /// Viewport size in pixels (width, height)
    fn viewport_px(&self) -> (f64, f64);

    /// Start an eased camera move
    fn fly_to(&mut self, target: CameraTarget);

    fn place_marker(
        &mut self,
        key: &MarkerKey,
        position: Coord<f64>,
        style: &MarkerStyle,
    ) -> Result<Self::Marker>;

    fn reposition_marker(&mut self, marker: &mut Self::Marker, position: Coord<f64>) -> Result<()>;

    fn remove_marker(&mut self, marker: Self::Marker);

    fn listen(&mut self, marker: &Self::Marker, event: MarkerEvent) -> Result<ListenerId>;

    fn unlisten(&mut self, listener: ListenerId);
}

/// A placed marker together with the listeners bound to it
#[derive(Debug)]
pub struct MarkerHandle<M> {
    key: MarkerKey,
    marker: M,
    listeners: SmallVec<[ListenerId; 2]>,
    position: Coord<f64>,
    style: MarkerStyle,
}

impl<M> MarkerHandle<M> {
    #[inline]
    pub fn key(&self) -> &MarkerKey {
        &self.key
    }

    #[inline]
    pub fn marker(&self) -> &M {
        &self.marker
    }

    #[inline]
    pub fn position(&self) -> Coord<f64> {
        self.position
    }

    #[inline]
    pub fn style(&self) -> &MarkerStyle {
        &self.style
    }

    #[inline]
    pub fn listeners(&self) -> &[ListenerId] {
        &self.listeners
    }

    /// Unbind every listener, then remove the marker from the surface
    pub fn detach<S>(self, surface: &mut S)
    where
        S: MapSurface<Marker = M>,
    {
        for listener in self.listeners {
            surface.unlisten(listener);
        }
        surface.remove_marker(self.marker);
    }
}

/// Outcome of one [`MarkerLayer::sync`] pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
    pub moved: usize,
    pub unchanged: usize,
    /// Items skipped because the surface rejected them
    pub failed: usize,
}

/// The set of markers currently on a surface, keyed by [`MarkerKey`]
#[derive(Debug)]
pub struct MarkerLayer<M> {
    handles: HashMap<MarkerKey, MarkerHandle<M>>,
    events: SmallVec<[MarkerEvent; 2]>,
}

impl<M> Default for MarkerLayer<M> {
    fn default() -> Self {
        Self::new(&[MarkerEvent::Click])
    }
}

impl<M> MarkerLayer<M> {
    /// Create an empty layer that binds `events` on every marker it places
    pub fn new(events: &[MarkerEvent]) -> Self {
        Self {
            handles: HashMap::new(),
            events: events.iter().copied().collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn get(&self, key: &MarkerKey) -> Option<&MarkerHandle<M>> {
        self.handles.get(key)
    }

    pub fn handles(&self) -> impl Iterator<Item = &MarkerHandle<M>> {
        self.handles.values()
    }

    /// Bring the surface in line with `plan`
    ///
    /// A surface error affects only the item it occurred on: it is logged, counted in
    /// [`SyncReport::failed`] and the pass continues.
    pub fn sync<S>(&mut self, surface: &mut S, plan: &RenderPlan) -> SyncReport
    where
        S: MapSurface<Marker = M>,
    {
        #[cfg(feature = "profiling")]
        profiling::scope!("markers::sync");

        let desired: Vec<(MarkerKey, Coord<f64>, MarkerStyle)> =
            plan.items.iter().map(desired_marker).collect();
        let wanted: HashSet<&MarkerKey> = desired.iter().map(|(key, _, _)| key).collect();

        let mut report = SyncReport::default();

        let stale: Vec<MarkerKey> = self
            .handles
            .keys()
            .filter(|key| !wanted.contains(key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(handle) = self.handles.remove(&key) {
                handle.detach(surface);
                report.removed += 1;
            }
        }

        for (key, position, style) in desired {
            if let Some(handle) = self.handles.get_mut(&key) {
                if same_position(handle.position, position) {
                    report.unchanged += 1;
                    continue;
                }
                match surface.reposition_marker(&mut handle.marker, position) {
                    Ok(()) => {
                        handle.position = position;
                        report.moved += 1;
                    }
                    Err(err) => {
                        tracing::warn!("Failed to move marker {:?}: {}", key, err);
                        report.failed += 1;
                    }
                }
                continue;
            }

            match self.place(surface, key, position, style) {
                Ok(handle) => {
                    self.handles.insert(handle.key.clone(), handle);
                    report.added += 1;
                }
                Err(err) => {
                    tracing::warn!("Skipping marker: {}", err);
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            "Marker sync: +{} -{} ~{} ={} !{}",
            report.added,
            report.removed,
            report.moved,
            report.unchanged,
            report.failed
        );
        report
    }

    /// Detach every marker
    pub fn clear<S>(&mut self, surface: &mut S)
    where
        S: MapSurface<Marker = M>,
    {
        for (_, handle) in self.handles.drain() {
            handle.detach(surface);
        }
    }

    /// Move the camera so that `cluster` fills the surface's viewport
    pub fn zoom_to_cluster<S>(&self, surface: &mut S, cluster: &ClusterFeature) -> CameraTarget
    where
        S: MapSurface<Marker = M>,
    {
        let target = cluster.zoom_to_fit(surface.viewport_px(), surface.max_zoom());
        surface.fly_to(target);
        target
    }

    /// Place a marker and bind listeners; a partial placement is rolled back
    fn place<S>(
        &self,
        surface: &mut S,
        key: MarkerKey,
        position: Coord<f64>,
        style: MarkerStyle,
    ) -> Result<MarkerHandle<M>>
    where
        S: MapSurface<Marker = M>,
    {
        let marker = surface.place_marker(&key, position, &style)?;
        let mut handle = MarkerHandle {
            key,
            marker,
            listeners: SmallVec::new(),
            position,
            style,
        };

        for event in &self.events {
            match surface.listen(&handle.marker, *event) {
                Ok(listener) => handle.listeners.push(listener),
                Err(err) => {
                    handle.detach(surface);
                    return Err(err);
                }
            }
        }
        Ok(handle)
    }
}

impl<M> Drop for MarkerLayer<M> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            tracing::warn!(
                "Marker layer dropped with {} markers still on the surface",
                self.handles.len()
            );
        }
    }
}

fn desired_marker(item: &RenderItem) -> (MarkerKey, Coord<f64>, MarkerStyle) {
    match item {
        RenderItem::Marker {
            session_id,
            position,
        } => (
            MarkerKey::Session(session_id.clone()),
            *position,
            MarkerStyle::session(),
        ),
        RenderItem::Cluster(cluster) => (
            MarkerKey::Cluster {
                lead: cluster.member_session_ids.first().cloned().unwrap_or_default(),
                count: cluster.point_count,
            },
            cluster.centroid,
            MarkerStyle::cluster(cluster),
        ),
    }
}

#[inline]
fn same_position(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).abs() < POSITION_EPSILON && (a.y - b.y).abs() < POSITION_EPSILON
}
