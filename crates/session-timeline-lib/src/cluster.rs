//! Clustering decision and aggregation
//!
//! When many sessions are active and the map is zoomed out, individual markers are
//! replaced by cluster badges. Points are grouped in world-pixel space at the current
//! zoom, so the grouping radius is a constant on screen. Clusters that are too small to
//! be worth a badge are expanded back into their individual markers.

use crate::utils;
use geo::{Coord, Rect};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Duration of the eased camera move after clicking a cluster
pub const CLUSTER_ZOOM_TRANSITION: Duration = Duration::from_millis(500);

/// Extra room around a cluster's extent when zooming to it
const FIT_PADDING: f64 = 1.2;

/// Settings for the clustering decision and cluster formation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterConfig {
    /// Clustering starts once more than this many sessions are active
    pub threshold: usize,
    /// Clustering is only used strictly below this zoom level
    pub max_cluster_zoom: f64,
    /// Clusters with fewer members are drawn as individual markers
    pub min_cluster_size: usize,
    /// Grouping radius in screen pixels
    pub radius_px: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threshold: 500,
            max_cluster_zoom: 11.0,
            min_cluster_size: 10,
            radius_px: 60.0,
        }
    }
}

/// Visual size class of a cluster badge
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ClusterTier {
    Small,
    Medium,
    Large,
    Largest,
}

impl ClusterTier {
    pub fn for_count(point_count: usize) -> Self {
        match point_count {
            0..10 => Self::Small,
            10..30 => Self::Medium,
            30..100 => Self::Large,
            _ => Self::Largest,
        }
    }

    /// Badge radius in pixels
    pub fn radius_px(self) -> f32 {
        match self {
            Self::Small => 15.0,
            Self::Medium => 20.0,
            Self::Large => 25.0,
            Self::Largest => 32.0,
        }
    }

    /// Badge fill colour (RGB)
    pub fn color(self) -> [u8; 3] {
        match self {
            Self::Small => [81, 187, 214],
            Self::Medium => [241, 240, 117],
            Self::Large => [242, 140, 177],
            Self::Largest => [255, 99, 71],
        }
    }
}

/// An aggregate marker standing in for nearby sessions
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterFeature {
    /// Mean position of the members (x = longitude, y = latitude)
    pub centroid: Coord<f64>,
    pub point_count: usize,
    /// Member ids, sorted
    pub member_session_ids: Vec<String>,
    /// Bounding box of the members in lon/lat
    pub extent: Rect<f64>,
}

/// Where the camera should go after a cluster click
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraTarget {
    pub center: Coord<f64>,
    pub zoom: f64,
    pub transition: Duration,
}

impl ClusterFeature {
    #[inline]
    pub fn tier(&self) -> ClusterTier {
        ClusterTier::for_count(self.point_count)
    }

    /// Camera target that fits this cluster's extent into `viewport_px`
    ///
    /// The zoom is clamped to `max_zoom`; a cluster whose members share one position
    /// zooms straight to `max_zoom`.
    pub fn zoom_to_fit(&self, viewport_px: (f64, f64), max_zoom: f64) -> CameraTarget {
        let min = utils::wgs84_to_mercator(self.extent.min().y, self.extent.min().x);
        let max = utils::wgs84_to_mercator(self.extent.max().y, self.extent.max().x);

        let zoom = utils::fit_zoom(
            (max.x() - min.x()) * FIT_PADDING,
            (max.y() - min.y()) * FIT_PADDING,
            viewport_px,
        )
        .min(max_zoom);

        let (lat, lon) = utils::mercator_to_wgs84((min.x() + max.x()) / 2.0, (min.y() + max.y()) / 2.0);

        CameraTarget {
            center: Coord { x: lon, y: lat },
            zoom,
            transition: CLUSTER_ZOOM_TRANSITION,
        }
    }
}

/// One thing to draw
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RenderItem {
    Marker {
        session_id: String,
        position: Coord<f64>,
    },
    Cluster(ClusterFeature),
}

/// Everything that should be visible at a zoom level
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RenderPlan {
    pub zoom: f64,
    pub clustering_enabled: bool,
    pub items: Vec<RenderItem>,
}

impl RenderPlan {
    pub fn marker_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, RenderItem::Marker { .. }))
            .count()
    }

    pub fn cluster_count(&self) -> usize {
        self.items.len() - self.marker_count()
    }

    pub fn clusters(&self) -> impl Iterator<Item = &ClusterFeature> {
        self.items.iter().filter_map(|item| match item {
            RenderItem::Cluster(cluster) => Some(cluster),
            RenderItem::Marker { .. } => None,
        })
    }
}

/// Whether `active_count` sessions at `zoom` should be clustered
///
/// Both conditions must hold: at high zoom markers are always individual.
#[inline]
pub fn should_cluster(active_count: usize, zoom: f64, config: &ClusterConfig) -> bool {
    active_count > config.threshold && zoom < config.max_cluster_zoom
}

/// Group points lying within `radius_px` screen pixels of a cluster seed
///
/// Points are processed in session-id order so that the same input always produces the
/// same clusters. Every point ends up in exactly one cluster (possibly of size 1).
pub fn cluster_points(points: &[(&str, Coord<f64>)], zoom: f64, radius_px: f64) -> Vec<ClusterFeature> {
    group_points(points, zoom, radius_px)
        .into_iter()
        .map(|members| build_feature(points, &members))
        .collect()
}

/// Decide between markers and clusters and produce the full render plan
///
/// `active_count` is the number of active sessions, located or not; only `points`
/// are placed on the map.
pub fn plan_render(
    points: &[(&str, Coord<f64>)],
    active_count: usize,
    zoom: f64,
    config: &ClusterConfig,
) -> RenderPlan {
    #[cfg(feature = "profiling")]
    profiling::scope!("cluster::plan_render");

    let marker = |index: usize| RenderItem::Marker {
        session_id: points[index].0.to_string(),
        position: points[index].1,
    };

    if !should_cluster(active_count, zoom, config) {
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|&a, &b| points[a].0.cmp(points[b].0));
        return RenderPlan {
            zoom,
            clustering_enabled: false,
            items: order.into_iter().map(&marker).collect(),
        };
    }

    let mut items = Vec::new();
    for members in group_points(points, zoom, config.radius_px) {
        if members.len() < config.min_cluster_size {
            items.extend(members.into_iter().map(&marker));
        } else {
            items.push(RenderItem::Cluster(build_feature(points, &members)));
        }
    }

    tracing::debug!(
        "Planned {} items for {} points at zoom {:.2} (clustered)",
        items.len(),
        points.len(),
        zoom
    );

    RenderPlan {
        zoom,
        clustering_enabled: true,
        items,
    }
}

/// Greedy radius grouping over a uniform grid of `radius_px` cells
fn group_points(points: &[(&str, Coord<f64>)], zoom: f64, radius_px: f64) -> Vec<Vec<usize>> {
    let radius = radius_px.max(f64::EPSILON);
    let pixels: Vec<(f64, f64)> = points
        .iter()
        .map(|(_, coord)| {
            let p = utils::coord_to_world_pixels(*coord, zoom);
            (p.x(), p.y())
        })
        .collect();

    let cell_of = |(x, y): (f64, f64)| ((x / radius).floor() as i64, (y / radius).floor() as i64);

    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (index, pixel) in pixels.iter().enumerate() {
        grid.entry(cell_of(*pixel)).or_default().push(index);
    }

    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&a, &b| points[a].0.cmp(points[b].0));

    let mut assigned = vec![false; points.len()];
    let mut groups = Vec::new();
    for seed in order {
        if assigned[seed] {
            continue;
        }
        let (sx, sy) = pixels[seed];
        let (cx, cy) = cell_of(pixels[seed]);

        let mut members = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(cell) = grid.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &candidate in cell {
                    if assigned[candidate] {
                        continue;
                    }
                    let (px, py) = pixels[candidate];
                    if (px - sx).hypot(py - sy) <= radius {
                        assigned[candidate] = true;
                        members.push(candidate);
                    }
                }
            }
        }
        members.sort_by(|&a, &b| points[a].0.cmp(points[b].0));
        groups.push(members);
    }

    groups
}

fn build_feature(points: &[(&str, Coord<f64>)], members: &[usize]) -> ClusterFeature {
    let count = members.len().max(1) as f64;
    let (mut sum_x, mut sum_y) = (0.0, 0.0);
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);

    for &index in members {
        let coord = points[index].1;
        sum_x += coord.x;
        sum_y += coord.y;
        min_x = min_x.min(coord.x);
        min_y = min_y.min(coord.y);
        max_x = max_x.max(coord.x);
        max_y = max_y.max(coord.y);
    }

    ClusterFeature {
        centroid: Coord {
            x: sum_x / count,
            y: sum_y / count,
        },
        point_count: members.len(),
        member_session_ids: members.iter().map(|&i| points[i].0.to_string()).collect(),
        extent: Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crowd(prefix: &str, count: usize, lat: f64, lon: f64) -> Vec<(String, Coord<f64>)> {
        (0..count)
            .map(|i| {
                // Jitter within a few meters
                let jitter = (i % 7) as f64 * 1e-5;
                (format!("{prefix}-{i:04}"), Coord { x: lon + jitter, y: lat - jitter })
            })
            .collect()
    }

    fn borrowed(points: &[(String, Coord<f64>)]) -> Vec<(&str, Coord<f64>)> {
        points.iter().map(|(id, c)| (id.as_str(), *c)).collect()
    }

    #[test]
    fn test_should_cluster_requires_both_conditions() {
        let config = ClusterConfig::default();
        assert!(!should_cluster(500, 5.0, &config));
        assert!(should_cluster(501, 5.0, &config));
        assert!(should_cluster(501, 10.99, &config));
        assert!(!should_cluster(501, 11.0, &config));
        assert!(!should_cluster(10_000, 12.0, &config));
    }

    #[test]
    fn test_clustering_threshold_end_to_end() {
        let config = ClusterConfig::default();
        let owned = crowd("madrid", 501, 40.4168, -3.7038);
        let points = borrowed(&owned);

        let low = plan_render(&points, points.len(), 5.0, &config);
        assert!(low.clustering_enabled);
        assert_eq!(low.cluster_count(), 1);
        assert_eq!(low.marker_count(), 0);
        let cluster = low.clusters().next().unwrap();
        assert_eq!(cluster.point_count, 501);
        assert_eq!(cluster.tier(), ClusterTier::Largest);

        let high = plan_render(&points, points.len(), 12.0, &config);
        assert!(!high.clustering_enabled);
        assert_eq!(high.marker_count(), 501);
        assert_eq!(high.cluster_count(), 0);
    }

    #[test]
    fn test_small_clusters_are_expanded() {
        let config = ClusterConfig::default();
        let mut owned = crowd("madrid", 600, 40.4168, -3.7038);
        owned.extend(crowd("berlin", 5, 52.52, 13.405));
        let points = borrowed(&owned);

        let plan = plan_render(&points, points.len(), 5.0, &config);
        assert!(plan.clustering_enabled);
        assert_eq!(plan.cluster_count(), 1);
        assert_eq!(plan.marker_count(), 5);
        assert!(plan.items.iter().all(|item| match item {
            RenderItem::Marker { session_id, .. } => session_id.starts_with("berlin"),
            RenderItem::Cluster(c) => c.point_count == 600,
        }));
    }

    #[test]
    fn test_min_cluster_size_edge() {
        let config = ClusterConfig::default();
        let mut owned = crowd("madrid", 600, 40.4168, -3.7038);
        owned.extend(crowd("berlin", config.min_cluster_size, 52.52, 13.405));
        owned.extend(crowd("paris", config.min_cluster_size - 1, 48.8566, 2.3522));
        let points = borrowed(&owned);

        let plan = plan_render(&points, points.len(), 5.0, &config);
        let mut sizes: Vec<usize> = plan.clusters().map(|c| c.point_count).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![10, 600]);
        assert_eq!(plan.marker_count(), 9);
        assert!(plan.items.iter().all(|item| match item {
            RenderItem::Marker { session_id, .. } => session_id.starts_with("paris"),
            RenderItem::Cluster(_) => true,
        }));
    }

    #[test]
    fn test_decision_uses_active_count_not_located_points() {
        let config = ClusterConfig::default();
        let owned = crowd("madrid", 400, 40.4168, -3.7038);
        let points = borrowed(&owned);

        assert!(!plan_render(&points, points.len(), 5.0, &config).clustering_enabled);
        assert!(plan_render(&points, 501, 5.0, &config).clustering_enabled);
    }

    #[test]
    fn test_cluster_points_partition_every_point() {
        let mut owned = crowd("a", 40, 10.0, 10.0);
        owned.extend(crowd("b", 15, 10.0, 30.0));
        owned.extend(crowd("c", 1, -20.0, 100.0));
        let points = borrowed(&owned);

        let clusters = cluster_points(&points, 4.0, 60.0);
        assert_eq!(clusters.len(), 3);
        let total: usize = clusters.iter().map(|c| c.point_count).sum();
        assert_eq!(total, points.len());

        let mut all_ids: Vec<&String> = clusters.iter().flat_map(|c| &c.member_session_ids).collect();
        all_ids.sort();
        all_ids.dedup();
        assert_eq!(all_ids.len(), points.len());
    }

    #[test]
    fn test_clusters_are_order_independent() {
        let mut owned = crowd("a", 30, 10.0, 10.0);
        owned.extend(crowd("b", 30, 10.3, 10.3));
        let points = borrowed(&owned);
        let mut reversed = points.clone();
        reversed.reverse();

        assert_eq!(cluster_points(&points, 6.0, 60.0), cluster_points(&reversed, 6.0, 60.0));
    }

    #[test]
    fn test_zoom_separates_clusters() {
        let mut owned = crowd("a", 20, 10.0, 10.0);
        owned.extend(crowd("b", 20, 10.0, 10.5));
        let points = borrowed(&owned);

        assert_eq!(cluster_points(&points, 3.0, 60.0).len(), 1);
        assert_eq!(cluster_points(&points, 10.0, 60.0).len(), 2);
    }

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(ClusterTier::for_count(9), ClusterTier::Small);
        assert_eq!(ClusterTier::for_count(10), ClusterTier::Medium);
        assert_eq!(ClusterTier::for_count(29), ClusterTier::Medium);
        assert_eq!(ClusterTier::for_count(30), ClusterTier::Large);
        assert_eq!(ClusterTier::for_count(99), ClusterTier::Large);
        assert_eq!(ClusterTier::for_count(100), ClusterTier::Largest);
        assert!(ClusterTier::Small.radius_px() < ClusterTier::Largest.radius_px());
    }

    #[test]
    fn test_zoom_to_fit_clamps_to_max_zoom() {
        let owned = vec![
            ("a".to_string(), Coord { x: 2.0, y: 48.0 }),
            ("b".to_string(), Coord { x: 2.0, y: 48.0 }),
        ];
        let cluster = &cluster_points(&borrowed(&owned), 5.0, 60.0)[0];
        let target = cluster.zoom_to_fit((800.0, 600.0), 18.0);
        assert_eq!(target.zoom, 18.0);
        assert_eq!(target.transition, CLUSTER_ZOOM_TRANSITION);
        assert!((target.center.x - 2.0).abs() < 1e-9);
        assert!((target.center.y - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_zoom_to_fit_wider_extent_zooms_less() {
        let narrow_points = vec![
            ("a".to_string(), Coord { x: 2.0, y: 48.0 }),
            ("b".to_string(), Coord { x: 2.01, y: 48.01 }),
        ];
        let wide_points = vec![
            ("a".to_string(), Coord { x: 2.0, y: 48.0 }),
            ("b".to_string(), Coord { x: 2.5, y: 48.5 }),
        ];

        let narrow = &cluster_points(&borrowed(&narrow_points), 2.0, 60.0)[0];
        let wide = &cluster_points(&borrowed(&wide_points), 2.0, 60.0)[0];

        let narrow_zoom = narrow.zoom_to_fit((800.0, 600.0), 22.0).zoom;
        let wide_zoom = wide.zoom_to_fit((800.0, 600.0), 22.0).zoom;
        assert!(wide_zoom < narrow_zoom);

        let target = wide.zoom_to_fit((800.0, 600.0), 22.0);
        assert!(wide.extent.min().x <= target.center.x && target.center.x <= wide.extent.max().x);
        assert!(wide.extent.min().y <= target.center.y && target.center.y <= wide.extent.max().y);
    }
}
