//! Deterministic spreading of co-located sessions
//!
//! Many sessions geolocate to the exact same coordinate (a city centroid, an office
//! network). Drawn as-is, their markers stack into one. Spreading scatters each group
//! of coincident sessions around the shared point once the map is zoomed in far enough.
//!
//! The offset of a session depends only on a hash of its id, so a session stays at the
//! same scattered position across re-renders and regardless of input order.

use crate::Session;
use geo::Coord;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Maximum scatter radius in degrees of latitude, reached at full intensity (~220 m)
pub const BASE_SPREAD_RADIUS_DEGREES: f64 = 0.002;

/// Number of zoom levels over which the spread grows from nothing to full radius
const SPREAD_ZOOM_RANGE: f64 = 6.0;

/// Coordinates are grouped after rounding to 4 decimals (~11 m)
const COORDINATE_PRECISION: f64 = 1e4;

/// Lower bound for the longitude correction factor, keeps offsets finite at the poles
const MIN_LONGITUDE_SCALE: f64 = 0.01;

/// On-map positions by session id (x = longitude, y = latitude)
pub type SpreadMap = HashMap<String, Coord<f64>>;

/// Compute spread positions for every session that has a location
///
/// Returns an empty map when `zoom < spread_start_zoom`; callers then draw raw
/// coordinates.
pub fn spread_overlapping_points<'a, I>(sessions: I, zoom: f64, spread_start_zoom: f64) -> SpreadMap
where
    I: IntoIterator<Item = &'a Session>,
{
    #[cfg(feature = "profiling")]
    profiling::scope!("spread::spread_overlapping_points");

    if zoom < spread_start_zoom {
        return SpreadMap::new();
    }

    let intensity = ((zoom - spread_start_zoom) / SPREAD_ZOOM_RANGE).clamp(0.0, 1.0);
    let radius = BASE_SPREAD_RADIUS_DEGREES * intensity;

    let mut groups: HashMap<(i64, i64), SmallVec<[&Session; 4]>> = HashMap::new();
    for session in sessions {
        if let Some(location) = session.location() {
            groups
                .entry(grid_key(location))
                .or_default()
                .push(session);
        }
    }

    let mut spread = SpreadMap::with_capacity(groups.values().map(|g| g.len()).sum());
    for (key, members) in groups {
        let center = Coord {
            x: key.0 as f64 / COORDINATE_PRECISION,
            y: key.1 as f64 / COORDINATE_PRECISION,
        };

        if members.len() == 1 {
            spread.insert(members[0].id().to_string(), center);
            continue;
        }

        let lon_scale = center.y.to_radians().cos().max(MIN_LONGITUDE_SCALE);
        for session in members {
            let offset = scatter_offset(session.id(), radius);
            spread.insert(
                session.id().to_string(),
                Coord {
                    x: center.x + offset.x / lon_scale,
                    y: center.y + offset.y,
                },
            );
        }
    }

    tracing::debug!(
        "Spread {} sessions at zoom {:.2} (radius {:.5}°)",
        spread.len(),
        zoom,
        radius
    );
    spread
}

/// Rounded coordinate identifying a "same location" group
#[inline]
fn grid_key(location: Coord<f64>) -> (i64, i64) {
    (
        (location.x * COORDINATE_PRECISION).round() as i64,
        (location.y * COORDINATE_PRECISION).round() as i64,
    )
}

/// Polar offset (in degrees of latitude) derived from the session id
fn scatter_offset(session_id: &str, radius: f64) -> Coord<f64> {
    let seed = hash_str(session_id);
    let angle = seeded_unit(seed) * std::f64::consts::TAU;
    // sqrt keeps the scatter uniform over the disc instead of bunching at the centre
    let distance = radius * seeded_unit(seed.wrapping_add(1)).sqrt();
    Coord {
        x: distance * angle.cos(),
        y: distance * angle.sin(),
    }
}

/// 31-multiplier string hash over UTF-16 code units, folded to a non-negative value
pub fn hash_str(text: &str) -> u32 {
    let mut hash: i32 = 0;
    for unit in text.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    hash.unsigned_abs()
}

/// Sine-based generator mapping a seed to `[0, 1)`
pub fn seeded_unit(seed: u32) -> f64 {
    let x = f64::from(seed).sin() * 10_000.0;
    let fraction = x - x.floor();
    // Rounding can push tiny negative inputs up to exactly 1.0
    if fraction >= 1.0 { 0.0 } else { fraction }
}

/// Pseudo-random value in `[0, 1)` that is a pure function of `seed`
#[inline]
pub fn seeded_random(seed: &str) -> f64 {
    seeded_unit(hash_str(seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{at, session};

    fn located(id: &str, lat: f64, lon: f64) -> Session {
        session(id, at(10, 0), at(10, 5)).with_location(lat, lon)
    }

    fn madrid_crowd(count: usize) -> Vec<Session> {
        (0..count)
            .map(|i| located(&format!("session-{i}"), 40.4168, -3.7038))
            .collect()
    }

    #[test]
    fn test_no_spread_below_start_zoom() {
        let sessions = madrid_crowd(5);
        assert!(spread_overlapping_points(&sessions, 9.99, 10.0).is_empty());
        assert!(spread_overlapping_points(&sessions, 0.0, 10.0).is_empty());
    }

    #[test]
    fn test_singleton_passes_through_rounded() {
        let sessions = vec![located("solo", 48.856613, 2.352222)];
        let spread = spread_overlapping_points(&sessions, 14.0, 10.0);
        let coord = spread["solo"];
        assert!((coord.y - 48.8566).abs() < 1e-9);
        assert!((coord.x - 2.3522).abs() < 1e-9);
    }

    #[test]
    fn test_group_members_are_scattered() {
        let sessions = madrid_crowd(20);
        let spread = spread_overlapping_points(&sessions, 16.0, 10.0);
        assert_eq!(spread.len(), 20);

        let mut keys: Vec<(i64, i64)> = spread
            .values()
            .map(|c| ((c.x * 1e9) as i64, (c.y * 1e9) as i64))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 20, "every member should get its own position");
    }

    #[test]
    fn test_scatter_stays_within_radius() {
        let sessions: Vec<Session> = (0..50)
            .map(|i| located(&format!("north-{i}"), 60.0, 10.0))
            .collect();
        let spread = spread_overlapping_points(&sessions, 20.0, 10.0);

        let lon_scale = 60.0_f64.to_radians().cos();
        for coord in spread.values() {
            let dy = coord.y - 60.0;
            let dx = (coord.x - 10.0) * lon_scale;
            assert!((dx * dx + dy * dy).sqrt() <= BASE_SPREAD_RADIUS_DEGREES + 1e-12);
        }
    }

    #[test]
    fn test_determinism_under_reordering() {
        let mut sessions = madrid_crowd(30);
        sessions.push(located("elsewhere", 52.52, 13.405));

        let first = spread_overlapping_points(&sessions, 13.0, 10.0);
        let again = spread_overlapping_points(&sessions, 13.0, 10.0);
        sessions.reverse();
        let reversed = spread_overlapping_points(&sessions, 13.0, 10.0);

        assert_eq!(first, again);
        assert_eq!(first, reversed);
    }

    #[test]
    fn test_intensity_saturates() {
        let sessions = madrid_crowd(10);
        let at_full = spread_overlapping_points(&sessions, 16.0, 10.0);
        let beyond = spread_overlapping_points(&sessions, 22.0, 10.0);
        assert_eq!(at_full, beyond);
    }

    #[test]
    fn test_zero_intensity_at_start_zoom() {
        let sessions = madrid_crowd(3);
        let spread = spread_overlapping_points(&sessions, 10.0, 10.0);
        for coord in spread.values() {
            assert!((coord.y - 40.4168).abs() < 1e-12);
            assert!((coord.x + 3.7038).abs() < 1e-12);
        }
    }

    #[test]
    fn test_sessions_without_location_are_absent() {
        let sessions = vec![
            session("nowhere", at(10, 0), at(10, 0)),
            located("somewhere", 1.0, 1.0),
        ];
        let spread = spread_overlapping_points(&sessions, 12.0, 10.0);
        assert_eq!(spread.len(), 1);
        assert!(spread.contains_key("somewhere"));
    }

    #[test]
    fn test_seeded_random_range_and_stability() {
        for i in 0..1000 {
            let id = format!("id-{i}");
            let value = seeded_random(&id);
            assert!((0.0..1.0).contains(&value));
            assert_eq!(value, seeded_random(&id));
        }
    }

    #[test]
    fn test_hash_str_known_values() {
        assert_eq!(hash_str(""), 0);
        assert_eq!(hash_str("a"), 97);
        assert_eq!(hash_str("ab"), 97 * 31 + 98);
    }
}
