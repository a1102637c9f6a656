//! Utility functions for coordinate conversions and zoom math

use geo::{Coord, Point};

/// Web Mercator bounds in meters (EPSG:3857)
pub const EARTH_MERCATOR_MAX: f64 = 20037508.34;
pub const EARTH_MERCATOR_MIN: f64 = -20037508.34;
pub const EARTH_SIZE_METERS: f64 = EARTH_MERCATOR_MAX - EARTH_MERCATOR_MIN;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Edge length of a map tile in pixels; the world is one tile wide at zoom 0
pub const TILE_SIZE: f64 = 256.0;

/// Precomputed constant: EARTH_MERCATOR_MAX / 180.0
const LON_TO_X_FACTOR: f64 = EARTH_MERCATOR_MAX / 180.0;

/// Precomputed constant: EARTH_MERCATOR_MAX / PI
const Y_FACTOR: f64 = EARTH_MERCATOR_MAX / std::f64::consts::PI;

/// Precomputed constant: 180.0 / EARTH_MERCATOR_MAX
const X_TO_LON_FACTOR: f64 = 180.0 / EARTH_MERCATOR_MAX;

/// Precomputed constant: PI / EARTH_MERCATOR_MAX
const Y_TO_LAT_FACTOR: f64 = std::f64::consts::PI / EARTH_MERCATOR_MAX;

/// Convert WGS84 (lat, lon) to Web Mercator (x, y) in meters
///
/// Latitude is clamped to the Web Mercator range.
#[inline(always)]
pub fn wgs84_to_mercator(lat: f64, lon: f64) -> Point<f64> {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);

    let x = lon * LON_TO_X_FACTOR;
    let lat_rad = lat.to_radians();
    let y = (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() * Y_FACTOR;

    Point::new(x, y)
}

/// Convert Web Mercator (x, y) in meters to WGS84, returned as (lat, lon)
#[inline(always)]
pub fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = x * X_TO_LON_FACTOR;
    let lat =
        (std::f64::consts::PI / 2.0 - 2.0 * ((-y * Y_TO_LAT_FACTOR).exp()).atan()).to_degrees();
    (lat, lon)
}

/// Web Mercator meters covered by one screen pixel at `zoom`
#[inline]
pub fn meters_per_pixel(zoom: f64) -> f64 {
    EARTH_SIZE_METERS / (TILE_SIZE * zoom.exp2())
}

/// Project a lon/lat coordinate (x = lon, y = lat) to world pixels at `zoom`
///
/// The origin is the Mercator origin and y grows northwards; only distances and
/// extents are derived from these values.
#[inline]
pub fn coord_to_world_pixels(coord: Coord<f64>, zoom: f64) -> Point<f64> {
    let mercator = wgs84_to_mercator(coord.y, coord.x);
    let scale = 1.0 / meters_per_pixel(zoom);
    Point::new(mercator.x() * scale, mercator.y() * scale)
}

/// Highest zoom at which a Mercator extent of `extent_width` × `extent_height` meters
/// fits in a viewport of `viewport_px` (width, height) pixels
///
/// Degenerate extents fit at any zoom and yield `f64::INFINITY`; callers clamp.
pub fn fit_zoom(extent_width: f64, extent_height: f64, viewport_px: (f64, f64)) -> f64 {
    let zoom_for = |extent: f64, pixels: f64| {
        if extent <= f64::EPSILON {
            f64::INFINITY
        } else {
            (pixels * EARTH_SIZE_METERS / (TILE_SIZE * extent)).log2()
        }
    };
    zoom_for(extent_width, viewport_px.0).min(zoom_for(extent_height, viewport_px.1))
}
