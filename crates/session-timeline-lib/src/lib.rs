//! Session Timeline Library - Core Engine for Session Playback Maps
//!
//! This library turns a list of visitor sessions (start/end instants plus an optional
//! location) into everything a time-scrubbing session map needs: a discrete playback
//! timeline, the sessions active at the playback cursor, per-window session counts for
//! the scrubber histogram, and marker positions that stay readable at any zoom level.
//!
//! # Architecture
//!
//! - **[`Session`]**: Immutable, timezone-normalized session data
//! - **[`window`]**: Window sizing, window generation and the shared overlap predicate
//! - **[`histogram`]**: Sweep-line session counts for every window
//! - **[`spread`]**: Deterministic scattering of co-located sessions
//! - **[`cluster`]**: Clustering decision, cluster formation and click-to-zoom
//! - **[`MarkerLayer`]**: Diff-based marker reconciliation against a [`MapSurface`]
//! - **[`PlaybackStore`]**: Scoped owner of sessions, derived caches and the cursor
//!
//! # Performance Characteristics
//!
//! - **Active set**: O(N) per cursor move
//! - **Histogram**: O(N log N + W log N) where N=sessions, W=windows
//! - **Spreading**: O(N) expected (hash grouping)
//! - **Clustering**: O(N) expected (uniform grid)

pub mod cluster;
mod fetch;
#[cfg(test)]
mod fixtures;
pub mod histogram;
mod markers;
mod playback;
pub mod rate;
mod session;
pub mod spread;
pub mod utils;
pub mod window;

// Public API exports
pub use cluster::{CameraTarget, ClusterFeature, ClusterTier, RenderItem, RenderPlan};
pub use fetch::{FetchOutcome, SessionQuery, SessionSource, fetch_sessions};
pub use histogram::get_session_counts_per_window;
pub use markers::{
    ListenerId, MapSurface, MarkerEvent, MarkerHandle, MarkerKey, MarkerLayer, MarkerStyle,
    SyncReport,
};
pub use playback::{PlaybackStore, PollOutcome, TimelineConfig};
pub use rate::{Debouncer, Throttler};
pub use session::{RecordError, Session, SessionRecord, TimeRange, parse_timestamp};
pub use spread::{SpreadMap, spread_overlapping_points};
pub use window::{
    WindowSize, calculate_window_size, generate_time_windows, get_active_sessions,
    session_overlaps_window,
};

/// Error types for the timeline engine
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("Invalid window size: {0} minutes (must be positive)")]
    InvalidWindowSize(i64),

    #[error("Fetch error on page {page}: {reason}")]
    Fetch { page: usize, reason: String },

    #[error("Map surface error: {0}")]
    Surface(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TimelineError>;
