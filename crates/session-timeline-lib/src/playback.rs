//! PlaybackStore - Owner of the session list, derived timeline data and the cursor
//!
//! Everything the session map UI reads goes through one store instance: the loaded
//! sessions, the window sequence and histogram (memoized until the data or the window
//! size changes), the playback cursor, auto-play, and the rate-controlled inputs from
//! the scrubber and the map. Nothing is global; [`PlaybackStore::reset`] returns the
//! store to its initial state and cancels pending work.

use crate::cluster::{ClusterConfig, RenderPlan, plan_render};
use crate::fetch::FetchOutcome;
use crate::histogram::get_session_counts_per_window;
use crate::rate::{Debouncer, Throttler};
use crate::session::{Session, TimeRange};
use crate::spread::{SpreadMap, spread_overlapping_points};
use crate::window::{
    WindowSize, calculate_window_size, generate_time_windows, get_active_sessions,
    window_index_at,
};
use crate::{Result, TimelineError};

use chrono::{DateTime, FixedOffset};
use geo::Coord;
use instant::Instant;
use lru::LruCache;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the playback store
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimelineConfig {
    /// Clustering decision and formation settings
    pub clustering: ClusterConfig,
    /// Zoom level from which co-located sessions are spread apart (default 10)
    pub spread_start_zoom: f64,
    /// Auto-play advances one window per tick (default 500 ms)
    pub tick_interval: Duration,
    /// Quiet period before a scrubber drag moves the cursor (default 150 ms)
    pub scrub_debounce: Duration,
    /// Minimum interval between map refreshes during pan/zoom (default 100 ms)
    pub map_throttle: Duration,
    /// Restart from the first window instead of stopping at the end
    pub loop_playback: bool,
    /// Number of (cursor, zoom) spread results kept
    pub spread_cache_size: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            clustering: ClusterConfig::default(),
            spread_start_zoom: 10.0,
            tick_interval: Duration::from_millis(500),
            scrub_debounce: Duration::from_millis(150),
            map_throttle: Duration::from_millis(100),
            loop_playback: false,
            spread_cache_size: 16,
        }
    }
}

/// What a [`PlaybackStore::poll`] call changed
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PollOutcome {
    /// New cursor position, when the cursor moved
    pub cursor: Option<DateTime<FixedOffset>>,
    /// Auto-play stopped after reaching the last window
    pub playback_stopped: bool,
    /// Zoom to re-render the map at, when a throttled map update fired
    pub map_zoom: Option<f64>,
}

impl PollOutcome {
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.cursor.is_none() && !self.playback_stopped && self.map_zoom.is_none()
    }
}

/// Spread results depend on the active set (the cursor) and the zoom
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct SpreadKey {
    cursor: usize,
    zoom_bits: u64,
}

/// Playback-scoped store for one session map
pub struct PlaybackStore {
    config: TimelineConfig,

    sessions: Vec<Session>,
    index_by_id: HashMap<String, usize>,
    time_range: Option<TimeRange>,
    rejected: usize,
    maybe_truncated: bool,

    window_size_override: Option<WindowSize>,
    time_windows: OnceCell<Vec<DateTime<FixedOffset>>>,
    session_counts: OnceCell<Vec<usize>>,
    spread_cache: LruCache<SpreadKey, Arc<SpreadMap>>,

    cursor: Option<usize>,
    playing: bool,
    next_tick: Option<Instant>,
    selected: Option<String>,

    scrub: Debouncer<DateTime<FixedOffset>>,
    map_moves: Throttler<f64>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl PlaybackStore {
    /// Create an empty store
    pub fn new(config: TimelineConfig) -> Self {
        let cache_size = NonZeroUsize::new(config.spread_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Vec::new(),
            index_by_id: HashMap::new(),
            time_range: None,
            rejected: 0,
            maybe_truncated: false,
            window_size_override: None,
            time_windows: OnceCell::new(),
            session_counts: OnceCell::new(),
            spread_cache: LruCache::new(cache_size),
            cursor: None,
            playing: false,
            next_tick: None,
            selected: None,
            scrub: Debouncer::new(config.scrub_debounce),
            map_moves: Throttler::new(config.map_throttle),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    // ----- Data -----

    /// Replace the session list with a fetch result
    ///
    /// Stops playback, drops a pending scrub and moves the cursor to the first window.
    /// The selection survives when the selected session is still present.
    pub fn load(&mut self, outcome: FetchOutcome) {
        self.sessions = outcome.sessions;
        self.index_by_id = self
            .sessions
            .iter()
            .enumerate()
            .map(|(index, session)| (session.id().to_string(), index))
            .collect();
        self.time_range = TimeRange::from_sessions(&self.sessions);
        self.rejected = outcome.rejected.len();
        self.maybe_truncated = outcome.maybe_truncated;

        if self
            .selected
            .as_ref()
            .is_some_and(|id| !self.index_by_id.contains_key(id))
        {
            self.selected = None;
        }

        self.pause();
        self.scrub.cancel();
        self.invalidate_windows();
        self.cursor = if self.time_windows().is_empty() {
            None
        } else {
            Some(0)
        };

        tracing::debug!(
            "Loaded {} sessions ({} rejected, truncated: {}), {} windows of {} min",
            self.sessions.len(),
            self.rejected,
            self.maybe_truncated,
            self.time_windows().len(),
            self.window_size().minutes()
        );
    }

    #[inline]
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    #[inline]
    pub fn time_range(&self) -> Option<TimeRange> {
        self.time_range
    }

    /// Number of records dropped during the last load
    #[inline]
    pub fn rejected_count(&self) -> usize {
        self.rejected
    }

    /// Whether the last load stopped at the page cap with more data possibly available
    #[inline]
    pub fn maybe_truncated(&self) -> bool {
        self.maybe_truncated
    }

    // ----- Windows -----

    /// The user override if set, otherwise a size derived from the time range
    pub fn window_size(&self) -> WindowSize {
        self.window_size_override.unwrap_or_else(|| match self.time_range {
            Some(range) => calculate_window_size(range.start, range.end),
            None => WindowSize::HOUR,
        })
    }

    /// Set (or clear with `None`) a window size in minutes
    ///
    /// The cursor is kept at the window containing its previous time.
    pub fn set_window_size_override(&mut self, minutes: Option<i64>) -> Result<()> {
        let size = minutes.map(WindowSize::from_minutes).transpose()?;
        if size == self.window_size_override {
            return Ok(());
        }

        let previous = self.current_time();
        self.window_size_override = size;
        self.invalidate_windows();
        self.cursor = match previous {
            Some(time) => window_index_at(self.time_windows(), time),
            None => None,
        };
        Ok(())
    }

    /// Window start instants covering the loaded time range
    pub fn time_windows(&self) -> &[DateTime<FixedOffset>] {
        self.time_windows.get_or_init(|| match self.time_range {
            Some(range) => generate_time_windows(range.start, range.end, self.window_size()),
            None => Vec::new(),
        })
    }

    /// Active session count for every window, aligned with [`Self::time_windows`]
    pub fn session_counts(&self) -> &[usize] {
        self.session_counts.get_or_init(|| {
            get_session_counts_per_window(&self.sessions, self.time_windows(), self.window_size())
        })
    }

    // ----- Cursor -----

    pub fn current_time(&self) -> Option<DateTime<FixedOffset>> {
        self.cursor
            .and_then(|index| self.time_windows().get(index).copied())
    }

    /// Index of the cursor in [`Self::time_windows`]
    #[inline]
    pub fn current_index(&self) -> Option<usize> {
        self.cursor
    }

    /// Move the cursor to the window containing `time`
    ///
    /// Times outside the range snap to the first or last window. Returns the window
    /// start the cursor landed on.
    pub fn set_current_time(&mut self, time: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let index = window_index_at(self.time_windows(), time)?;
        self.cursor = Some(index);
        self.current_time()
    }

    /// Record a scrubber position; the cursor follows once the drag settles
    ///
    /// Scrubbing pauses auto-play.
    pub fn scrub(&mut self, time: DateTime<FixedOffset>, now: Instant) {
        self.pause();
        self.scrub.push(time, now);
    }

    /// Run everything that is due at `now`: a settled scrub, an auto-play tick and a
    /// trailing map update
    ///
    /// At most one auto-play advance happens per call.
    pub fn poll(&mut self, now: Instant) -> PollOutcome {
        let mut outcome = PollOutcome::default();

        if let Some(time) = self.scrub.poll(now) {
            outcome.cursor = self.set_current_time(time);
        }

        if self.playing && self.next_tick.is_some_and(|tick| tick <= now) {
            outcome.cursor = self.advance();
            if self.playing {
                self.next_tick = Some(now + self.config.tick_interval);
            } else {
                outcome.playback_stopped = true;
            }
        }

        outcome.map_zoom = self.map_moves.poll(now);
        outcome
    }

    // ----- Playback -----

    /// Start auto-play; the first advance happens one tick after `now`
    ///
    /// Returns `false` when there is nothing to play.
    pub fn play(&mut self, now: Instant) -> bool {
        if self.time_windows().is_empty() {
            return false;
        }
        self.scrub.cancel();
        self.playing = true;
        self.next_tick = Some(now + self.config.tick_interval);
        true
    }

    pub fn pause(&mut self) {
        self.playing = false;
        self.next_tick = None;
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Move the cursor one window forward
    ///
    /// Past the last window the cursor wraps to the first one; auto-play then stops
    /// unless looping is configured.
    pub fn advance(&mut self) -> Option<DateTime<FixedOffset>> {
        let count = self.time_windows().len();
        if count == 0 {
            return None;
        }

        let next = self.cursor.map_or(0, |index| index + 1);
        if next >= count {
            self.cursor = Some(0);
            if !self.config.loop_playback {
                tracing::debug!("Playback reached the last window, stopping");
                self.pause();
            }
        } else {
            self.cursor = Some(next);
        }
        self.current_time()
    }

    // ----- Map -----

    /// Sessions active in the cursor's window, in load order
    pub fn active_sessions(&self) -> Vec<&Session> {
        match self.current_time() {
            Some(window_start) => {
                get_active_sessions(&self.sessions, window_start, self.window_size())
            }
            None => Vec::new(),
        }
    }

    /// Spread positions of the active sessions at `zoom`
    pub fn spread_points(&mut self, zoom: f64) -> Arc<SpreadMap> {
        let key = SpreadKey {
            cursor: self.cursor.unwrap_or(usize::MAX),
            zoom_bits: zoom.to_bits(),
        };
        if let Some(hit) = self.spread_cache.get(&key) {
            return Arc::clone(hit);
        }

        let spread = Arc::new(spread_overlapping_points(
            self.active_sessions(),
            zoom,
            self.config.spread_start_zoom,
        ));
        self.spread_cache.put(key, Arc::clone(&spread));
        spread
    }

    /// Markers and clusters to show for the active sessions at `zoom`
    ///
    /// Sessions without a location count towards the clustering decision but get no
    /// item; spread positions replace raw ones where available.
    pub fn render_plan(&mut self, zoom: f64) -> RenderPlan {
        let spread = self.spread_points(zoom);
        let active = self.active_sessions();
        let points: Vec<(&str, Coord<f64>)> = active
            .iter()
            .filter_map(|session| {
                let raw = session.location()?;
                let position = spread.get(session.id()).copied().unwrap_or(raw);
                Some((session.id(), position))
            })
            .collect();

        plan_render(&points, active.len(), zoom, &self.config.clustering)
    }

    /// Report a map pan/zoom; returns the zoom to re-render at when the update may run
    /// now
    ///
    /// Updates arriving faster than the throttle interval are delivered later by
    /// [`Self::poll`], always with the latest zoom.
    pub fn map_moved(&mut self, zoom: f64, now: Instant) -> Option<f64> {
        self.map_moves.push(zoom, now)
    }

    // ----- Selection and lifecycle -----

    pub fn select_session(&mut self, session_id: &str) -> Result<&Session> {
        let index = *self
            .index_by_id
            .get(session_id)
            .ok_or_else(|| TimelineError::UnknownSession(session_id.to_string()))?;
        self.selected = Some(session_id.to_string());
        Ok(&self.sessions[index])
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected_session(&self) -> Option<&Session> {
        let id = self.selected.as_ref()?;
        self.index_by_id.get(id).map(|&index| &self.sessions[index])
    }

    /// Return to the initial empty state, cancelling pending scrubs and map updates
    pub fn reset(&mut self) {
        self.pause();
        self.scrub.cancel();
        self.map_moves.cancel();
        self.sessions.clear();
        self.index_by_id.clear();
        self.time_range = None;
        self.rejected = 0;
        self.maybe_truncated = false;
        self.window_size_override = None;
        self.cursor = None;
        self.selected = None;
        self.invalidate_windows();
    }

    fn invalidate_windows(&mut self) {
        self.time_windows = OnceCell::new();
        self.session_counts = OnceCell::new();
        self.spread_cache.clear();
    }
}

impl Default for PlaybackStore {
    fn default() -> Self {
        Self::new(TimelineConfig::default())
    }
}
