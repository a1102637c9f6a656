//! Temporal windowing and the session activity filter
//!
//! Windows are half-open intervals `[start, start + size)`. The overlap rule lives in
//! [`Interval`] and its two marginal conditions, [`starts_before`] and [`ended_by`];
//! the histogram counts with exactly those two functions, so a direct filter and a
//! sweep-line count always agree, even for sessions touching a window edge.

use crate::{Result, Session, TimelineError};
use chrono::{DateTime, FixedOffset};

/// Spans up to this many minutes get hourly windows
const SPAN_THREE_DAYS: i64 = 3 * 24 * 60;
const SPAN_SEVEN_DAYS: i64 = 7 * 24 * 60;
const SPAN_THIRTY_DAYS: i64 = 30 * 24 * 60;

/// Width of a playback window, in minutes (always positive)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WindowSize(u32);

impl WindowSize {
    pub const HOUR: WindowSize = WindowSize(60);
    pub const THREE_HOURS: WindowSize = WindowSize(180);
    pub const SIX_HOURS: WindowSize = WindowSize(360);
    pub const DAY: WindowSize = WindowSize(1440);

    /// Validate a user-supplied window size
    ///
    /// Sizes of zero or less would never advance window generation and are rejected.
    pub fn from_minutes(minutes: i64) -> Result<Self> {
        match u32::try_from(minutes) {
            Ok(m) if m > 0 => Ok(Self(m)),
            _ => Err(TimelineError::InvalidWindowSize(minutes)),
        }
    }

    #[inline]
    pub fn minutes(self) -> i64 {
        i64::from(self.0)
    }

    #[inline]
    pub fn duration(self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes())
    }

    #[inline]
    pub(crate) fn nanos(self) -> i128 {
        i128::from(self.minutes()) * 60_000_000_000
    }
}

/// Epoch-nanosecond key of an instant, exact over the whole chrono range
#[inline]
pub(crate) fn instant_key(time: &DateTime<FixedOffset>) -> i128 {
    i128::from(time.timestamp()) * 1_000_000_000 + i128::from(time.timestamp_subsec_nanos())
}

/// Epoch-nanosecond interval, half-open on the right
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interval {
    pub start: i128,
    pub end: i128,
}

impl Interval {
    #[inline]
    pub(crate) fn new(start: i128, end: i128) -> Self {
        Self { start, end }
    }

    /// Whether a session interval overlaps the window `window`
    #[inline]
    pub(crate) fn overlaps(&self, window: &Interval) -> bool {
        starts_before(self.start, window.end) && !ended_by(self.end, window.start)
    }
}

/// A session starting at `start` begins before a window ending at `window_end`
#[inline]
pub(crate) fn starts_before(start: i128, window_end: i128) -> bool {
    start < window_end
}

/// A session ending at `end` is already over when a window opens at `window_start`
#[inline]
pub(crate) fn ended_by(end: i128, window_start: i128) -> bool {
    end <= window_start
}

/// Pick a window size that keeps the number of windows human-scrollable
pub fn calculate_window_size(
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
) -> WindowSize {
    let span = (end - start).num_minutes();
    if span <= SPAN_THREE_DAYS {
        WindowSize::HOUR
    } else if span <= SPAN_SEVEN_DAYS {
        WindowSize::THREE_HOURS
    } else if span <= SPAN_THIRTY_DAYS {
        WindowSize::SIX_HOURS
    } else {
        WindowSize::DAY
    }
}

/// Window start instants from `start` up to and including the last one `<= end`
///
/// Returns an empty sequence when `start > end`.
pub fn generate_time_windows(
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    window_size: WindowSize,
) -> Vec<DateTime<FixedOffset>> {
    if start > end {
        return Vec::new();
    }

    let step = window_size.duration();
    let count = (end - start).num_minutes() / window_size.minutes() + 1;
    let mut windows = Vec::with_capacity(usize::try_from(count).unwrap_or(0));

    let mut current = Some(start);
    while let Some(time) = current.filter(|time| *time <= end) {
        windows.push(time);
        current = time.checked_add_signed(step);
    }

    windows
}

/// Strict half-open overlap between a session and `[window_start, window_end)`
#[inline]
pub fn session_overlaps_window(
    session: &Session,
    window_start: DateTime<FixedOffset>,
    window_end: DateTime<FixedOffset>,
) -> bool {
    let window = Interval::new(instant_key(&window_start), instant_key(&window_end));
    session.interval().overlaps(&window)
}

/// Sessions active in `[window_start, window_start + window_size)`, in input order
pub fn get_active_sessions<'a>(
    sessions: &'a [Session],
    window_start: DateTime<FixedOffset>,
    window_size: WindowSize,
) -> Vec<&'a Session> {
    let start = instant_key(&window_start);
    let window = Interval::new(start, start + window_size.nanos());
    sessions
        .iter()
        .filter(|session| session.interval().overlaps(&window))
        .collect()
}

/// Index of the window containing `time`, clamped to the sequence bounds
///
/// Returns `None` only for an empty sequence.
pub fn window_index_at(windows: &[DateTime<FixedOffset>], time: DateTime<FixedOffset>) -> Option<usize> {
    if windows.is_empty() {
        return None;
    }
    let after = windows.partition_point(|w| *w <= time);
    Some(after.saturating_sub(1))
}
