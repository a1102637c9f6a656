//! Session count histogram for the playback scrubber
//!
//! Counting the active sessions of every window directly costs O(W×N). Instead, the
//! start and end instants are sorted independently and each window is answered with two
//! binary searches:
//!
//! `active(ws, we) = #(start < we) - #(end <= ws)`
//!
//! Every session that has ended by `ws` also started before `we`, so the subtraction
//! removes exactly the sessions that are already over. Pairing between starts and ends
//! is not needed, which is what makes independent sorting valid.

use crate::window::{WindowSize, ended_by, instant_key, starts_before};
use crate::Session;
use chrono::{DateTime, FixedOffset};
use rayon::prelude::*;

/// Input sizes from which sorting and window evaluation run on the rayon pool
const PARALLEL_THRESHOLD: usize = 8192;

/// Number of sessions overlapping each window of `time_windows`
///
/// `result[i]` equals `get_active_sessions(sessions, time_windows[i], window_size).len()`.
/// Runs in O(N log N + W log N).
pub fn get_session_counts_per_window(
    sessions: &[Session],
    time_windows: &[DateTime<FixedOffset>],
    window_size: WindowSize,
) -> Vec<usize> {
    #[cfg(feature = "profiling")]
    profiling::scope!("histogram::get_session_counts_per_window");

    if time_windows.is_empty() {
        return Vec::new();
    }
    if sessions.is_empty() {
        return vec![0; time_windows.len()];
    }

    let bounds = SortedBounds::new(sessions);
    let width = window_size.nanos();
    let count = |window_start: &DateTime<FixedOffset>| {
        let start = instant_key(window_start);
        bounds.active_in(start, start + width)
    };

    if time_windows.len() >= PARALLEL_THRESHOLD {
        time_windows.par_iter().map(count).collect()
    } else {
        time_windows.iter().map(count).collect()
    }
}

/// Independently sorted session start and end instants (epoch nanoseconds)
struct SortedBounds {
    starts: Vec<i128>,
    ends: Vec<i128>,
}

impl SortedBounds {
    fn new(sessions: &[Session]) -> Self {
        let (mut starts, mut ends): (Vec<i128>, Vec<i128>) = sessions
            .iter()
            .map(|session| {
                let interval = session.interval();
                (interval.start, interval.end)
            })
            .unzip();

        if sessions.len() >= PARALLEL_THRESHOLD {
            rayon::join(|| starts.par_sort_unstable(), || ends.par_sort_unstable());
        } else {
            starts.sort_unstable();
            ends.sort_unstable();
        }

        Self { starts, ends }
    }

    /// Sessions overlapping `[window_start, window_end)`
    #[inline]
    fn active_in(&self, window_start: i128, window_end: i128) -> usize {
        let started = self
            .starts
            .partition_point(|&start| starts_before(start, window_end));
        let ended = self.ends.partition_point(|&end| ended_by(end, window_start));
        debug_assert!(ended <= started, "ended sessions must have started");
        started.saturating_sub(ended)
    }
}
