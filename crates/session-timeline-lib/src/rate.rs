//! Rate control for expensive recomputation
//!
//! Two different producers feed the same downstream work and need different policies:
//!
//! - [`Debouncer`]: scrubber drags. Only the last value of a burst fires, once the input
//!   has been quiet for the configured delay.
//! - [`Throttler`]: map pan/zoom. Fires at most once per interval, on both the leading
//!   and the trailing edge, so feedback keeps flowing during a drag.
//!
//! Both are polled with an explicit `now`, which keeps them deterministic and lets the
//! owner decide when callbacks run. Both always hand out the latest pushed value.

use instant::Instant;
use std::time::Duration;

/// Coalesces a burst of values into the last one, after a quiet period
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Replace the pending value and restart the quiet period
    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.delay));
    }

    /// Take the pending value if the quiet period is over
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, deadline)) if *deadline <= now => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    /// Drop the pending value; returns whether one was pending
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending value will fire
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    #[inline]
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Lets a value through at most once per interval, leading and trailing
#[derive(Debug, Clone)]
pub struct Throttler<T> {
    interval: Duration,
    last_fire: Option<Instant>,
    trailing: Option<T>,
}

impl<T> Throttler<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fire: None,
            trailing: None,
        }
    }

    /// Offer a value
    ///
    /// Returns it immediately when the interval has elapsed since the last fire
    /// (leading edge). Otherwise it is kept, replacing any older value, for
    /// [`Throttler::poll`] to deliver (trailing edge).
    pub fn push(&mut self, value: T, now: Instant) -> Option<T> {
        if self.ready(now) {
            self.last_fire = Some(now);
            self.trailing = None;
            Some(value)
        } else {
            self.trailing = Some(value);
            None
        }
    }

    /// Deliver the trailing value once the interval has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        if self.trailing.is_some() && self.ready(now) {
            self.last_fire = Some(now);
            self.trailing.take()
        } else {
            None
        }
    }

    /// Drop the trailing value and forget the last fire; returns whether a value was
    /// pending
    pub fn cancel(&mut self) -> bool {
        self.last_fire = None;
        self.trailing.take().is_some()
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.trailing.is_some()
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[inline]
    fn ready(&self, now: Instant) -> bool {
        self.last_fire
            .is_none_or(|last| now.duration_since(last) >= self.interval)
    }
}
