//! Shared test fixtures

use crate::Session;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};

/// 2024-03-01 at `h:m` UTC
pub(crate) fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap().fixed_offset()
}

pub(crate) fn session(id: &str, start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Session {
    Session::new(id, start, end).unwrap()
}
