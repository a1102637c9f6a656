//! Session storage and ingestion module
//!
//! This module provides the [`Session`] struct, the [`SessionRecord`] wire form that the
//! fetch layer delivers, and the [`TimeRange`] reduction over a session list.
//!
//! Records arrive with UTC timestamps in text form. They are converted into
//! timezone-aware instants in the viewer's zone once, at ingestion, so every later
//! computation works on normalized data.

use crate::window::{Interval, instant_key};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use geo::Coord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Naive timestamp layouts accepted besides RFC 3339 (interpreted as UTC)
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Per-record ingestion errors
///
/// These never abort a whole load: the offending record is skipped and reported.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("Record has an empty session id")]
    MissingSessionId,

    #[error("Session {session_id}: invalid {field} timestamp {value:?}")]
    InvalidTimestamp {
        session_id: String,
        field: &'static str,
        value: String,
    },

    #[error("Session {session_id}: ends at {end} before it starts at {start}")]
    InvertedInterval {
        session_id: String,
        start: String,
        end: String,
    },
}

/// A session record as delivered by the data provider
///
/// Everything that is not an identifier, a timestamp or a coordinate is kept verbatim
/// in `payload` and handed through to the UI untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub session_start: String,
    pub session_end: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl SessionRecord {
    /// Parse this record into a [`Session`] normalized to `zone`
    pub fn into_session(self, zone: &FixedOffset) -> Result<Session, RecordError> {
        if self.session_id.is_empty() {
            return Err(RecordError::MissingSessionId);
        }

        let start = parse_timestamp(&self.session_start, zone).ok_or_else(|| {
            RecordError::InvalidTimestamp {
                session_id: self.session_id.clone(),
                field: "start",
                value: self.session_start.clone(),
            }
        })?;
        let end = parse_timestamp(&self.session_end, zone).ok_or_else(|| {
            RecordError::InvalidTimestamp {
                session_id: self.session_id.clone(),
                field: "end",
                value: self.session_end.clone(),
            }
        })?;

        let mut session = Session::new(self.session_id, start, end)?.with_payload(self.payload);
        if let (Some(lat), Some(lon)) = (self.lat, self.lon) {
            session = session.with_location(lat, lon);
        }
        Ok(session)
    }
}

/// Parse a provider timestamp and convert it to `zone`
///
/// Accepts RFC 3339 (any offset) and `YYYY-MM-DD HH:MM:SS[.fff]`, the latter being UTC.
pub fn parse_timestamp(text: &str, zone: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(zone));
    }

    NAIVE_TIMESTAMP_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .map(|naive| naive.and_utc().with_timezone(zone))
    })
}

/// A single visitor session with normalized timestamps
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    id: String,
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    /// Geographic position (x = longitude, y = latitude)
    location: Option<Coord<f64>>,
    payload: Map<String, Value>,
}

impl Session {
    /// Create a new session
    ///
    /// Zero-duration sessions are allowed; a session ending before it starts is rejected,
    /// since it would make the per-window counts disagree with the active-set filter.
    pub fn new(
        id: impl Into<String>,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Self, RecordError> {
        let id = id.into();
        if end < start {
            return Err(RecordError::InvertedInterval {
                session_id: id,
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }

        Ok(Self {
            id,
            start,
            end,
            location: None,
            payload: Map::new(),
        })
    }

    /// Attach a location
    ///
    /// Non-finite or out-of-range coordinates leave the session without a location: it
    /// still counts towards the timeline but is skipped by spatial operations.
    pub fn with_location(mut self, lat: f64, lon: f64) -> Self {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);

        if valid {
            self.location = Some(Coord { x: lon, y: lat });
        } else {
            tracing::warn!(
                "Ignoring invalid coordinates for session {}: ({}, {})",
                self.id,
                lat,
                lon
            );
            self.location = None;
        }
        self
    }

    /// Attach opaque payload fields
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    #[inline]
    pub fn end(&self) -> DateTime<FixedOffset> {
        self.end
    }

    /// Location as a coordinate (x = longitude, y = latitude)
    #[inline]
    pub fn location(&self) -> Option<Coord<f64>> {
        self.location
    }

    #[inline]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// Epoch-nanosecond interval used by the overlap predicate
    #[inline]
    pub(crate) fn interval(&self) -> Interval {
        Interval::new(instant_key(&self.start), instant_key(&self.end))
    }
}

/// The span covered by a set of sessions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeRange {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl TimeRange {
    /// Earliest start and latest end across `sessions`
    ///
    /// Returns `None` for an empty list.
    pub fn from_sessions(sessions: &[Session]) -> Option<Self> {
        let start = sessions.iter().map(Session::start).min()?;
        let end = sessions.iter().map(Session::end).max()?;
        Some(Self { start, end })
    }

    /// Whole minutes between start and end
    #[inline]
    pub fn span_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Offset, TimeZone, Utc};

    fn utc() -> FixedOffset {
        Utc.fix()
    }

    fn create_test_record(id: &str, start: &str, end: &str) -> SessionRecord {
        SessionRecord {
            session_id: id.to_string(),
            session_start: start.to_string(),
            session_end: end.to_string(),
            lat: Some(51.5074),
            lon: Some(-0.1278),
            payload: Map::new(),
        }
    }

    #[test]
    fn test_parse_naive_timestamp_as_utc() {
        let parsed = parse_timestamp("2024-03-01 10:00:00", &utc()).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_timestamp_with_fraction() {
        let parsed = parse_timestamp("2024-03-01 10:00:00.250", &utc()).unwrap();
        assert_eq!(parsed.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_timestamp_converts_to_zone() {
        let zone = FixedOffset::east_opt(2 * 3600).unwrap();
        let parsed = parse_timestamp("2024-03-01T10:00:00Z", &zone).unwrap();
        assert_eq!(parsed.offset(), &zone);
        assert_eq!(parsed.format("%H:%M").to_string(), "12:00");
        // Same instant regardless of the display zone
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday", &utc()).is_none());
        assert!(parse_timestamp("", &utc()).is_none());
    }

    #[test]
    fn test_record_into_session() {
        let mut record = create_test_record("s1", "2024-03-01 10:00:00", "2024-03-01 10:30:00");
        record
            .payload
            .insert("browser".to_string(), Value::from("Firefox"));

        let session = record.into_session(&utc()).unwrap();
        assert_eq!(session.id(), "s1");
        assert_eq!(session.duration(), chrono::Duration::minutes(30));
        assert_eq!(session.location().unwrap().y, 51.5074);
        assert_eq!(session.payload()["browser"], Value::from("Firefox"));
    }

    #[test]
    fn test_record_with_bad_timestamp() {
        let record = create_test_record("s1", "2024-03-01 10:00:00", "not a time");
        let err = record.into_session(&utc()).unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidTimestamp { field: "end", .. }
        ));
    }

    #[test]
    fn test_record_without_id() {
        let record = create_test_record("", "2024-03-01 10:00:00", "2024-03-01 10:30:00");
        assert_eq!(
            record.into_session(&utc()).unwrap_err(),
            RecordError::MissingSessionId
        );
    }

    #[test]
    fn test_inverted_session_rejected() {
        let record = create_test_record("s1", "2024-03-01 11:00:00", "2024-03-01 10:00:00");
        assert!(matches!(
            record.into_session(&utc()),
            Err(RecordError::InvertedInterval { .. })
        ));
    }

    #[test]
    fn test_zero_duration_session_allowed() {
        let record = create_test_record("s1", "2024-03-01 10:00:00", "2024-03-01 10:00:00");
        let session = record.into_session(&utc()).unwrap();
        assert_eq!(session.duration(), chrono::Duration::zero());
    }

    #[test]
    fn test_invalid_location_is_dropped() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap().fixed_offset();
        let session = Session::new("s1", start, start)
            .unwrap()
            .with_location(f64::NAN, 10.0);
        assert!(session.location().is_none());

        let session = Session::new("s2", start, start)
            .unwrap()
            .with_location(95.0, 10.0);
        assert!(session.location().is_none());
    }

    #[test]
    fn test_record_deserialize_flattens_payload() {
        let json = r#"{
            "session_id": "abc",
            "session_start": "2024-03-01 10:00:00",
            "session_end": "2024-03-01 10:05:00",
            "lat": 40.4,
            "lon": -3.7,
            "country": "ES",
            "pageviews": 3
        }"#;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.payload.len(), 2);
        assert_eq!(record.payload["pageviews"], Value::from(3));
    }

    #[test]
    fn test_record_deserialize_without_location() {
        let json = r#"{"session_id": "abc", "session_start": "2024-03-01 10:00:00", "session_end": "2024-03-01 10:05:00"}"#;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        let session = record.into_session(&utc()).unwrap();
        assert!(session.location().is_none());
    }

    #[test]
    fn test_time_range_from_sessions() {
        let zone = utc();
        let sessions: Vec<Session> = [
            ("a", "2024-03-01 10:00:00", "2024-03-01 10:30:00"),
            ("b", "2024-03-01 09:00:00", "2024-03-01 09:10:00"),
            ("c", "2024-03-01 11:00:00", "2024-03-01 12:45:00"),
        ]
        .into_iter()
        .map(|(id, s, e)| create_test_record(id, s, e).into_session(&zone).unwrap())
        .collect();

        let range = TimeRange::from_sessions(&sessions).unwrap();
        assert_eq!(range.start, parse_timestamp("2024-03-01 09:00:00", &zone).unwrap());
        assert_eq!(range.end, parse_timestamp("2024-03-01 12:45:00", &zone).unwrap());
        assert_eq!(range.span_minutes(), 225);
    }

    #[test]
    fn test_time_range_empty() {
        assert!(TimeRange::from_sessions(&[]).is_none());
    }
}
