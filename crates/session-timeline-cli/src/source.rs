//! Session records served from a JSON export
//!
//! The file holds a JSON array of records. Filtering and pagination are applied here,
//! the way a remote provider would apply them.

use chrono::{FixedOffset, Offset, Utc};
use serde_json::Value;
use session_timeline_lib::{Result, SessionQuery, SessionRecord, SessionSource, parse_timestamp};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Paginated access to records loaded from a JSON file
pub struct JsonFileSource {
    records: Vec<SessionRecord>,
}

impl JsonFileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let source = Self::from_reader(BufReader::new(file))?;
        tracing::info!(
            "Read {} session records from {}",
            source.records.len(),
            path.display()
        );
        Ok(source)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let records: Vec<SessionRecord> = serde_json::from_reader(reader)?;
        Ok(Self { records })
    }

    pub fn from_records(records: Vec<SessionRecord>) -> Self {
        Self { records }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl SessionSource for JsonFileSource {
    fn fetch_page(&mut self, query: &SessionQuery, page: usize) -> Result<Vec<SessionRecord>> {
        let page_size = query.page_size.max(1);
        Ok(self
            .records
            .iter()
            .filter(|record| matches_filters(record, query) && overlaps_range(record, query))
            .skip(page * page_size)
            .take(page_size)
            .cloned()
            .collect())
    }
}

fn matches_filters(record: &SessionRecord, query: &SessionQuery) -> bool {
    query.filters.iter().all(|(key, expected)| {
        record.payload.get(key).is_some_and(|value| match value {
            Value::String(text) => text == expected,
            other => other.to_string() == *expected,
        })
    })
}

/// Records whose timestamps do not parse are kept so that they get reported downstream
fn overlaps_range(record: &SessionRecord, query: &SessionQuery) -> bool {
    if query.from.is_none() && query.to.is_none() {
        return true;
    }
    let utc: FixedOffset = Utc.fix();
    let (Some(start), Some(end)) = (
        parse_timestamp(&record.session_start, &utc),
        parse_timestamp(&record.session_end, &utc),
    ) else {
        return true;
    };

    query.from.is_none_or(|from| end > from) && query.to.is_none_or(|to| start < to)
}
