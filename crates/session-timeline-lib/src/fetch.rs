//! Paginated session loading
//!
//! The data provider is reached through [`SessionSource`]. [`fetch_sessions`] walks its
//! pages up to a cap, parses every record, and reports whether the cap may have cut
//! the data short. "No more data" and "stopped at the cap" are distinct outcomes.

use crate::session::{RecordError, Session, SessionRecord};
use crate::Result;
use chrono::{DateTime, FixedOffset};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Filter criteria handed to the data provider
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionQuery {
    /// Only sessions overlapping this range, when set
    pub from: Option<DateTime<FixedOffset>>,
    pub to: Option<DateTime<FixedOffset>>,
    /// Records per page; a shorter page means there is no more data
    pub page_size: usize,
    /// Provider-specific equality filters (e.g. `country = "ES"`)
    pub filters: Vec<(String, String)>,
}

impl Default for SessionQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            page_size: 1000,
            filters: Vec::new(),
        }
    }
}

/// A paginated provider of session records
pub trait SessionSource {
    /// Fetch page `page` (0-based) of the records matching `query`
    fn fetch_page(&mut self, query: &SessionQuery, page: usize) -> Result<Vec<SessionRecord>>;
}

/// Everything one fetch produced
#[derive(Clone, Debug, Default)]
pub struct FetchOutcome {
    /// Parsed sessions, in provider order, unique by id
    pub sessions: Vec<Session>,
    /// Records that could not be parsed
    pub rejected: Vec<RecordError>,
    /// Number of pages requested
    pub pages: usize,
    /// The page cap was reached with a full last page: more data may exist
    pub maybe_truncated: bool,
}

/// Load sessions page by page until a short page or `max_pages`
///
/// Records are converted to `zone`. Malformed records are collected in
/// [`FetchOutcome::rejected`]; a provider error aborts the whole fetch.
pub fn fetch_sessions<S>(
    source: &mut S,
    query: &SessionQuery,
    max_pages: usize,
    zone: &FixedOffset,
) -> Result<FetchOutcome>
where
    S: SessionSource + ?Sized,
{
    #[cfg(feature = "profiling")]
    profiling::scope!("fetch::fetch_sessions");

    let page_size = query.page_size.max(1);
    let max_pages = max_pages.max(1);

    let mut outcome = FetchOutcome::default();
    let mut seen = HashSet::new();
    let mut duplicates = 0_usize;

    for page in 0..max_pages {
        let records = source.fetch_page(query, page).inspect_err(|err| {
            tracing::warn!("Fetching page {} failed: {}", page, err);
        })?;
        outcome.pages += 1;
        let full = records.len() >= page_size;

        for record in records {
            match record.into_session(zone) {
                Ok(session) => {
                    if seen.insert(session.id().to_string()) {
                        outcome.sessions.push(session);
                    } else {
                        duplicates += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!("Skipping record: {}", err);
                    outcome.rejected.push(err);
                }
            }
        }

        if !full {
            break;
        }
        if page + 1 == max_pages {
            outcome.maybe_truncated = true;
        }
    }

    if duplicates > 0 {
        tracing::debug!("Dropped {} duplicate session records", duplicates);
    }
    if outcome.maybe_truncated {
        tracing::warn!(
            "Stopped after {} pages of {} records; more sessions may exist",
            outcome.pages,
            page_size
        );
    }
    tracing::debug!(
        "Fetched {} sessions ({} rejected) in {} pages",
        outcome.sessions.len(),
        outcome.rejected.len(),
        outcome.pages
    );

    Ok(outcome)
}
