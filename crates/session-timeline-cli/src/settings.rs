use crate::CliError;
use chrono::{DateTime, FixedOffset, Local, Offset};
use clap::Parser;
use session_timeline_lib::cluster::ClusterConfig;
use session_timeline_lib::{SessionQuery, TimelineConfig, parse_timestamp};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Session Timeline - Replay visitor sessions on a timeline and inspect what a session map would show
pub struct Settings {
    /// JSON file holding an array of session records
    #[clap(short, long, value_name = "FILE")]
    pub sessions: PathBuf,

    /// Records requested per page
    #[clap(long, default_value = "1000")]
    pub page_size: usize,

    /// Maximum number of pages to load
    #[clap(long, default_value = "10")]
    pub max_pages: usize,

    /// Viewer timezone in minutes east of UTC (defaults to the local offset)
    #[clap(long, allow_hyphen_values = true)]
    pub utc_offset_minutes: Option<i32>,

    /// Only load sessions overlapping this range (RFC 3339 or "YYYY-MM-DD HH:MM:SS" UTC)
    #[clap(long, value_name = "TIMESTAMP")]
    pub from: Option<String>,

    /// See --from
    #[clap(long, value_name = "TIMESTAMP")]
    pub to: Option<String>,

    /// Only load sessions whose payload field KEY equals VALUE (repeatable)
    #[clap(long, value_name = "KEY=VALUE")]
    pub filter: Vec<String>,

    /// Window size in minutes (derived from the data range when omitted)
    #[clap(short, long)]
    pub window_minutes: Option<i64>,

    /// Map zoom level used for spreading and clustering
    #[clap(short, long, default_value = "5.0")]
    pub zoom: f64,

    /// Zoom level from which co-located sessions are spread apart
    #[clap(long, default_value = "10.0")]
    pub spread_start_zoom: f64,

    /// Active session count above which markers are clustered
    #[clap(long, default_value = "500")]
    pub cluster_threshold: usize,

    /// Place the playback cursor at this time instead of the first window
    #[clap(long, value_name = "TIMESTAMP")]
    pub at: Option<String>,

    /// Auto-play through every window from the cursor on
    #[clap(long, default_value = "false")]
    pub play: bool,

    /// Print a JSON snapshot instead of the text report
    #[clap(long, default_value = "false")]
    pub json: bool,
}

impl Settings {
    /// Parse the process arguments, exiting with usage on error
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// The viewer's timezone
    pub fn zone(&self) -> Result<FixedOffset, CliError> {
        match self.utc_offset_minutes {
            Some(minutes) => minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or(CliError::InvalidOffset(minutes)),
            None => Ok(Local::now().offset().fix()),
        }
    }

    /// Provider query built from the paging and filter flags
    pub fn query(&self, zone: &FixedOffset) -> Result<SessionQuery, CliError> {
        let filters = self
            .filter
            .iter()
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(CliError::InvalidFilter(pair.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SessionQuery {
            from: parse_optional(self.from.as_deref(), zone)?,
            to: parse_optional(self.to.as_deref(), zone)?,
            page_size: self.page_size,
            filters,
        })
    }

    pub fn timeline_config(&self) -> TimelineConfig {
        TimelineConfig {
            clustering: ClusterConfig {
                threshold: self.cluster_threshold,
                ..Default::default()
            },
            spread_start_zoom: self.spread_start_zoom,
            ..Default::default()
        }
    }

    /// Requested cursor position, if any
    pub fn cursor_time(&self, zone: &FixedOffset) -> Result<Option<DateTime<FixedOffset>>, CliError> {
        parse_optional(self.at.as_deref(), zone)
    }
}

fn parse_optional(
    text: Option<&str>,
    zone: &FixedOffset,
) -> Result<Option<DateTime<FixedOffset>>, CliError> {
    text.map(|text| {
        parse_timestamp(text, zone).ok_or_else(|| CliError::InvalidTimestamp(text.to_string()))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Settings {
        let mut argv = vec!["session-timeline", "--sessions", "sessions.json"];
        argv.extend_from_slice(args);
        Settings::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = parse(&[]);
        assert_eq!(settings.page_size, 1000);
        assert_eq!(settings.max_pages, 10);
        assert_eq!(settings.zoom, 5.0);
        assert!(!settings.play);
        assert!(settings.window_minutes.is_none());

        let config = settings.timeline_config();
        assert_eq!(config.clustering.threshold, 500);
        assert_eq!(config.spread_start_zoom, 10.0);
    }

    #[test]
    fn test_negative_offset() {
        let settings = parse(&["--utc-offset-minutes", "-300"]);
        assert_eq!(settings.zone().unwrap().local_minus_utc(), -300 * 60);

        let settings = parse(&["--utc-offset-minutes", "100000"]);
        assert!(matches!(settings.zone(), Err(CliError::InvalidOffset(100000))));
    }

    #[test]
    fn test_query_filters() {
        let settings = parse(&["--filter", "country=ES", "--filter", "browser=Firefox", "--page-size", "50"]);
        let zone = FixedOffset::east_opt(0).unwrap();
        let query = settings.query(&zone).unwrap();
        assert_eq!(query.page_size, 50);
        assert_eq!(
            query.filters,
            vec![
                ("country".to_string(), "ES".to_string()),
                ("browser".to_string(), "Firefox".to_string())
            ]
        );

        let settings = parse(&["--filter", "no-equals-sign"]);
        assert!(matches!(settings.query(&zone), Err(CliError::InvalidFilter(_))));
    }

    #[test]
    fn test_cursor_time() {
        let zone = FixedOffset::east_opt(3600).unwrap();
        let settings = parse(&["--at", "2024-03-01 10:00:00"]);
        let at = settings.cursor_time(&zone).unwrap().unwrap();
        assert_eq!(at.to_rfc3339(), "2024-03-01T11:00:00+01:00");

        let settings = parse(&["--at", "noon"]);
        assert!(matches!(settings.cursor_time(&zone), Err(CliError::InvalidTimestamp(_))));
    }
}
