//! Text and JSON output
//!
//! Every writer takes `impl Write` so the output can be captured in tests.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use session_timeline_lib::{CameraTarget, PlaybackStore, RenderPlan, SyncReport, TimeRange};
use std::io::{self, Write};

/// Width of the longest histogram bar, in characters
const HISTOGRAM_WIDTH: usize = 40;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Load summary: range, window size and data quality
pub fn write_summary(out: &mut impl Write, store: &PlaybackStore) -> io::Result<()> {
    match store.time_range() {
        Some(range) => writeln!(
            out,
            "Sessions: {} from {} to {}",
            store.sessions().len(),
            range.start.format(TIME_FORMAT),
            range.end.format(TIME_FORMAT)
        )?,
        None => writeln!(out, "Sessions: none")?,
    }
    writeln!(
        out,
        "Windows:  {} of {} min",
        store.time_windows().len(),
        store.window_size().minutes()
    )?;
    if store.rejected_count() > 0 {
        writeln!(out, "Skipped:  {} malformed records", store.rejected_count())?;
    }
    if store.maybe_truncated() {
        writeln!(
            out,
            "WARNING:  the page limit was reached, more sessions may exist (raise --max-pages)"
        )?;
    }
    Ok(())
}

/// Scrubber histogram, one line per window, cursor marked with `>`
pub fn write_histogram(out: &mut impl Write, store: &PlaybackStore) -> io::Result<()> {
    let counts = store.session_counts();
    let peak = counts.iter().copied().max().unwrap_or(0).max(1);
    let cursor = store.current_index();

    for (index, (window, count)) in store.time_windows().iter().zip(counts).enumerate() {
        let bar = "#".repeat(count * HISTOGRAM_WIDTH / peak);
        let mark = if Some(index) == cursor { '>' } else { ' ' };
        writeln!(
            out,
            "{mark} {} | {:<width$} {count}",
            window.format(TIME_FORMAT),
            bar,
            width = HISTOGRAM_WIDTH
        )?;
    }
    Ok(())
}

/// What the map shows at the cursor
pub fn write_plan(
    out: &mut impl Write,
    store: &PlaybackStore,
    plan: &RenderPlan,
    sync: &SyncReport,
    camera: Option<CameraTarget>,
) -> io::Result<()> {
    let Some(cursor) = store.current_time() else {
        return writeln!(out, "No playback position");
    };

    writeln!(
        out,
        "At {}: {} active sessions",
        cursor.format(TIME_FORMAT),
        store.active_sessions().len()
    )?;
    writeln!(
        out,
        "Map at zoom {:.1}: {} markers, {} clusters{}",
        plan.zoom,
        plan.marker_count(),
        plan.cluster_count(),
        if plan.clustering_enabled {
            " (clustered)"
        } else {
            ""
        }
    )?;
    for cluster in plan.clusters() {
        writeln!(
            out,
            "  cluster of {:>5} at ({:.4}, {:.4}) [{:?}]",
            cluster.point_count,
            cluster.centroid.y,
            cluster.centroid.x,
            cluster.tier()
        )?;
    }
    if let Some(target) = camera {
        writeln!(
            out,
            "  largest cluster zooms to {:.2} around ({:.4}, {:.4})",
            target.zoom, target.center.y, target.center.x
        )?;
    }
    writeln!(
        out,
        "Markers: +{} -{} moved {} kept {} failed {}",
        sync.added, sync.removed, sync.moved, sync.unchanged, sync.failed
    )
}

/// One auto-play step
pub fn write_frame(
    out: &mut impl Write,
    time: DateTime<FixedOffset>,
    active: usize,
    plan: &RenderPlan,
    sync: &SyncReport,
) -> io::Result<()> {
    writeln!(
        out,
        "{} | {:>6} active | {:>5} markers {:>3} clusters | +{} -{}",
        time.format(TIME_FORMAT),
        active,
        plan.marker_count(),
        plan.cluster_count(),
        sync.added,
        sync.removed
    )
}

#[derive(Serialize)]
struct WindowCount {
    start: DateTime<FixedOffset>,
    sessions: usize,
}

/// Machine-readable state at the cursor
#[derive(Serialize)]
struct Snapshot<'a> {
    time_range: Option<TimeRange>,
    window_minutes: i64,
    maybe_truncated: bool,
    rejected_records: usize,
    cursor: Option<DateTime<FixedOffset>>,
    histogram: Vec<WindowCount>,
    active_session_ids: Vec<&'a str>,
    render_plan: &'a RenderPlan,
}

pub fn write_json(out: &mut impl Write, store: &PlaybackStore, plan: &RenderPlan) -> io::Result<()> {
    let snapshot = Snapshot {
        time_range: store.time_range(),
        window_minutes: store.window_size().minutes(),
        maybe_truncated: store.maybe_truncated(),
        rejected_records: store.rejected_count(),
        cursor: store.current_time(),
        histogram: store
            .time_windows()
            .iter()
            .zip(store.session_counts())
            .map(|(start, sessions)| WindowCount {
                start: *start,
                sessions: *sessions,
            })
            .collect(),
        active_session_ids: store.active_sessions().iter().map(|s| s.id()).collect(),
        render_plan: plan,
    };
    serde_json::to_writer_pretty(&mut *out, &snapshot)?;
    writeln!(out)
}
