//! Session Timeline - Command line front end
//!
//! Loads a session export through the paginated fetch layer, builds the playback
//! timeline and prints what a session map would show at the cursor, or steps through
//! every window with auto-play.

pub mod logging;
mod report;
mod settings;
mod source;
mod surface;

pub use settings::Settings;
pub use source::JsonFileSource;
pub use surface::HeadlessSurface;

use chrono::{DateTime, FixedOffset};
use instant::Instant;
use session_timeline_lib::{
    MarkerLayer, PlaybackStore, SessionSource, TimelineError, fetch_sessions,
};
use std::io::Write;

/// Errors reported by the command line tool
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error("Invalid UTC offset: {0} minutes")]
    InvalidOffset(i32),

    #[error("Invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("Invalid filter {0:?} (expected KEY=VALUE)")]
    InvalidFilter(String),

    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the tool against the file named in `settings`, writing to stdout
pub fn run(settings: &Settings) -> Result<(), CliError> {
    let mut source = JsonFileSource::open(&settings.sessions)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    replay(settings, &mut source, &mut out)
}

/// Load from `source` and report on the timeline
pub fn replay<S>(settings: &Settings, source: &mut S, out: &mut impl Write) -> Result<(), CliError>
where
    S: SessionSource + ?Sized,
{
    let zone = settings.zone()?;
    let query = settings.query(&zone)?;
    let outcome = fetch_sessions(source, &query, settings.max_pages, &zone)?;

    let mut store = PlaybackStore::new(settings.timeline_config());
    store.load(outcome);
    store.set_window_size_override(settings.window_minutes)?;
    if let Some(at) = settings.cursor_time(&zone)? {
        store.set_current_time(at);
    }

    let mut surface = HeadlessSurface::new(settings.zoom);
    let mut layer = MarkerLayer::default();

    let result = if settings.play {
        play(&mut store, &mut surface, &mut layer, settings.zoom, out)
    } else {
        snapshot(settings, &mut store, &mut surface, &mut layer, out)
    };

    layer.clear(&mut surface);
    store.reset();
    result
}

fn snapshot(
    settings: &Settings,
    store: &mut PlaybackStore,
    surface: &mut HeadlessSurface,
    layer: &mut MarkerLayer<u64>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let plan = store.render_plan(settings.zoom);
    let sync = layer.sync(surface, &plan);

    if settings.json {
        report::write_json(out, store, &plan)?;
        return Ok(());
    }

    let camera = plan
        .clusters()
        .max_by_key(|cluster| cluster.point_count)
        .map(|cluster| layer.zoom_to_cluster(surface, cluster));

    report::write_summary(out, store)?;
    writeln!(out)?;
    report::write_histogram(out, store)?;
    writeln!(out)?;
    report::write_plan(out, store, &plan, &sync, camera)?;
    Ok(())
}

/// Step through the windows on a simulated clock, one tick at a time
fn play(
    store: &mut PlaybackStore,
    surface: &mut HeadlessSurface,
    layer: &mut MarkerLayer<u64>,
    zoom: f64,
    out: &mut impl Write,
) -> Result<(), CliError> {
    report::write_summary(out, store)?;
    let Some(start) = store.current_time() else {
        return Ok(());
    };

    step(store, surface, layer, zoom, start, out)?;

    let mut now = Instant::now();
    store.play(now);
    while store.is_playing() {
        now += store.config().tick_interval;
        let outcome = store.poll(now);
        if outcome.playback_stopped {
            break;
        }
        if let Some(time) = outcome.cursor {
            step(store, surface, layer, zoom, time, out)?;
        }
    }

    tracing::info!("Playback finished");
    Ok(())
}

fn step(
    store: &mut PlaybackStore,
    surface: &mut HeadlessSurface,
    layer: &mut MarkerLayer<u64>,
    zoom: f64,
    time: DateTime<FixedOffset>,
    out: &mut impl Write,
) -> std::io::Result<()> {
    let plan = store.render_plan(zoom);
    let sync = layer.sync(surface, &plan);
    report::write_frame(out, time, store.active_sessions().len(), &plan, &sync)
}
