// src/main.rs

mod analysis;
mod config;
mod interface;
mod opencv_matcher;
mod output;
mod pipeline;
mod types;
mod video_processor;

use analysis::{ImageMatcher, NativeMatcher};
use anyhow::Result;
use interface::{Command, ControlSource, HeadlessControls, PreviewControls};
use opencv_matcher::OpenCvMatcher;
use output::{
    composite_path_for, open_sink, report_path_for, save_composite, write_report,
    PublishSchedule, ScanReport, SpeedSink,
};
use pipeline::{event_bus::log_event, MetricsSummary, ScanSession};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use types::{Config, MatcherKind};
use video_processor::{
    draw_scan_overlay, CompositePreview, VideoProcessor, VideoReader, VideoSource,
};

/// How a single source run ended
struct RunStats {
    total_frames: u64,
    composite_width: usize,
    composite_path: Option<PathBuf>,
    summary: MetricsSummary,
    quit_requested: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    // Logs go to stderr; stdout may carry the speed stream.
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "slitscan_speed={},opencv=warn",
            config.logging.level
        ))
        .with_writer(std::io::stderr)
        .init();

    info!("📏 Slit-scan speedometer starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "  Calibration: {} px/m, threshold {} km/h, {} px per slice",
        config.calibration.pixels_per_meter,
        config.calibration.speed_threshold_kmh,
        config.calibration.capture_distance_px
    );

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, finishing up");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let mut matcher: Box<dyn ImageMatcher> = match config.tracking.matcher {
        MatcherKind::Opencv => Box::new(OpenCvMatcher::new()),
        MatcherKind::Native => Box::new(NativeMatcher::new()),
    };
    info!("✓ Matcher: {}", matcher.name());

    let mut sink = open_sink(&config.output, &stop)?;

    let mut controls: Box<dyn ControlSource> = if config.video.show_preview {
        Box::new(PreviewControls::new(stop.clone())?)
    } else {
        Box::new(HeadlessControls::new(stop.clone()))
    };

    let processor = VideoProcessor::new(config.clone());
    let sources = processor.resolve_sources()?;
    if sources.is_empty() {
        error!("No video sources found for {}", config.video.source);
        return Ok(());
    }
    info!("Found {} source(s) to process", sources.len());

    for (idx, source) in sources.iter().enumerate() {
        info!("\n========================================");
        info!(
            "Processing source {}/{}: {}",
            idx + 1,
            sources.len(),
            source.describe()
        );
        info!("========================================\n");

        match process_source(
            &config,
            &processor,
            source,
            matcher.as_mut(),
            sink.as_mut(),
            controls.as_mut(),
        )
        .await
        {
            Ok(stats) => {
                info!("\n✓ Source processed");
                info!("  Total frames: {}", stats.total_frames);
                info!("  Frames tracked: {}", stats.summary.tracked_frames);
                info!("  Acquisitions: {}", stats.summary.acquisitions);
                info!("  Losses: {}", stats.summary.losses);
                info!("  Periodic resets: {}", stats.summary.periodic_resets);
                info!("  Slices captured: {}", stats.summary.slices_captured);
                info!("  Composite width: {} px", stats.composite_width);
                if let Some(path) = &stats.composite_path {
                    info!("  Composite: {}", path.display());
                }
                info!("  Processing Speed: {:.1} FPS", stats.summary.fps);

                if stats.quit_requested {
                    info!("Quit requested, skipping remaining sources");
                    break;
                }
            }
            Err(e) => {
                error!("Failed to process {}: {:#}", source.describe(), e);
            }
        }
    }

    info!("Done");
    Ok(())
}

/// Per-source loop state that outlives a failed frame
#[derive(Default)]
struct RunState {
    frame_count: u64,
    last_ts: f64,
    quit_requested: bool,
    saved_path: Option<PathBuf>,
}

async fn process_source(
    config: &Config,
    processor: &VideoProcessor,
    source: &VideoSource,
    matcher: &mut dyn ImageMatcher,
    sink: &mut dyn SpeedSink,
    controls: &mut dyn ControlSource,
) -> Result<RunStats> {
    let mut reader = processor.open(source)?;
    let mut session = ScanSession::new(config, 0.0);
    let mut state = RunState::default();

    if config.scan.start_active || !config.video.show_preview {
        session.set_scan_active(true, 0.0);
    }

    let outcome = run_frames(
        config,
        source,
        &mut reader,
        &mut session,
        matcher,
        sink,
        controls,
        &mut state,
    )
    .await;

    finish_run(config, source, &session, sink, state, outcome)
}

#[allow(clippy::too_many_arguments)]
async fn run_frames(
    config: &Config,
    source: &VideoSource,
    reader: &mut VideoReader,
    session: &mut ScanSession,
    matcher: &mut dyn ImageMatcher,
    sink: &mut dyn SpeedSink,
    controls: &mut dyn ControlSource,
    state: &mut RunState,
) -> Result<()> {
    let mut schedule = PublishSchedule::new(config.output.publish_interval_ms);
    let mut preview = CompositePreview::new();

    let mut ticker = if config.video.target_fps > 0 {
        let mut t = tokio::time::interval(Duration::from_secs_f64(
            1.0 / config.video.target_fps as f64,
        ));
        t.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Some(t)
    } else {
        None
    };

    let start_time = Instant::now();

    while let Some(frame) = reader.read_frame()? {
        if let Some(t) = ticker.as_mut() {
            t.tick().await;
        }

        state.frame_count += 1;
        state.last_ts = frame.timestamp_ms;
        let frame_start = Instant::now();

        let outcome = session.process_frame(&frame, matcher)?;

        for event in session.drain_events() {
            log_event(&event);
        }

        if let Some(shown) = outcome.display_refreshed {
            if outcome.scan_active {
                info!(
                    "Speed {:.2} km/h ({}) | composite {} px",
                    shown,
                    outcome.state.as_str(),
                    session.composite().map_or(0, |c| c.width())
                );
            }
        }

        if schedule.due(frame.timestamp_ms) {
            sink.publish(session.published_speed_kmh(config.output.published_value))?;
            let metrics = session.metrics();
            metrics.inc(&metrics.publishes);
        }

        if config.video.show_preview {
            let live = draw_scan_overlay(&frame, session)?;
            let slices_total = session.metrics().slices_captured.load(Ordering::Relaxed);
            let composite =
                preview.render(session.composite(), slices_total, frame.height as i32)?;
            controls.present(&live, composite)?;
        }

        let metrics = session.metrics();
        metrics.set_timing(
            &metrics.frame_time_us,
            frame_start.elapsed().as_micros() as u64,
        );

        for command in controls.poll()? {
            apply_command(config, source, session, state, command, frame.timestamp_ms);
        }
        for event in session.drain_events() {
            log_event(&event);
        }

        if state.quit_requested {
            break;
        }

        if !reader.is_live() && state.frame_count % 300 == 0 {
            info!(
                "Progress: {:.1}% ({} frames, {:.1} FPS)",
                reader.progress(),
                state.frame_count,
                state.frame_count as f64 / start_time.elapsed().as_secs_f64()
            );
        }
    }

    Ok(())
}

/// Operator command. A failed save is reported and the run goes on.
fn apply_command(
    config: &Config,
    source: &VideoSource,
    session: &mut ScanSession,
    state: &mut RunState,
    command: Command,
    now_ms: f64,
) {
    match command {
        Command::ToggleScan => session.toggle_scan(now_ms),
        Command::ClearResult => session.clear_result(),
        Command::SaveResult => match session.composite() {
            Some(composite) => {
                let path = composite_path_for(config, source.path());
                match save_composite(composite, &path) {
                    Ok(()) => state.saved_path = Some(path),
                    Err(e) => warn!("Save failed, scan kept in memory: {:#}", e),
                }
            }
            None => info!("Nothing to save yet"),
        },
        Command::Quit => state.quit_requested = true,
    }
}

/// Always runs after the frame loop, whether it ended cleanly or not. The
/// loop error, if any, is returned after the composite and report are out.
fn finish_run(
    config: &Config,
    source: &VideoSource,
    session: &ScanSession,
    sink: &mut dyn SpeedSink,
    state: RunState,
    outcome: Result<()>,
) -> Result<RunStats> {
    // Readout drops to zero once the stream is gone
    if let Err(e) = sink.publish(0.0) {
        warn!("Final zero not published: {:#}", e);
    }
    match &outcome {
        Ok(()) => info!("Stream ended at {:.0}ms", state.last_ts),
        Err(e) => error!("Stream stopped at {:.0}ms: {:#}", state.last_ts, e),
    }

    let composite_path = finalize(config, source, session, state.saved_path)?;
    outcome?;

    Ok(RunStats {
        total_frames: state.frame_count,
        composite_width: session.composite().map_or(0, |c| c.width()),
        composite_path,
        summary: session.metrics().summary(),
        quit_requested: state.quit_requested,
    })
}

/// Save the composite (if any) and the run report next to it
fn finalize(
    config: &Config,
    source: &VideoSource,
    session: &ScanSession,
    saved_path: Option<PathBuf>,
) -> Result<Option<PathBuf>> {
    let composite_path = match session.composite() {
        Some(composite) => {
            let path = saved_path.unwrap_or_else(|| composite_path_for(config, source.path()));
            save_composite(composite, &path)?;
            Some(path)
        }
        None => {
            warn!("No slices captured, composite not written");
            None
        }
    };

    let report_path = report_path_for(
        &composite_path
            .clone()
            .unwrap_or_else(|| composite_path_for(config, source.path())),
    );
    let summary = session.metrics().summary();
    let report = ScanReport {
        source: source.describe(),
        composite: composite_path.as_ref().map(|p| p.display().to_string()),
        composite_width: session.composite().map_or(0, |c| c.width()),
        final_speed_kmh: session.displayed_speed_kmh(),
        metrics: &summary,
    };
    write_report(&report_path, &report)?;

    Ok(composite_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::correlation::tests::textured_frame;

    #[derive(Default)]
    struct RecordingSink {
        values: Vec<f64>,
    }

    impl SpeedSink for RecordingSink {
        fn publish(&mut self, speed_kmh: f64) -> Result<()> {
            self.values.push(speed_kmh);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("slitscan_main_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn scanned_session(config: &Config) -> ScanSession {
        let mut session = ScanSession::new(config, 0.0);
        session.set_scan_active(true, 0.0);
        let mut matcher = NativeMatcher::new();
        for i in 0..6 {
            session
                .process_frame(&textured_frame(80, 30, 2 * i, 40.0 * i as f64), &mut matcher)
                .unwrap();
        }
        assert_eq!(session.composite().unwrap().width(), 10);
        session
    }

    fn test_config(output_dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.tracking.box_size = 10;
        config.tracking.search_margin_px = 4;
        config.video.output_dir = output_dir.to_string_lossy().to_string();
        config
    }

    #[test]
    fn test_stream_error_still_writes_composite_and_report() {
        let dir = scratch_dir("err");
        let config = test_config(&dir);
        let session = scanned_session(&config);
        let source = VideoSource::File(PathBuf::from("/videos/belt.mp4"));
        let mut sink = RecordingSink::default();
        let state = RunState {
            frame_count: 6,
            last_ts: 200.0,
            ..Default::default()
        };

        let result = finish_run(
            &config,
            &source,
            &session,
            &mut sink,
            state,
            Err(anyhow::anyhow!("camera unplugged")),
        );

        let err = result.err().unwrap();
        assert!(format!("{:#}", err).contains("camera unplugged"));
        assert!(dir.join("belt_slitscan.png").exists());
        assert!(dir.join("belt_report.json").exists());
        assert_eq!(sink.values, vec![0.0]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_clean_end_reports_stats() {
        let dir = scratch_dir("ok");
        let config = test_config(&dir);
        let session = scanned_session(&config);
        let source = VideoSource::File(PathBuf::from("belt.mp4"));
        let mut sink = RecordingSink::default();
        let state = RunState {
            frame_count: 6,
            quit_requested: true,
            ..Default::default()
        };

        let stats = finish_run(&config, &source, &session, &mut sink, state, Ok(())).unwrap();
        assert_eq!(stats.total_frames, 6);
        assert_eq!(stats.composite_width, 10);
        assert!(stats.quit_requested);
        assert_eq!(stats.composite_path, Some(dir.join("belt_slitscan.png")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failed_save_keeps_the_scan_running() {
        let dir = scratch_dir("save");
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let mut config = test_config(&dir);
        config.output.composite_path =
            Some(blocker.join("scan.png").to_string_lossy().to_string());
        let mut session = scanned_session(&config);
        let source = VideoSource::Camera(0);
        let mut state = RunState::default();

        apply_command(&config, &source, &mut session, &mut state, Command::SaveResult, 240.0);

        assert!(state.saved_path.is_none());
        assert!(!state.quit_requested);
        assert!(session.is_scan_active());
        assert_eq!(session.composite().unwrap().width(), 10);

        apply_command(&config, &source, &mut session, &mut state, Command::Quit, 280.0);
        assert!(state.quit_requested);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
