use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use frame_trap::api::{self, ApiContext};
use frame_trap::config::Config;
use frame_trap::db::CaptureDb;
use frame_trap::frame::Frame;
use frame_trap::hotspot::HotSpotSet;
use frame_trap::pipeline::{control_channel, CapturePipeline, Command};
use frame_trap::session::CaptureSession;
use frame_trap::source::{spawn_acquisition, FrameSource, MjpegSource, SnapshotSource, SourceError};
use frame_trap::store::{ArtifactKind, ArtifactStore};
use frame_trap::video::{check_ffmpeg_available, FfmpegSink};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        url = config.source.url,
        mode = config.source.mode,
        width = config.source.width,
        height = config.source.height,
        buffer_frames = config.capture.buffer_frames,
        post_frames = config.capture.post_frames(),
        sensitivity = config.detector.sensitivity,
        output = config.capture.output,
        data_dir = config.capture.data_dir,
        "starting frame-trap"
    );

    let kind = match config.capture.output.as_str() {
        "video" => ArtifactKind::Video,
        "images" => ArtifactKind::ImageSequence,
        other => {
            error!(output = other, "unknown capture output, expected \"video\" or \"images\"");
            std::process::exit(1);
        }
    };

    // Check ffmpeg availability (video encoding will fail without it).
    if kind == ArtifactKind::Video {
        check_ffmpeg_available();
    }

    let store = Arc::new(ArtifactStore::new(&config.capture.data_dir));
    if let Err(e) = store.ensure_root() {
        error!(error = %e, "failed to create data directory");
        std::process::exit(1);
    }

    // Open the capture index next to the artifacts.
    let db = match CaptureDb::open(Path::new(&config.capture.data_dir)) {
        Ok(d) => Some(Arc::new(d)),
        Err(e) => {
            error!(error = %e, "failed to open capture index; captures will not be recorded");
            None
        }
    };

    // Hotspots persist across restarts; a missing file just means none yet.
    let hotspots_path = PathBuf::from(&config.detector.hotspots_file);
    let hotspots = if hotspots_path.exists() {
        match HotSpotSet::load(&hotspots_path) {
            Ok(set) => {
                info!(
                    path = hotspots_path.display().to_string(),
                    count = set.len(),
                    "hotspots loaded"
                );
                set
            }
            Err(e) => {
                warn!(error = %e, "failed to read hotspots file, starting with none");
                HotSpotSet::new()
            }
        }
    } else {
        HotSpotSet::new()
    };

    let connect_timeout = Duration::from_secs(config.source.connect_timeout_secs);
    let source: Box<dyn FrameSource> = match config.source.mode.as_str() {
        "mjpeg" => Box::new(MjpegSource::new(
            config.source.url.clone(),
            config.source.width,
            config.source.height,
            config.source.bottom_up,
            connect_timeout,
        )),
        "poll" | "snapshot" => Box::new(SnapshotSource::new(
            config.source.url.clone(),
            config.source.width,
            config.source.height,
            config.source.bottom_up,
            Duration::from_millis(config.source.poll_interval_ms),
            connect_timeout,
        )),
        other => {
            error!(mode = other, "unknown source mode, expected \"mjpeg\" or \"poll\"");
            std::process::exit(1);
        }
    };

    // The thread is not joined at shutdown: it may be sleeping through a
    // reconnect backoff, and exits on its own once the channel closes.
    let (frame_rx, _acquisition) = spawn_acquisition(source);

    let (pipeline_handle, command_rx) = control_channel();
    let pipeline = CapturePipeline::new(
        config.capture.buffer_frames,
        config.capture.post_frames(),
        config.detector.sensitivity,
        hotspots,
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    if config.api.enabled {
        let ctx = ApiContext {
            pipeline: pipeline_handle.clone(),
            db: db.clone(),
        };
        let app = api::router(ctx);
        let addr = format!("0.0.0.0:{}", config.api.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
            eprintln!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        });
        info!(%addr, "control API listening");

        let token = shutdown.clone();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned());
            if let Err(e) = serve.await {
                error!(error = %e, "API server error");
            }
        });
    }

    let ctx = WriterContext {
        store,
        sink: Arc::new(FfmpegSink::new(
            config.video.codec.clone(),
            config.video.quality,
        )),
        kind,
        db,
        flush_on_shutdown: config.capture.flush_on_shutdown,
    };

    info!("entering capture loop");
    run_capture_loop(pipeline, frame_rx, command_rx, hotspots_path, ctx, shutdown).await;
    info!("shutdown complete");
}

/// Everything a writer task needs to persist one completed capture.
#[derive(Clone)]
struct WriterContext {
    store: Arc<ArtifactStore>,
    sink: Arc<FfmpegSink>,
    kind: ArtifactKind,
    db: Option<Arc<CaptureDb>>,
    flush_on_shutdown: bool,
}

async fn run_capture_loop(
    mut pipeline: CapturePipeline,
    mut frames: mpsc::Receiver<Result<Frame, SourceError>>,
    mut commands: mpsc::Receiver<Command>,
    hotspots_path: PathBuf,
    ctx: WriterContext,
    shutdown: CancellationToken,
) {
    let mut writers: JoinSet<()> = JoinSet::new();
    let mut skipped: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            Some(command) = commands.recv() => {
                let effects = pipeline.apply_command(command);
                if effects.hotspots_changed {
                    save_hotspots(&pipeline, &hotspots_path);
                }
                if let Some(done) = effects.completed {
                    spawn_writer(&mut writers, done, ctx.clone());
                }
            }

            item = frames.recv() => match item {
                None => {
                    warn!("acquisition channel closed");
                    break;
                }
                Some(Err(e)) => {
                    skipped += 1;
                    debug!(error = %e, skipped, "skipping failed frame");
                }
                Some(Ok(frame)) => {
                    if let Some(done) = pipeline.tick(frame) {
                        spawn_writer(&mut writers, done, ctx.clone());
                    }
                }
            },

            Some(result) = writers.join_next(), if !writers.is_empty() => {
                if let Err(e) = result {
                    error!(error = %e, "capture writer panicked");
                }
            }
        }
    }

    // Finish or drop the active capture, then wait for in-flight writers.
    if let Some(done) = pipeline.shutdown(ctx.flush_on_shutdown) {
        info!(
            frames = done.frame_count(),
            "flushing capture cut short by shutdown"
        );
        spawn_writer(&mut writers, done, ctx.clone());
    }
    while let Some(result) = writers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "capture writer panicked");
        }
    }
}

fn spawn_writer(writers: &mut JoinSet<()>, done: CaptureSession, ctx: WriterContext) {
    writers.spawn_blocking(move || persist_capture(done, &ctx));
}

/// Write one completed capture to disk and record it in the index.
/// Failures are logged and the frames dropped; the pipeline has already
/// returned to idle and keeps running.
fn persist_capture(mut done: CaptureSession, ctx: &WriterContext) {
    let frames = done.frame_count();
    let fps = done.fps();
    let started_at = done.started_at();

    let result = match ctx.kind {
        ArtifactKind::Video => done.finalize_as_video(&ctx.store, ctx.sink.as_ref()),
        ArtifactKind::ImageSequence => done.finalize_as_images(&ctx.store),
    };

    match result {
        Ok(dir) => {
            info!(
                dir = dir.display().to_string(),
                frames,
                fps,
                kind = ctx.kind.as_str(),
                "capture persisted"
            );
            if let (Some(db), Some(started_at)) = (&ctx.db, started_at) {
                if let Err(e) = db.insert_capture(
                    started_at.timestamp_millis(),
                    &dir.display().to_string(),
                    ctx.kind,
                    frames,
                    fps,
                ) {
                    error!(error = %e, "failed to record capture in index");
                }
            }
        }
        Err(e) => {
            error!(error = %e, frames, "failed to persist capture");
        }
    }
}

fn save_hotspots(pipeline: &CapturePipeline, path: &Path) {
    match pipeline.hotspots().save(path) {
        Ok(()) => debug!(
            path = path.display().to_string(),
            count = pipeline.hotspots().len(),
            "hotspots saved"
        ),
        Err(e) => error!(error = %e, "failed to save hotspots"),
    }
}
