//! thermald - thermal camera classification daemon
//!
//! This daemon:
//! 1. Listens on the camera's SEQPACKET socket, one connection at a time
//! 2. Decodes each message into a frame
//! 3. Records a session whenever the motion detector sees movement
//! 4. Classifies tracked objects and smooths their predictions
//! 5. Stores each finished session with its per-track verdicts

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify animals seen by a thermal camera")]
struct Args {
    /// Config file (TOML or JSON).
    #[arg(long, env = "THERMAL_CONFIG")]
    config: Option<PathBuf>,
    /// Camera socket path (overrides config).
    #[arg(long)]
    socket: Option<String>,
    /// Session database path (overrides config).
    #[arg(long)]
    db: Option<String>,
}

#[cfg(target_os = "linux")]
fn main() -> Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use thermal_classifier::ingest::SeqPacketListener;
    use thermal_classifier::{
        run_connection, Classifier, DaemonConfig, DeltaMotionDetector, HotspotTrackExtractor,
        RecordingStateMachine, SqliteSessionStore, StubClassifier,
    };

    const POLL_INTERVAL: Duration = Duration::from_millis(500);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = DaemonConfig::load_from(args.config.as_deref())?;
    if let Some(socket) = args.socket {
        cfg.socket_path = socket;
    }
    if let Some(db) = args.db {
        cfg.db_path = db;
    }

    let classifier = Arc::new(StubClassifier::new(cfg.classify.labels.clone())?);
    if cfg.classify.warm_up {
        classifier.warm_up()?;
        log::info!("classifier {} warmed up", classifier.name());
    }
    log::info!("labels: {}", classifier.labels().join(", "));

    let store = SqliteSessionStore::open(&cfg.db_path)?;
    let mut recorder = RecordingStateMachine::new(
        cfg.recorder_settings(),
        DeltaMotionDetector::new(cfg.motion_settings()),
        HotspotTrackExtractor::new(cfg.tracking_settings()),
        classifier,
        store,
    );
    let decoder = cfg.decoder();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .expect("error setting Ctrl-C handler");
    }

    let listener = SeqPacketListener::bind(&cfg.socket_path)?;
    log::info!(
        "thermald listening on {} ({}x{} @ {} fps, sessions in {})",
        listener.path().display(),
        cfg.camera.res_x,
        cfg.camera.res_y,
        cfg.camera.frame_rate,
        cfg.db_path
    );

    while !shutdown.load(Ordering::SeqCst) {
        let Some(mut conn) = listener.accept_timeout(POLL_INTERVAL)? else {
            continue;
        };
        log::info!("camera connected");
        conn.set_read_timeout(Some(POLL_INTERVAL))?;
        match run_connection(&mut conn, &decoder, &mut recorder, &shutdown) {
            Ok(stats) => log::info!(
                "camera disconnected after {} frames ({} partial)",
                stats.frames,
                stats.partial_frames
            ),
            Err(e) => log::warn!("camera connection failed: {:#}", e),
        }
    }

    log::info!(
        "shutdown signal received after {} frames",
        recorder.frames_seen()
    );
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() -> Result<()> {
    let _ = Args::parse();
    Err(anyhow::anyhow!("thermald requires Linux SEQPACKET sockets"))
}
