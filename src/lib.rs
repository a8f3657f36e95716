//! Thermal camera classification pipeline.
//!
//! Frames from a Lepton thermal camera arrive over a local socket. Movement
//! starts a recording session; warm objects in the session are followed as
//! tracks and classified on a fixed cadence; per-track predictions are
//! smoothed over time; when the session ends every track gets a verdict and
//! the session gets a ranked list of labels before it is stored.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames, telemetry and the look-back window
//! - `ingest`: message codec, socket, replay and synthetic sources, connection loop
//! - `motion`, `tracking`, `classify`: collaborator seams with reference implementations
//! - `predict`: per-track prediction smoothing
//! - `session`: recording sessions and label ranking
//! - `recorder`: the recording state machine
//! - `storage`: session persistence
//! - `config`: daemon configuration

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod classify;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod predict;
pub mod recorder;
pub mod session;
pub mod storage;
pub mod track;
pub mod tracking;

pub use classify::{Classification, Classifier, ClassifierMemory, Sample, StubClassifier};
pub use config::DaemonConfig;
pub use error::{PipelineError, PipelineResult};
pub use frame::{Frame, FrameWindow, Telemetry};
pub use ingest::{run_connection, ConnectionEnd, ConnectionStats, FrameDecoder, MessageSource, ReplaySource};
pub use motion::{DeltaMotionDetector, MotionDetector, MotionSettings};
pub use predict::{PredictionSmoother, TrackPredictionState};
pub use recorder::{FrameOutcome, RecorderSettings, RecorderState, RecordingStateMachine};
pub use session::{rank_labels, FinishedSession, LabelScore, Session, StopReason};
pub use storage::{InMemorySessionStore, SessionStore, SqliteSessionStore};
pub use track::{Rect, Region, Track, TrackId, TrackResult, TrackSet};
pub use tracking::{HotspotTrackExtractor, TrackExtractor, TrackingSettings};

/// Private in-memory database URI, shared across connections opened with it.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:thermal_sessions_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

/// Wall-clock milliseconds since the Unix epoch; 0 if the clock is before it.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
