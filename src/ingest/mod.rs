//! Frame ingestion.
//!
//! The camera writes one message per frame onto a message-preserving local
//! socket. This module provides:
//! - the Lepton message codec (`lepton`)
//! - the `SOCK_SEQPACKET` listener and connection (`socket`, Linux only)
//! - an in-memory replay source (`replay`)
//! - a synthetic camera (`synthetic`)
//! - the per-connection loop that drives a recorder (`run_connection`)

pub mod lepton;
pub mod replay;
#[cfg(target_os = "linux")]
pub mod socket;
pub mod synthetic;

use anyhow::Result;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::classify::Classifier;
use crate::motion::MotionDetector;
use crate::recorder::{FrameOutcome, RecordingStateMachine};
use crate::storage::SessionStore;
use crate::tracking::TrackExtractor;

pub use lepton::FrameDecoder;
pub use replay::ReplaySource;
#[cfg(target_os = "linux")]
pub use socket::{SeqPacketConnection, SeqPacketListener};
pub use synthetic::{SyntheticCamera, SyntheticScene};

/// Anything that yields whole camera messages.
pub trait MessageSource {
    /// Receive one message into `buf` and return its length. `Ok(0)` means
    /// the peer disconnected. `WouldBlock`/`TimedOut` mean nothing arrived
    /// before a configured read timeout.
    fn recv_message(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionEnd {
    #[default]
    PeerClosed,
    /// A message too short to hold the telemetry header.
    ShortRead,
    /// The socket failed with something other than a read timeout.
    RecvError,
    Shutdown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub messages: u64,
    pub frames: u64,
    pub partial_frames: u64,
    pub sessions_started: u64,
    pub sessions_finished: u64,
    pub sessions_abandoned: u64,
    pub end: ConnectionEnd,
}

/// Serve one connection until the peer closes, a malformed message arrives,
/// the socket fails or `shutdown` is set.
///
/// A session still running when the loop ends is abandoned, not stored, and
/// the recorder is reset so the next connection starts from an empty
/// motion window.
pub fn run_connection<Src, M, E, C, S>(
    source: &mut Src,
    decoder: &FrameDecoder,
    recorder: &mut RecordingStateMachine<M, E, C, S>,
    shutdown: &AtomicBool,
) -> Result<ConnectionStats>
where
    Src: MessageSource + ?Sized,
    M: MotionDetector,
    E: TrackExtractor,
    C: Classifier + ?Sized,
    S: SessionStore,
{
    let mut buf = vec![0u8; decoder.max_message_bytes()];
    let mut stats = ConnectionStats::default();

    let end = loop {
        if shutdown.load(Ordering::SeqCst) {
            break ConnectionEnd::Shutdown;
        }
        let n = match source.recv_message(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                log::warn!("receive from camera failed: {}", e);
                break ConnectionEnd::RecvError;
            }
        };
        if n == 0 {
            break ConnectionEnd::PeerClosed;
        }
        stats.messages += 1;

        let frame = match decoder.decode(&buf[..n]) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("dropping connection: {}", e);
                break ConnectionEnd::ShortRead;
            }
        };
        stats.frames += 1;
        if frame.is_partial() {
            stats.partial_frames += 1;
        }

        match recorder.process_frame(Arc::new(frame)) {
            FrameOutcome::Started { .. } => stats.sessions_started += 1,
            FrameOutcome::Finished(_) => stats.sessions_finished += 1,
            FrameOutcome::Idle | FrameOutcome::Recorded { .. } | FrameOutcome::Skipped => {}
        }
    };

    if recorder.reset().is_some() {
        stats.sessions_abandoned += 1;
    }
    stats.end = end;
    log::info!(
        "connection ended ({:?}): {} frames, {} sessions finished, {} abandoned",
        stats.end,
        stats.frames,
        stats.sessions_finished,
        stats.sessions_abandoned
    );
    Ok(stats)
}
