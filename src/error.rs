//! Pipeline error taxonomy.
//!
//! None of these are process-fatal. `ShortRead` drops the connection that
//! produced it; the per-track variants skip a single track for a single
//! identification tick and leave the session running.

use thiserror::Error;

use crate::track::TrackId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The socket message is too short to hold the telemetry header.
    #[error("short read: expected at least {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// A track's latest region does not belong to the frame being identified.
    #[error("track {track_id}: region frame {region_frame} does not match frame {frame}")]
    DecodeAnomaly {
        track_id: TrackId,
        region_frame: u32,
        frame: u32,
    },

    /// No usable sample could be cut from the frame for this track.
    #[error("track {track_id}: frame {frame} could not be classified")]
    ClassificationUnavailable { track_id: TrackId, frame: u32 },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
