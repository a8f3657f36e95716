//! Recording state machine.
//!
//! `Idle` until the motion detector reports movement, then `Recording` a
//! single `Session` until motion stops after the grace period or the frame
//! cap is reached. Identification runs per active track on a fixed cadence
//! and finished sessions are handed to the store.

use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;

use crate::classify::Classifier;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::motion::MotionDetector;
use crate::predict::{PredictionSmoother, TrackPredictionState};
use crate::session::{FinishedSession, Session, StopReason};
use crate::storage::SessionStore;
use crate::track::TrackId;
use crate::tracking::TrackExtractor;

/// Frame counts are already multiplied out from seconds by the frame rate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecorderSettings {
    pub width: u32,
    pub height: u32,
    /// Length of the pre-trigger runway.
    pub preview_frames: u32,
    /// Grace period: motion is ignored until a session has processed more
    /// frames than this.
    pub min_frames: u32,
    /// Hard cap on a session's length.
    pub max_frames: u32,
    /// Identify on every frame whose index is a multiple of this.
    pub identify_every: u32,
    pub uniform_prior: bool,
    /// Keep the per-frame prediction history on finished tracks.
    pub per_track_detail: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

#[derive(Debug)]
pub enum FrameOutcome {
    /// No session running and no movement.
    Idle,
    /// Movement started a session; the runway was fed from the look-back window.
    Started { session_id: String, runway_frames: u32 },
    /// Frame fed to the running session.
    Recorded { frame_index: u32, identified: usize },
    /// Partial frame; counted but neither tracked nor used for motion.
    Skipped,
    Finished(Box<FinishedSession>),
}

pub struct RecordingStateMachine<M, E, C, S>
where
    M: MotionDetector,
    E: TrackExtractor,
    C: Classifier + ?Sized,
    S: SessionStore,
{
    settings: RecorderSettings,
    motion: M,
    extractor: E,
    classifier: Arc<C>,
    store: S,
    smoother: PredictionSmoother,
    session: Option<Session>,
    predictions: HashMap<TrackId, TrackPredictionState>,
    frames_seen: u64,
}

impl<M, E, C, S> RecordingStateMachine<M, E, C, S>
where
    M: MotionDetector,
    E: TrackExtractor,
    C: Classifier + ?Sized,
    S: SessionStore,
{
    pub fn new(settings: RecorderSettings, motion: M, extractor: E, classifier: Arc<C>, store: S) -> Self {
        let smoother = PredictionSmoother::new(classifier.labels(), settings.uniform_prior);
        Self {
            settings,
            motion,
            extractor,
            classifier,
            store,
            smoother,
            session: None,
            predictions: HashMap::new(),
            frames_seen: 0,
        }
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn state(&self) -> RecorderState {
        if self.session.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Frames handed to `process_frame` over the recorder's lifetime.
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn prediction(&self, track_id: TrackId) -> Option<&TrackPredictionState> {
        self.predictions.get(&track_id)
    }

    pub fn motion(&self) -> &M {
        &self.motion
    }

    pub fn motion_mut(&mut self) -> &mut M {
        &mut self.motion
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn labels(&self) -> &[String] {
        self.smoother.labels()
    }

    /// Advance the state machine by one frame. Not reentrant.
    pub fn process_frame(&mut self, frame: Arc<Frame>) -> FrameOutcome {
        self.frames_seen += 1;
        self.motion.process_frame(Arc::clone(&frame));
        if frame.is_partial() {
            log::debug!(
                "skipping partial frame ({} of {} samples)",
                frame.decoded_samples(),
                frame.samples().len()
            );
            return FrameOutcome::Skipped;
        }

        let movement = self.motion.movement_detected();
        if self.session.is_none() {
            return if movement {
                self.start_session()
            } else {
                FrameOutcome::Idle
            };
        }
        let Some(session) = self.session.as_mut() else {
            return FrameOutcome::Idle;
        };

        if !session.in_grace_period() && !movement {
            return self.finish(StopReason::MotionStopped);
        }

        let frame_index = session.feed(&mut self.extractor, &frame);
        let identified = if should_identify(&self.settings, session, frame_index) {
            identify_tracks(
                &self.smoother,
                self.classifier.as_ref(),
                &mut self.predictions,
                session,
                &frame,
                frame_index,
            )
        } else {
            0
        };

        if session.at_frame_cap() {
            return self.finish(StopReason::MaxFrames);
        }
        FrameOutcome::Recorded {
            frame_index,
            identified,
        }
    }

    /// Drop the running session without persisting it. Returns its id.
    pub fn abandon(&mut self) -> Option<String> {
        let session = self.session.take()?;
        self.predictions.clear();
        self.motion.stop_recording();
        log::warn!(
            "session {} abandoned after {} frames",
            session.id(),
            session.frames_processed()
        );
        Some(session.id().to_string())
    }

    /// End of a frame stream: abandon any running session and clear the
    /// motion look-back so the next stream starts cold.
    pub fn reset(&mut self) -> Option<String> {
        let abandoned = self.abandon();
        self.motion.reset();
        abandoned
    }

    fn start_session(&mut self) -> FrameOutcome {
        let mut session = Session::new(
            new_session_id(),
            crate::now_ms(),
            self.settings.width,
            self.settings.height,
            self.settings.min_frames,
            self.settings.max_frames,
        );
        self.predictions.clear();
        self.extractor.start_session();
        self.motion.start_recording();

        let preroll = self.motion.preroll();
        let skip = preroll.len().saturating_sub(self.settings.preview_frames as usize);
        for frame in preroll.iter().skip(skip) {
            session.feed_runway(&mut self.extractor, frame);
        }

        let session_id = session.id().to_string();
        let runway_frames = session.runway_frames();
        log::info!("session {} started with {} runway frames", session_id, runway_frames);
        self.session = Some(session);
        FrameOutcome::Started {
            session_id,
            runway_frames,
        }
    }

    fn finish(&mut self, reason: StopReason) -> FrameOutcome {
        let Some(mut session) = self.session.take() else {
            return FrameOutcome::Idle;
        };

        let labels = self.smoother.labels();
        for track in session.tracks_mut().iter_mut() {
            if let Some(state) = self.predictions.get(&track.id()) {
                track.result = Some(state.finalize(labels));
                if self.settings.per_track_detail {
                    track.history = Some(state.history());
                }
            }
        }
        self.predictions.clear();

        let finished = session.finish(reason, crate::now_ms(), labels);
        log::info!(
            "session {} finished ({:?}): {} frames, {} tracks, top label {}",
            finished.id,
            finished.stop_reason,
            finished.frames_processed,
            finished.tracks.len(),
            finished
                .top_label()
                .map(|l| format!("{} ({:.2})", l.label, l.score))
                .unwrap_or_else(|| "none".to_string())
        );
        if let Err(e) = self.store.save_session(&finished) {
            log::error!("failed to store session {}: {:#}", finished.id, e);
        }
        self.motion.stop_recording();
        FrameOutcome::Finished(Box::new(finished))
    }
}

/// The first live frame is always identified, even when motion fired before
/// the look-back window filled and the runway came up short.
fn should_identify(settings: &RecorderSettings, session: &Session, frame_index: u32) -> bool {
    session.tracks().has_active()
        && (frame_index % settings.identify_every.max(1) == 0 || frame_index == session.runway_frames())
}

fn identify_tracks<C: Classifier + ?Sized>(
    smoother: &PredictionSmoother,
    classifier: &C,
    predictions: &mut HashMap<TrackId, TrackPredictionState>,
    session: &Session,
    frame: &Frame,
    frame_index: u32,
) -> usize {
    let thermal_reference = frame.median();
    let mut identified = 0;
    for track in session.tracks().active() {
        let state = predictions
            .entry(track.id())
            .or_insert_with(|| smoother.new_state(track.id()));
        match smoother.identify(classifier, frame, frame_index, thermal_reference, track, state) {
            Ok(()) => identified += 1,
            Err(e @ PipelineError::DecodeAnomaly { .. }) => {
                log::warn!("session {}: {}", session.id(), e)
            }
            Err(e) => log::info!("session {}: {}", session.id(), e),
        }
    }
    identified
}

fn new_session_id() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{:x}-{}", crate::now_ms(), hex::encode(bytes))
}
