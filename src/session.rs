//! Recording sessions and whole-session label ranking.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::frame::Frame;
use crate::track::{Track, TrackSet};
use crate::tracking::TrackExtractor;

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Motion stopped after the grace period.
    MotionStopped,
    /// The hard frame cap was reached. A normal finish, not an error.
    MaxFrames,
}

/// One contiguous recording episode. Owned by the recorder while active.
#[derive(Debug)]
pub struct Session {
    id: String,
    started_at_ms: u64,
    width: u32,
    height: u32,
    frames_processed: u32,
    runway_frames: u32,
    min_frames: u32,
    max_frames: u32,
    tracks: TrackSet,
}

impl Session {
    pub fn new(
        id: String,
        started_at_ms: u64,
        width: u32,
        height: u32,
        min_frames: u32,
        max_frames: u32,
    ) -> Self {
        Self {
            id,
            started_at_ms,
            width,
            height,
            frames_processed: 0,
            runway_frames: 0,
            min_frames,
            max_frames,
            tracks: TrackSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn frames_processed(&self) -> u32 {
        self.frames_processed
    }

    /// Frames fed from the pre-trigger look-back before live frames.
    pub fn runway_frames(&self) -> u32 {
        self.runway_frames
    }

    pub fn min_frames(&self) -> u32 {
        self.min_frames
    }

    pub fn max_frames(&self) -> u32 {
        self.max_frames
    }

    pub fn in_grace_period(&self) -> bool {
        self.frames_processed <= self.min_frames
    }

    pub fn at_frame_cap(&self) -> bool {
        self.frames_processed >= self.max_frames
    }

    pub fn tracks(&self) -> &TrackSet {
        &self.tracks
    }

    pub(crate) fn tracks_mut(&mut self) -> &mut TrackSet {
        &mut self.tracks
    }

    /// Run the extractor over `frame` and count it. Returns the frame's index
    /// within the session.
    pub(crate) fn feed<E: TrackExtractor + ?Sized>(&mut self, extractor: &mut E, frame: &Frame) -> u32 {
        let index = self.frames_processed;
        if let Err(e) = extractor.process_frame(&mut self.tracks, frame, index) {
            log::warn!("session {}: track extraction failed on frame {}: {}", self.id, index, e);
        }
        self.frames_processed += 1;
        index
    }

    pub(crate) fn feed_runway<E: TrackExtractor + ?Sized>(&mut self, extractor: &mut E, frame: &Frame) {
        self.feed(extractor, frame);
        self.runway_frames += 1;
    }

    pub(crate) fn finish(self, reason: StopReason, finished_at_ms: u64, labels: &[String]) -> FinishedSession {
        let tracks: Vec<Track> = self.tracks.iter().cloned().collect();
        let ranked_labels = rank_labels(labels, &tracks);
        FinishedSession {
            id: self.id,
            started_at_ms: self.started_at_ms,
            finished_at_ms,
            width: self.width,
            height: self.height,
            frames_processed: self.frames_processed,
            runway_frames: self.runway_frames,
            stop_reason: reason,
            tracks,
            ranked_labels,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

/// A completed session, as handed to the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinishedSession {
    pub id: String,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub width: u32,
    pub height: u32,
    pub frames_processed: u32,
    pub runway_frames: u32,
    pub stop_reason: StopReason,
    pub tracks: Vec<Track>,
    /// Every known label exactly once, best first.
    pub ranked_labels: Vec<LabelScore>,
}

impl FinishedSession {
    pub fn top_label(&self) -> Option<&LabelScore> {
        self.ranked_labels.first().filter(|l| l.score > 0.0)
    }
}

/// Rank every label by the best confidence any track reached for it.
///
/// Labels no track reached score 0. Equal scores keep label declaration
/// order.
pub fn rank_labels(labels: &[String], tracks: &[Track]) -> Vec<LabelScore> {
    let mut class_best_score = vec![0.0f32; labels.len()];
    for result in tracks.iter().filter_map(|t| t.result.as_ref()) {
        for (best, score) in class_best_score.iter_mut().zip(&result.class_best_score) {
            *best = best.max(*score);
        }
    }

    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| {
        class_best_score[b]
            .partial_cmp(&class_best_score[a])
            .unwrap_or(Ordering::Equal)
    });

    order
        .into_iter()
        .map(|i| LabelScore {
            label: labels[i].clone(),
            score: class_best_score[i],
        })
        .collect()
}
