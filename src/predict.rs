//! Per-track online prediction smoothing.
//!
//! Every identification tick feeds one classifier output per active track
//! through `TrackPredictionState::observe`:
//!
//! 1. dampen the "false-positive" class (if the label set has one)
//! 2. decay the classifier memory before storing it
//! 3. weight by region mass and crop state
//! 4. exponentially smooth prediction and novelty
//! 5. log the smoothed values and raise the per-class running maximum
//!
//! `finalize` turns the accumulated state into a `TrackResult`.

use crate::classify::{Classifier, ClassifierMemory};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::track::{PredictionHistory, Region, Track, TrackId, TrackResult};

/// Exponential smoothing factor.
pub const PREDICTION_SMOOTH: f32 = 0.1;
pub const FALSE_POSITIVE_LABEL: &str = "false-positive";
pub const FALSE_POSITIVE_DAMPING: f32 = 0.8;
pub const MEMORY_DECAY: f32 = 0.98;
pub const CROPPED_WEIGHT: f32 = 0.7;
pub const INITIAL_NOVELTY: f32 = 0.5;

const MASS_REFERENCE: f32 = 20.0;
const MASS_FLOOR: f32 = 0.02;

/// `clamp(mass / 20, 0.02, 1.0) ** 0.5`
pub fn mass_weight(mass: f32) -> f32 {
    (mass / MASS_REFERENCE).clamp(MASS_FLOOR, 1.0).sqrt()
}

pub fn cropped_weight(was_cropped: bool) -> f32 {
    if was_cropped {
        CROPPED_WEIGHT
    } else {
        1.0
    }
}

/// Online accumulator for one track. Created on the track's first tick.
#[derive(Clone, Debug)]
pub struct TrackPredictionState {
    track_id: TrackId,
    num_labels: usize,
    uniform_prior: bool,
    memory: ClassifierMemory,
    smooth_prediction: Option<Vec<f32>>,
    smooth_novelty: f32,
    class_best_score: Vec<f32>,
    predictions: Vec<Vec<f32>>,
    novelties: Vec<f32>,
}

impl TrackPredictionState {
    pub fn new(track_id: TrackId, num_labels: usize, uniform_prior: bool) -> Self {
        Self {
            track_id,
            num_labels,
            uniform_prior,
            memory: ClassifierMemory::default(),
            smooth_prediction: None,
            smooth_novelty: INITIAL_NOVELTY,
            class_best_score: vec![0.0; num_labels],
            predictions: Vec::new(),
            novelties: Vec::new(),
        }
    }

    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    pub fn memory(&self) -> &ClassifierMemory {
        &self.memory
    }

    pub fn smooth_prediction(&self) -> Option<&[f32]> {
        self.smooth_prediction.as_deref()
    }

    pub fn smooth_novelty(&self) -> f32 {
        self.smooth_novelty
    }

    pub fn class_best_score(&self) -> &[f32] {
        &self.class_best_score
    }

    pub fn novelties(&self) -> &[f32] {
        &self.novelties
    }

    pub fn ticks(&self) -> usize {
        self.predictions.len()
    }

    /// Fold one raw classifier output into the smoothed state.
    pub fn observe(
        &mut self,
        mut probabilities: Vec<f32>,
        novelty: f32,
        mut memory: ClassifierMemory,
        region: &Region,
        false_positive_index: Option<usize>,
    ) {
        if let Some(index) = false_positive_index {
            if let Some(p) = probabilities.get_mut(index) {
                *p *= FALSE_POSITIVE_DAMPING;
            }
        }

        memory.decay(MEMORY_DECAY);
        self.memory = memory;

        let weight = mass_weight(region.mass) * cropped_weight(region.was_cropped);
        for p in &mut probabilities {
            *p *= weight;
        }

        let smooth = match self.smooth_prediction.take() {
            None => {
                self.smooth_novelty = INITIAL_NOVELTY;
                if self.uniform_prior {
                    vec![1.0 / self.num_labels as f32; self.num_labels]
                } else {
                    probabilities
                }
            }
            Some(mut smooth) => {
                for (s, p) in smooth.iter_mut().zip(&probabilities) {
                    *s = (1.0 - PREDICTION_SMOOTH) * *s + PREDICTION_SMOOTH * p;
                }
                self.smooth_novelty =
                    (1.0 - PREDICTION_SMOOTH) * self.smooth_novelty + PREDICTION_SMOOTH * novelty;
                smooth
            }
        };

        for (best, s) in self.class_best_score.iter_mut().zip(&smooth) {
            *best = best.max(*s);
        }
        self.predictions.push(smooth.clone());
        self.novelties.push(self.smooth_novelty);
        self.smooth_prediction = Some(smooth);
    }

    /// Highest running maximum wins; ties go to the earlier label.
    pub fn finalize(&self, labels: &[String]) -> TrackResult {
        let best = self
            .class_best_score
            .iter()
            .enumerate()
            .fold(None::<(usize, f32)>, |acc, (i, &score)| match acc {
                Some((_, top)) if score <= top => acc,
                _ => Some((i, score)),
            });

        let (label, confidence) = match best {
            Some((i, score)) if !self.predictions.is_empty() => (labels.get(i).cloned(), score),
            _ => (None, 0.0),
        };

        let max_novelty = self.novelties.iter().copied().fold(0.0, f32::max);
        let avg_novelty = if self.novelties.is_empty() {
            0.0
        } else {
            self.novelties.iter().sum::<f32>() / self.novelties.len() as f32
        };

        TrackResult {
            label,
            confidence,
            max_novelty,
            avg_novelty,
            class_best_score: self.class_best_score.clone(),
        }
    }

    pub fn history(&self) -> PredictionHistory {
        PredictionHistory {
            predictions: self.predictions.clone(),
            novelties: self.novelties.clone(),
        }
    }
}

/// Runs the classifier for one track on one frame and folds the result in.
#[derive(Clone, Debug)]
pub struct PredictionSmoother {
    labels: Vec<String>,
    false_positive_index: Option<usize>,
    uniform_prior: bool,
}

impl PredictionSmoother {
    pub fn new(labels: &[String], uniform_prior: bool) -> Self {
        Self {
            labels: labels.to_vec(),
            false_positive_index: labels.iter().position(|l| l == FALSE_POSITIVE_LABEL),
            uniform_prior,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn false_positive_index(&self) -> Option<usize> {
        self.false_positive_index
    }

    pub fn new_state(&self, track_id: TrackId) -> TrackPredictionState {
        TrackPredictionState::new(track_id, self.labels.len(), self.uniform_prior)
    }

    /// Identify `track` on `frame`.
    ///
    /// Fails per track only: `DecodeAnomaly` when the track's latest region
    /// belongs to another frame, `ClassificationUnavailable` when no sample
    /// could be produced or the classifier could not score it.
    pub fn identify<C: Classifier + ?Sized>(
        &self,
        classifier: &C,
        frame: &Frame,
        frame_number: u32,
        thermal_reference: f32,
        track: &Track,
        state: &mut TrackPredictionState,
    ) -> PipelineResult<()> {
        let unavailable = PipelineError::ClassificationUnavailable {
            track_id: track.id(),
            frame: frame_number,
        };
        let Some(region) = track.last_region() else {
            return Err(unavailable);
        };
        if region.frame_number != frame_number {
            return Err(PipelineError::DecodeAnomaly {
                track_id: track.id(),
                region_frame: region.frame_number,
                frame: frame_number,
            });
        }

        let Some(sample) = classifier.prepare(frame, region, thermal_reference) else {
            return Err(unavailable);
        };
        let output = match classifier.classify(&sample, state.memory()) {
            Ok(output) => output,
            Err(e) => {
                log::warn!("classifier {} failed on track {}: {}", classifier.name(), track.id(), e);
                return Err(unavailable);
            }
        };
        if output.probabilities.len() != self.labels.len() {
            log::warn!(
                "classifier {} returned {} probabilities for {} labels",
                classifier.name(),
                output.probabilities.len(),
                self.labels.len()
            );
            return Err(unavailable);
        }

        state.observe(
            output.probabilities,
            output.novelty,
            output.memory,
            region,
            self.false_positive_index,
        );
        Ok(())
    }
}
