use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::classify::preprocess;
use crate::frame::Frame;
use crate::track::Region;

/// Side length of the square sample most classifiers expect.
pub const DEFAULT_INPUT_SIZE: u32 = 48;

/// Normalized, cropped single-channel sample handed to a classifier.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl Sample {
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize],
        }
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }
}

/// Classifier-owned memory carried from one frame of a track to the next.
///
/// The pipeline never interprets the values. It creates the empty default,
/// passes it in, stores what comes back, and decays it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierMemory(Vec<f32>);

impl ClassifierMemory {
    pub fn from_values(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn decay(&mut self, factor: f32) {
        for v in &mut self.0 {
            *v *= factor;
        }
    }
}

/// One classifier call's output.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    /// One probability per label, in `Classifier::labels` order.
    pub probabilities: Vec<f32>,
    pub novelty: f32,
    pub memory: ClassifierMemory,
}

/// Classifier trait.
///
/// # Contract
///
/// - `labels` is fixed for the lifetime of the process.
/// - `classify` must not mutate state shared between tracks; everything a
///   track needs across frames travels in its own `ClassifierMemory`.
/// - Implementations are read-only after construction, so one instance can
///   serve several connections.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn labels(&self) -> &[String];

    /// Sample dimensions `prepare` must produce.
    fn input_size(&self) -> (u32, u32) {
        (DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE)
    }

    /// Cut and normalize the sample for `region`. `None` means this frame
    /// cannot be classified for this track.
    fn prepare(&self, frame: &Frame, region: &Region, thermal_reference: f32) -> Option<Sample> {
        let (width, height) = self.input_size();
        preprocess::crop_sample(frame, &region.rect, thermal_reference, width, height)
    }

    fn classify(&self, sample: &Sample, memory: &ClassifierMemory) -> Result<Classification>;

    /// Run one throwaway inference so the first real frame is not slow.
    fn warm_up(&self) -> Result<()> {
        let (width, height) = self.input_size();
        self.classify(&Sample::zeros(width, height), &ClassifierMemory::default())?;
        Ok(())
    }

    fn label_index(&self, label: &str) -> Option<usize> {
        self.labels().iter().position(|l| l == label)
    }
}
