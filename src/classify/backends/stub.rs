use anyhow::{anyhow, Result};

use crate::classify::backend::{Classification, Classifier, ClassifierMemory, Sample};

const PREFERRED_SHARE: f32 = 0.6;

/// Deterministic classifier for tests and model-less deployments.
///
/// Buckets the running mean warmth of a track's samples into a label index.
/// Memory holds `[warmth_sum, weight]`, so decaying it turns the running
/// mean into an exponentially weighted one.
pub struct StubClassifier {
    labels: Vec<String>,
    warmth_per_label: f32,
}

impl StubClassifier {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("stub classifier needs at least one label"));
        }
        Ok(Self {
            labels,
            warmth_per_label: 200.0,
        })
    }

    pub fn with_warmth_per_label(mut self, warmth: f32) -> Self {
        self.warmth_per_label = warmth.max(f32::EPSILON);
        self
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&self, sample: &Sample, memory: &ClassifierMemory) -> Result<Classification> {
        let (sum, weight) = match memory.values() {
            [sum, weight] => (*sum + sample.mean(), *weight + 1.0),
            _ => (sample.mean(), 1.0),
        };
        let running = sum / weight;

        let n = self.labels.len();
        let target = (running.max(0.0) / self.warmth_per_label) as usize % n;
        let probabilities = if n == 1 {
            vec![1.0]
        } else {
            let rest = (1.0 - PREFERRED_SHARE) / (n - 1) as f32;
            (0..n)
                .map(|i| if i == target { PREFERRED_SHARE } else { rest })
                .collect()
        };

        Ok(Classification {
            probabilities,
            novelty: 1.0 / weight,
            memory: ClassifierMemory::from_values(vec![sum, weight]),
        })
    }
}
