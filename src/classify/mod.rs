//! Classifier seam.
//!
//! The neural model lives behind `Classifier`. This module owns only the
//! contract, the cropping helper and a deterministic stub backend.

mod backend;
mod backends;
pub mod preprocess;

pub use backend::{Classification, Classifier, ClassifierMemory, Sample, DEFAULT_INPUT_SIZE};
pub use backends::StubClassifier;
