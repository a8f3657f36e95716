//! Motion detection seam.
//!
//! The recorder only needs a live "movement detected" signal and the
//! look-back window of recent frames used as a session's runway.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::frame::{Frame, FrameWindow};
use crate::track::Rect;

pub trait MotionDetector: Send {
    fn name(&self) -> &'static str;

    /// Observe the next frame from the stream. Called for every frame,
    /// recording or not.
    fn process_frame(&mut self, frame: Arc<Frame>);

    fn movement_detected(&self) -> bool;

    /// Buffered pre-trigger frames, oldest first, ending with the latest frame.
    fn preroll(&self) -> Vec<Arc<Frame>>;

    fn start_recording(&mut self) {}

    fn stop_recording(&mut self) {}

    /// Forget everything observed so far. Called when the frame stream ends.
    fn reset(&mut self) {}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionSettings {
    /// Per-pixel change that counts as movement.
    pub delta_threshold: u16,
    /// Changed pixels needed to report movement.
    pub trigger_pixels: usize,
    pub edge_pixels: u32,
    /// Look-back length in frames.
    pub window_frames: usize,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            delta_threshold: 50,
            trigger_pixels: 3,
            edge_pixels: 1,
            window_frames: 27,
        }
    }
}

/// Compares each frame against the oldest frame in the look-back window.
///
/// Frames captured during a flat field correction are buffered but keep the
/// previous movement signal. Partial frames keep the signal and are never
/// buffered.
pub struct DeltaMotionDetector {
    settings: MotionSettings,
    window: FrameWindow,
    movement: bool,
    recording: bool,
}

impl DeltaMotionDetector {
    pub fn new(settings: MotionSettings) -> Self {
        let window = FrameWindow::new(settings.window_frames);
        Self {
            settings,
            window,
            movement: false,
            recording: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    fn changed_pixels(&self, current: &Frame, reference: &Frame) -> usize {
        if current.width() != reference.width() || current.height() != reference.height() {
            return 0;
        }
        let crop = Rect::new(0, 0, current.width(), current.height()).inset(self.settings.edge_pixels);
        let mut changed = 0;
        for y in crop.y as u32..crop.bottom() as u32 {
            for x in crop.x as u32..crop.right() as u32 {
                if let (Some(a), Some(b)) = (current.get(x, y), reference.get(x, y)) {
                    if a.abs_diff(b) > self.settings.delta_threshold {
                        changed += 1;
                    }
                }
            }
        }
        changed
    }
}

impl MotionDetector for DeltaMotionDetector {
    fn name(&self) -> &'static str {
        "delta"
    }

    fn process_frame(&mut self, frame: Arc<Frame>) {
        if frame.is_partial() {
            return;
        }
        if !frame.telemetry().ffc_in_progress() {
            self.movement = match self.window.oldest() {
                Some(reference) => self.changed_pixels(&frame, reference) >= self.settings.trigger_pixels,
                None => false,
            };
        }
        self.window.push(frame);
    }

    fn movement_detected(&self) -> bool {
        self.movement
    }

    fn preroll(&self) -> Vec<Arc<Frame>> {
        self.window.iter().cloned().collect()
    }

    fn start_recording(&mut self) {
        self.recording = true;
    }

    fn stop_recording(&mut self) {
        self.recording = false;
    }

    fn reset(&mut self) {
        self.window.clear();
        self.movement = false;
        self.recording = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Telemetry;

    fn frame(value: u16, hot: usize) -> Arc<Frame> {
        let mut samples = vec![value; 64];
        for s in samples.iter_mut().skip(9).take(hot) {
            *s = value + 500;
        }
        Arc::new(Frame::new(Telemetry::default(), 8, 8, samples).unwrap())
    }

    fn detector() -> DeltaMotionDetector {
        DeltaMotionDetector::new(MotionSettings {
            window_frames: 3,
            ..MotionSettings::default()
        })
    }

    #[test]
    fn static_scene_has_no_movement() {
        let mut det = detector();
        for _ in 0..5 {
            det.process_frame(frame(3000, 0));
            assert!(!det.movement_detected());
        }
    }

    #[test]
    fn warm_object_triggers_movement() {
        let mut det = detector();
        det.process_frame(frame(3000, 0));
        det.process_frame(frame(3000, 2));
        assert!(!det.movement_detected(), "below trigger_pixels");
        det.process_frame(frame(3000, 4));
        assert!(det.movement_detected());
    }

    #[test]
    fn ffc_frames_keep_previous_signal() {
        let mut det = detector();
        det.process_frame(frame(3000, 0));
        det.process_frame(frame(3000, 4));
        assert!(det.movement_detected());

        let ffc = Frame::new(
            Telemetry::default().with_ffc_in_progress(),
            8,
            8,
            vec![3000; 64],
        )
        .unwrap();
        det.process_frame(Arc::new(ffc));
        assert!(det.movement_detected());
    }

    #[test]
    fn partial_frames_are_ignored() {
        let mut det = detector();
        det.process_frame(frame(3000, 0));
        det.process_frame(frame(3000, 0));

        let mut samples = vec![3000; 64];
        samples[20..].fill(0);
        let partial = Frame::partial(Telemetry::default(), 8, 8, samples, 20);
        det.process_frame(Arc::new(partial));
        assert!(!det.movement_detected());
        assert!(det.preroll().iter().all(|f| !f.is_partial()));
        assert_eq!(det.preroll().len(), 2);
    }

    #[test]
    fn reset_forgets_the_window() {
        let mut det = detector();
        det.process_frame(frame(3000, 0));
        det.process_frame(frame(3000, 4));
        det.start_recording();
        assert!(det.movement_detected());

        det.reset();
        assert!(!det.movement_detected());
        assert!(!det.is_recording());
        assert!(det.preroll().is_empty());
        det.process_frame(frame(3000, 0));
        assert!(!det.movement_detected());
    }

    #[test]
    fn preroll_is_bounded_and_oldest_first() {
        let mut det = detector();
        for v in [1000, 1001, 1002, 1003] {
            det.process_frame(frame(v, 0));
        }
        let values: Vec<u16> = det.preroll().iter().map(|f| f.samples()[0]).collect();
        assert_eq!(values, vec![1001, 1002, 1003]);

        det.start_recording();
        assert!(det.is_recording());
        det.stop_recording();
        assert!(!det.is_recording());
    }
}
