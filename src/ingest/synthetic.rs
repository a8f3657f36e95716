use serde::{Deserialize, Serialize};

use crate::frame::{Frame, Telemetry};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyntheticScene {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub background: u16,
    /// Warmth of the object above the background.
    pub warmth: u16,
    /// Side of the square object in pixels.
    pub object_size: u32,
    /// Empty frames before the object enters, per cycle.
    pub quiet_frames: u32,
    /// Frames the object spends crossing the scene, per cycle.
    pub active_frames: u32,
}

impl Default for SyntheticScene {
    fn default() -> Self {
        Self {
            width: 160,
            height: 120,
            frame_rate: 9,
            background: 3000,
            warmth: 800,
            object_size: 8,
            quiet_frames: 45,
            active_frames: 180,
        }
    }
}

/// Deterministic camera for tests and local runs.
///
/// Each cycle shows an empty scene for `quiet_frames`, then a warm square
/// walking left to right across the middle for `active_frames`.
pub struct SyntheticCamera {
    scene: SyntheticScene,
    frame_count: u32,
}

impl SyntheticCamera {
    pub fn new(scene: SyntheticScene) -> Self {
        Self {
            scene,
            frame_count: 0,
        }
    }

    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }

    pub fn frames_generated(&self) -> u32 {
        self.frame_count
    }

    /// Where the object sits on cycle frame `step`, if it is in view.
    fn object_origin(&self, step: u32) -> Option<(u32, u32)> {
        let scene = &self.scene;
        let active_step = step.checked_sub(scene.quiet_frames)?;
        if active_step >= scene.active_frames {
            return None;
        }
        let travel = scene.width.saturating_sub(scene.object_size + 4);
        let x = 2 + (active_step as u64 * travel as u64 / scene.active_frames.max(1) as u64) as u32;
        let y = scene.height.saturating_sub(scene.object_size) / 2;
        Some((x, y))
    }

    pub fn next_frame(&mut self) -> Frame {
        let scene = &self.scene;
        let cycle = (scene.quiet_frames + scene.active_frames).max(1);
        let step = self.frame_count % cycle;
        let mut samples = vec![scene.background; (scene.width * scene.height) as usize];

        if let Some((ox, oy)) = self.object_origin(step) {
            let hot = scene.background.saturating_add(scene.warmth);
            for y in oy..(oy + scene.object_size).min(scene.height) {
                for x in ox..(ox + scene.object_size).min(scene.width) {
                    samples[(y * scene.width + x) as usize] = hot;
                }
            }
        }

        let telemetry = Telemetry {
            revision: 1,
            time_on_ms: (self.frame_count as u64 * 1000 / scene.frame_rate.max(1) as u64) as u32,
            frame_counter: self.frame_count,
            frame_mean: scene.background,
            fpa_temp_ck: 30_000,
            ..Telemetry::default()
        };
        self.frame_count += 1;
        let decoded = samples.len();
        Frame::partial(telemetry, scene.width, scene.height, samples, decoded)
    }
}

impl Iterator for SyntheticCamera {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        Some(self.next_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_scene() -> SyntheticScene {
        SyntheticScene {
            width: 32,
            height: 24,
            object_size: 4,
            quiet_frames: 3,
            active_frames: 6,
            ..SyntheticScene::default()
        }
    }

    #[test]
    fn scene_is_quiet_then_warm_then_quiet() {
        let mut camera = SyntheticCamera::new(small_scene());
        let warm: Vec<bool> = (0..12)
            .map(|_| camera.next_frame().count_above(3400) > 0)
            .collect();
        assert_eq!(
            warm,
            vec![false, false, false, true, true, true, true, true, true, false, false, false]
        );
    }

    #[test]
    fn object_moves_and_telemetry_counts_frames() {
        let mut camera = SyntheticCamera::new(small_scene());
        let frames: Vec<Frame> = camera.by_ref().take(6).collect();
        let first = frames[3].samples().iter().position(|&v| v > 3400);
        let later = frames[5].samples().iter().position(|&v| v > 3400);
        assert!(later > first);
        assert_eq!(frames[5].telemetry().frame_counter, 5);
        assert_eq!(frames[4].count_above(3400), 16);
        assert_eq!(camera.frames_generated(), 6);
    }
}
