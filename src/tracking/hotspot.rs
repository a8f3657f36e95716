use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::TrackExtractor;
use crate::frame::Frame;
use crate::track::{Rect, Region, TrackId, TrackSet};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingSettings {
    /// Border excluded from extraction on every side.
    pub edge_pixels: u32,
    /// Warmth above the frame median that marks a pixel as part of an object.
    pub hot_threshold: u16,
    /// Smallest component, in pixels, that becomes a region.
    pub min_mass: u32,
    /// Furthest a region centre may move between frames and keep its track.
    pub max_jump: f32,
    /// Frames a track may go unmatched before it is deactivated.
    pub remove_after: u32,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            edge_pixels: 1,
            hot_threshold: 300,
            min_mass: 4,
            max_jump: 16.0,
            remove_after: 9,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Component {
    rect: Rect,
    mass: u32,
}

/// Connected warm regions, matched to tracks by nearest centre.
///
/// Active tracks with no match on a frame get a blank region (previous
/// bounds, zero mass) so every active track has a region for every frame.
pub struct HotspotTrackExtractor {
    settings: TrackingSettings,
    last_matched: HashMap<TrackId, u32>,
}

impl HotspotTrackExtractor {
    pub fn new(settings: TrackingSettings) -> Self {
        Self {
            settings,
            last_matched: HashMap::new(),
        }
    }

    fn components(&self, frame: &Frame, crop: &Rect, threshold: f32) -> Vec<Component> {
        if crop.is_empty() {
            return Vec::new();
        }
        let w = crop.width as usize;
        let h = crop.height as usize;
        let hot = |cx: usize, cy: usize| {
            frame
                .get(crop.x as u32 + cx as u32, crop.y as u32 + cy as u32)
                .is_some_and(|v| v as f32 > threshold)
        };

        let mut seen = vec![false; w * h];
        let mut out = Vec::new();
        let mut stack = Vec::new();
        for start_y in 0..h {
            for start_x in 0..w {
                if seen[start_y * w + start_x] || !hot(start_x, start_y) {
                    continue;
                }
                seen[start_y * w + start_x] = true;
                stack.push((start_x, start_y));
                let (mut x0, mut y0, mut x1, mut y1) = (start_x, start_y, start_x, start_y);
                let mut mass = 0u32;
                while let Some((x, y)) = stack.pop() {
                    mass += 1;
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x);
                    y1 = y1.max(y);
                    let mut visit = |nx: usize, ny: usize| {
                        if !seen[ny * w + nx] && hot(nx, ny) {
                            seen[ny * w + nx] = true;
                            stack.push((nx, ny));
                        }
                    };
                    if x > 0 {
                        visit(x - 1, y);
                    }
                    if x + 1 < w {
                        visit(x + 1, y);
                    }
                    if y > 0 {
                        visit(x, y - 1);
                    }
                    if y + 1 < h {
                        visit(x, y + 1);
                    }
                }
                out.push(Component {
                    rect: Rect::new(
                        crop.x + x0 as i32,
                        crop.y + y0 as i32,
                        (x1 - x0 + 1) as u32,
                        (y1 - y0 + 1) as u32,
                    ),
                    mass,
                });
            }
        }
        out
    }
}

impl TrackExtractor for HotspotTrackExtractor {
    fn name(&self) -> &'static str {
        "hotspot"
    }

    fn start_session(&mut self) {
        self.last_matched.clear();
    }

    fn process_frame(&mut self, tracks: &mut TrackSet, frame: &Frame, frame_number: u32) -> Result<()> {
        let crop = Rect::new(0, 0, frame.width(), frame.height()).inset(self.settings.edge_pixels);
        let threshold = frame.median() + self.settings.hot_threshold as f32;

        let mut components: Vec<Component> = self
            .components(frame, &crop, threshold)
            .into_iter()
            .filter(|c| c.mass >= self.settings.min_mass)
            .collect();
        components.sort_by(|a, b| b.mass.cmp(&a.mass));

        let mut unmatched = tracks.active_ids();
        for component in components {
            let (cx, cy) = component.rect.center();
            let nearest = unmatched
                .iter()
                .enumerate()
                .filter_map(|(slot, id)| {
                    let (tx, ty) = tracks.get(*id)?.last_region()?.rect.center();
                    let dist = ((tx - cx).powi(2) + (ty - cy).powi(2)).sqrt();
                    (dist <= self.settings.max_jump).then_some((slot, dist))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(slot, _)| slot);

            let region = Region {
                rect: component.rect,
                frame_number,
                mass: component.mass as f32,
                was_cropped: touches_border(&component.rect, &crop),
            };
            let id = match nearest {
                Some(slot) => {
                    let id = unmatched.swap_remove(slot);
                    if let Some(track) = tracks.get_mut(id) {
                        track.add_region(region);
                    }
                    id
                }
                None => {
                    let track = tracks.begin();
                    track.add_region(region);
                    log::debug!("new track {} at frame {}", track.id(), frame_number);
                    track.id()
                }
            };
            self.last_matched.insert(id, frame_number);
        }

        for id in unmatched {
            let Some(track) = tracks.get_mut(id) else {
                continue;
            };
            let last = self.last_matched.get(&id).copied().unwrap_or(frame_number);
            if frame_number.saturating_sub(last) >= self.settings.remove_after {
                track.set_active(false);
                log::debug!("track {} lost at frame {}", id, frame_number);
                continue;
            }
            if let Some(previous) = track.last_region().copied() {
                track.add_region(Region {
                    frame_number,
                    mass: 0.0,
                    ..previous
                });
            }
        }
        Ok(())
    }
}

fn touches_border(rect: &Rect, crop: &Rect) -> bool {
    rect.x <= crop.x || rect.y <= crop.y || rect.right() >= crop.right() || rect.bottom() >= crop.bottom()
}
