//! Tracks: regions of interest followed across the frames of one session.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pixel-space rectangle; `x`/`y` are the top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    /// Overlap of two rectangles; empty when they do not intersect.
    pub fn intersection(&self, other: &Rect) -> Rect {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return Rect::new(left, top, 0, 0);
        }
        Rect::new(left, top, (right - left) as u32, (bottom - top) as u32)
    }

    /// Shrink by `edge` pixels on every side.
    pub fn inset(&self, edge: u32) -> Rect {
        let w = self.width.saturating_sub(edge * 2);
        let h = self.height.saturating_sub(edge * 2);
        Rect::new(self.x + edge as i32, self.y + edge as i32, w, h)
    }
}

/// Where a track was on one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub rect: Rect,
    pub frame_number: u32,
    /// Number of warm pixels attributed to the object.
    pub mass: f32,
    /// The region was clipped by the frame's edge-exclusion margin.
    pub was_cropped: bool,
}

/// Final verdict for one track, produced by `TrackPredictionState::finalize`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackResult {
    /// `None` when the track was never identified.
    pub label: Option<String>,
    pub confidence: f32,
    pub max_novelty: f32,
    pub avg_novelty: f32,
    /// Per-label running maximum of the smoothed prediction.
    pub class_best_score: Vec<f32>,
}

/// Per-frame smoothed prediction log, kept only when detail export is enabled.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionHistory {
    pub predictions: Vec<Vec<f32>>,
    pub novelties: Vec<f32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    id: TrackId,
    bounds_history: Vec<Region>,
    #[serde(skip)]
    active: bool,
    pub result: Option<TrackResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<PredictionHistory>,
}

impl Track {
    pub fn new(id: TrackId) -> Self {
        Self {
            id,
            bounds_history: Vec::new(),
            active: true,
            result: None,
            history: None,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn add_region(&mut self, region: Region) {
        self.bounds_history.push(region);
    }

    pub fn last_region(&self) -> Option<&Region> {
        self.bounds_history.last()
    }

    pub fn bounds_history(&self) -> &[Region] {
        &self.bounds_history
    }

    pub fn label(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.label.as_deref())
    }
}

/// All tracks discovered in a session, in discovery order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrackSet {
    tracks: Vec<Track>,
    next_id: u32,
}

impl TrackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new active track with a fresh identifier.
    pub fn begin(&mut self) -> &mut Track {
        self.next_id += 1;
        self.tracks.push(Track::new(TrackId(self.next_id)));
        let last = self.tracks.len() - 1;
        &mut self.tracks[last]
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.iter_mut()
    }

    pub fn active(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.active)
    }

    pub fn active_ids(&self) -> Vec<TrackId> {
        self.active().map(|t| t.id).collect()
    }

    pub fn has_active(&self) -> bool {
        self.tracks.iter().any(|t| t.active)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
