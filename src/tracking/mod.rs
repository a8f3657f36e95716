//! Track extraction seam.
//!
//! The recorder hands each session frame to a `TrackExtractor`, which
//! updates the session's `TrackSet`: new tracks, a region per active track
//! for this frame, and deactivation of tracks that have gone away.

mod hotspot;

use anyhow::Result;

use crate::frame::Frame;
use crate::track::TrackSet;

pub use hotspot::{HotspotTrackExtractor, TrackingSettings};

pub trait TrackExtractor: Send {
    fn name(&self) -> &'static str;

    /// Forget per-session state before a new session starts.
    fn start_session(&mut self) {}

    /// Update `tracks` for `frame`, the `frame_number`th frame of the session.
    ///
    /// Every region added for this frame must carry `frame_number`.
    fn process_frame(&mut self, tracks: &mut TrackSet, frame: &Frame, frame_number: u32) -> Result<()>;
}
