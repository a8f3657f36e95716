//! Decoded thermal frames.
//!
//! - `Telemetry`: the camera's per-frame telemetry row (uptime, frame counter, FFC state).
//! - `Frame`: telemetry plus a fixed-size matrix of 16-bit intensity samples. Immutable once built.
//! - `FrameWindow`: bounded ring of recent frames, used as the pre-trigger look-back.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Bytes in one telemetry row (80 big-endian 16-bit words).
pub const TELEMETRY_ROW_BYTES: usize = 160;

const WORD_REVISION: usize = 0;
const WORD_TIME_COUNTER: usize = 1;
const WORD_STATUS_BITS: usize = 3;
const WORD_FRAME_COUNTER: usize = 20;
const WORD_FRAME_MEAN: usize = 22;
const WORD_FPA_TEMP: usize = 24;
const WORD_LAST_FFC_TIME: usize = 34;

const FFC_STATE_SHIFT: u32 = 4;
const FFC_STATE_MASK: u32 = 0b11;
const FFC_STATE_IN_PROGRESS: u32 = 2;
const FFC_DESIRED_BIT: u32 = 1 << 3;

// ----------------------------------------------------------------------------
// Telemetry
// ----------------------------------------------------------------------------

/// Fields of the camera telemetry row the pipeline consumes.
///
/// Everything else in the header is firmware-owned and ignored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telemetry {
    pub revision: u16,
    /// Milliseconds since camera power-on (device uptime).
    pub time_on_ms: u32,
    pub status_bits: u32,
    pub frame_counter: u32,
    pub frame_mean: u16,
    /// Focal plane array temperature in centi-Kelvin.
    pub fpa_temp_ck: u16,
    /// Uptime at the most recent flat field correction.
    pub last_ffc_ms: u32,
}

impl Telemetry {
    /// Parse the telemetry row. Words past the end of `raw` read as zero.
    pub fn parse(raw: &[u8]) -> Self {
        Self {
            revision: read_word(raw, WORD_REVISION),
            time_on_ms: read_dword(raw, WORD_TIME_COUNTER),
            status_bits: read_dword(raw, WORD_STATUS_BITS),
            frame_counter: read_dword(raw, WORD_FRAME_COUNTER),
            frame_mean: read_word(raw, WORD_FRAME_MEAN),
            fpa_temp_ck: read_word(raw, WORD_FPA_TEMP),
            last_ffc_ms: read_dword(raw, WORD_LAST_FFC_TIME),
        }
    }

    /// Write the row back in wire layout. Words that do not fit in `out` are dropped.
    pub fn write(&self, out: &mut [u8]) {
        write_word(out, WORD_REVISION, self.revision);
        write_dword(out, WORD_TIME_COUNTER, self.time_on_ms);
        write_dword(out, WORD_STATUS_BITS, self.status_bits);
        write_dword(out, WORD_FRAME_COUNTER, self.frame_counter);
        write_word(out, WORD_FRAME_MEAN, self.frame_mean);
        write_word(out, WORD_FPA_TEMP, self.fpa_temp_ck);
        write_dword(out, WORD_LAST_FFC_TIME, self.last_ffc_ms);
    }

    pub fn ffc_in_progress(&self) -> bool {
        (self.status_bits >> FFC_STATE_SHIFT) & FFC_STATE_MASK == FFC_STATE_IN_PROGRESS
    }

    pub fn ffc_desired(&self) -> bool {
        self.status_bits & FFC_DESIRED_BIT != 0
    }

    pub fn with_ffc_in_progress(mut self) -> Self {
        self.status_bits &= !(FFC_STATE_MASK << FFC_STATE_SHIFT);
        self.status_bits |= FFC_STATE_IN_PROGRESS << FFC_STATE_SHIFT;
        self
    }
}

fn read_word(raw: &[u8], word: usize) -> u16 {
    let at = word * 2;
    match raw.get(at..at + 2) {
        Some(b) => u16::from_be_bytes([b[0], b[1]]),
        None => 0,
    }
}

// 32-bit telemetry values are sent least significant word first.
fn read_dword(raw: &[u8], word: usize) -> u32 {
    let lo = read_word(raw, word) as u32;
    let hi = read_word(raw, word + 1) as u32;
    lo | (hi << 16)
}

fn write_word(out: &mut [u8], word: usize, value: u16) {
    let at = word * 2;
    if let Some(dst) = out.get_mut(at..at + 2) {
        dst.copy_from_slice(&value.to_be_bytes());
    }
}

fn write_dword(out: &mut [u8], word: usize, value: u32) {
    write_word(out, word, (value & 0xffff) as u16);
    write_word(out, word + 1, (value >> 16) as u16);
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded camera frame. There is no mutable access to the samples.
#[derive(Clone, Debug)]
pub struct Frame {
    telemetry: Telemetry,
    width: u32,
    height: u32,
    samples: Vec<u16>,
    decoded_samples: usize,
}

impl Frame {
    /// Build a frame from a complete row-major sample matrix.
    pub fn new(telemetry: Telemetry, width: u32, height: u32, samples: Vec<u16>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if samples.len() != expected {
            return Err(anyhow!(
                "frame {}x{} needs {} samples, got {}",
                width,
                height,
                expected,
                samples.len()
            ));
        }
        Ok(Self {
            telemetry,
            width,
            height,
            samples,
            decoded_samples: expected,
        })
    }

    /// Frame whose matrix was only partly present on the wire; the tail is zero.
    pub(crate) fn partial(
        telemetry: Telemetry,
        width: u32,
        height: u32,
        samples: Vec<u16>,
        decoded_samples: usize,
    ) -> Self {
        Self {
            telemetry,
            width,
            height,
            samples,
            decoded_samples,
        }
    }

    /// Uniform frame, mostly useful for tests and warm-up.
    pub fn filled(telemetry: Telemetry, width: u32, height: u32, value: u16) -> Self {
        let len = width as usize * height as usize;
        Self {
            telemetry,
            width,
            height,
            samples: vec![value; len],
            decoded_samples: len,
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.samples
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// True when the wire message held fewer samples than the matrix.
    pub fn is_partial(&self) -> bool {
        self.decoded_samples < self.samples.len()
    }

    pub fn decoded_samples(&self) -> usize {
        self.decoded_samples
    }

    /// Median of the decoded samples; the mean of the two middle values for
    /// even counts. The zero tail of a partial frame is left out.
    pub fn median(&self) -> f32 {
        let decoded = &self.samples[..self.decoded_samples.min(self.samples.len())];
        if decoded.is_empty() {
            return 0.0;
        }
        let mut sorted = decoded.to_vec();
        let mid = sorted.len() / 2;
        let (lower, upper, _) = sorted.select_nth_unstable(mid);
        let upper = *upper as f32;
        if decoded.len() % 2 == 1 {
            return upper;
        }
        let lower = lower.iter().copied().max().unwrap_or(0) as f32;
        (lower + upper) / 2.0
    }

    pub fn min_max(&self) -> (u16, u16) {
        self.samples
            .iter()
            .fold((u16::MAX, u16::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)))
    }

    pub fn count_above(&self, threshold: u16) -> usize {
        self.samples.iter().filter(|&&s| s > threshold).count()
    }
}

// ----------------------------------------------------------------------------
// FrameWindow: bounded look-back
// ----------------------------------------------------------------------------

/// Bounded ring of the most recent frames.
///
/// Evicts the oldest frame once `capacity` is reached. Frames are shared with
/// the recorder through `Arc`, so the window never copies sample data.
#[derive(Debug)]
pub struct FrameWindow {
    frames: VecDeque<Arc<Frame>>,
    capacity: usize,
}

impl FrameWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: Arc<Frame>) {
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn latest(&self) -> Option<&Arc<Frame>> {
        self.frames.back()
    }

    pub fn oldest(&self) -> Option<&Arc<Frame>> {
        self.frames.front()
    }

    /// Frames oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Frame>> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(samples: Vec<u16>, width: u32, height: u32) -> Frame {
        Frame::new(Telemetry::default(), width, height, samples).unwrap()
    }

    #[test]
    fn telemetry_round_trips_through_wire_layout() {
        let tel = Telemetry {
            revision: 14,
            time_on_ms: 0x0001_2345,
            status_bits: 0,
            frame_counter: 70_000,
            frame_mean: 8100,
            fpa_temp_ck: 30_215,
            last_ffc_ms: 0x0001_0000,
        }
        .with_ffc_in_progress();
        let mut row = [0u8; TELEMETRY_ROW_BYTES];
        tel.write(&mut row);

        // time counter is least significant word first
        assert_eq!(&row[2..6], &[0x23, 0x45, 0x00, 0x01]);
        let parsed = Telemetry::parse(&row);
        assert_eq!(parsed, tel);
        assert!(parsed.ffc_in_progress());
        assert!(!parsed.ffc_desired());
    }

    #[test]
    fn telemetry_parse_tolerates_short_rows() {
        let parsed = Telemetry::parse(&[0x00, 0x0e, 0x10]);
        assert_eq!(parsed.revision, 14);
        assert_eq!(parsed.time_on_ms, 0);
        assert_eq!(parsed.frame_counter, 0);
    }

    #[test]
    fn frame_rejects_wrong_sample_count() {
        assert!(Frame::new(Telemetry::default(), 4, 4, vec![0; 15]).is_err());
    }

    #[test]
    fn median_matches_odd_and_even_counts() {
        assert_eq!(frame_with(vec![5, 1, 9], 3, 1).median(), 5.0);
        assert_eq!(frame_with(vec![4, 1, 10, 2], 2, 2).median(), 3.0);
    }

    #[test]
    fn median_ignores_zero_tail_of_partial_frame() {
        let frame = Frame::partial(Telemetry::default(), 3, 2, vec![3000, 3010, 3020, 0, 0, 0], 3);
        assert!(frame.is_partial());
        assert_eq!(frame.median(), 3010.0);

        let empty = Frame::partial(Telemetry::default(), 2, 1, vec![0, 0], 0);
        assert_eq!(empty.median(), 0.0);
    }

    #[test]
    fn get_is_row_major() {
        let frame = frame_with((0..6).collect(), 3, 2);
        assert_eq!(frame.get(0, 1), Some(3));
        assert_eq!(frame.get(2, 1), Some(5));
        assert_eq!(frame.get(3, 0), None);
        assert_eq!(frame.min_max(), (0, 5));
    }

    #[test]
    fn frame_window_enforces_capacity() {
        let mut window = FrameWindow::new(3);
        for i in 0..5u16 {
            window.push(Arc::new(Frame::filled(Telemetry::default(), 1, 1, i)));
        }
        assert_eq!(window.len(), 3);
        let kept: Vec<u16> = window.iter().map(|f| f.samples()[0]).collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert_eq!(window.latest().unwrap().samples()[0], 4);
    }
}
