//! Lepton frame message codec.
//!
//! One socket message is a fixed-size telemetry header followed by
//! `height * width` big-endian unsigned 16-bit samples in row-major order.

use crate::error::{PipelineError, PipelineResult};
use crate::frame::{Frame, Telemetry, TELEMETRY_ROW_BYTES};

/// Four VoSPI packets of 160 bytes precede the thermal payload.
pub const DEFAULT_TELEMETRY_BYTES: usize = 4 * TELEMETRY_ROW_BYTES;
/// Samples above this are out of the sensor's normal range and logged.
pub const HOT_PIXEL_THRESHOLD: u16 = 10_000;

#[derive(Clone, Copy, Debug)]
pub struct FrameDecoder {
    telemetry_bytes: usize,
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
}

impl FrameDecoder {
    pub fn new(telemetry_bytes: usize, width: u32, height: u32) -> Self {
        Self {
            telemetry_bytes,
            width,
            height,
            max_width: width,
            max_height: height,
        }
    }

    /// Size the receive buffer for a larger sensor than the configured resolution.
    pub fn with_max_resolution(mut self, max_width: u32, max_height: u32) -> Self {
        self.max_width = max_width.max(self.width);
        self.max_height = max_height.max(self.height);
        self
    }

    pub fn telemetry_bytes(&self) -> usize {
        self.telemetry_bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes a complete message occupies at the configured resolution.
    pub fn message_bytes(&self) -> usize {
        self.telemetry_bytes + self.sample_count() * 2
    }

    /// Largest message the receive side must accept.
    pub fn max_message_bytes(&self) -> usize {
        self.telemetry_bytes + self.max_width as usize * self.max_height as usize * 2
    }

    fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Split one message into telemetry and thermal matrix.
    ///
    /// A truncated thermal payload decodes the samples present and zero-fills
    /// the rest; only a truncated header is an error.
    pub fn decode(&self, message: &[u8]) -> PipelineResult<Frame> {
        if message.len() < self.telemetry_bytes {
            return Err(PipelineError::ShortRead {
                expected: self.telemetry_bytes,
                actual: message.len(),
            });
        }
        let (header, payload) = message.split_at(self.telemetry_bytes);
        let telemetry = Telemetry::parse(header);

        let count = self.sample_count();
        let mut samples = vec![0u16; count];
        let mut decoded = 0;
        for (dst, chunk) in samples.iter_mut().zip(payload.chunks_exact(2)) {
            *dst = u16::from_be_bytes([chunk[0], chunk[1]]);
            decoded += 1;
        }

        if decoded < count {
            log::warn!(
                "frame {}: thermal payload truncated ({} of {} samples)",
                telemetry.frame_counter,
                decoded,
                count
            );
        }
        let frame = Frame::partial(telemetry, self.width, self.height, samples, decoded);

        if log::log_enabled!(log::Level::Debug) {
            let hot = frame.count_above(HOT_PIXEL_THRESHOLD);
            if hot > 0 {
                let (lo, hi) = frame.min_max();
                log::debug!(
                    "frame {}: {} samples above {} (min {} max {}) time_on {:.3}s",
                    telemetry.frame_counter,
                    hot,
                    HOT_PIXEL_THRESHOLD,
                    lo,
                    hi,
                    telemetry.time_on_ms as f64 / 1000.0
                );
            }
        }
        Ok(frame)
    }

    /// Serialize a frame into the wire layout this decoder reads.
    pub fn encode(&self, frame: &Frame) -> Vec<u8> {
        let mut out = vec![0u8; self.telemetry_bytes];
        frame.telemetry().write(&mut out);
        out.reserve(frame.samples().len() * 2);
        for sample in frame.samples() {
            out.extend_from_slice(&sample.to_be_bytes());
        }
        out
    }
}
