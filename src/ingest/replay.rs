use std::collections::VecDeque;
use std::io;

use super::lepton::FrameDecoder;
use super::MessageSource;
use crate::frame::Frame;

/// Queue of prepared messages, delivered one per receive.
///
/// Reads past the end behave like a closed peer. Messages larger than the
/// receive buffer are truncated, as a datagram socket would.
#[derive(Clone, Debug, Default)]
pub struct ReplaySource {
    messages: VecDeque<Vec<u8>>,
    delivered: u64,
}

impl ReplaySource {
    pub fn new(messages: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
            delivered: 0,
        }
    }

    pub fn from_frames<'a>(decoder: &FrameDecoder, frames: impl IntoIterator<Item = &'a Frame>) -> Self {
        Self::new(frames.into_iter().map(|f| decoder.encode(f)))
    }

    pub fn push(&mut self, message: Vec<u8>) {
        self.messages.push_back(message);
    }

    pub fn remaining(&self) -> usize {
        self.messages.len()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl MessageSource for ReplaySource {
    fn recv_message(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(message) = self.messages.pop_front() else {
            return Ok(0);
        };
        let n = message.len().min(buf.len());
        buf[..n].copy_from_slice(&message[..n]);
        self.delivered += 1;
        Ok(n)
    }
}
