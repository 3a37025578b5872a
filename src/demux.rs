//! Reassembles fixed-size frames from the decoder's arbitrarily chunked
//! byte stream.
//!
//! The pipe gives back whatever read sizes the OS feels like; frame
//! boundaries land anywhere. Carry-over bytes are kept between calls and
//! dropped when the decoder is replaced, since boundaries do not survive
//! a restart.

/// Stateful frame-boundary accumulator.
#[derive(Debug)]
pub struct FrameDemuxer {
    frame_len: usize,
    carry: Vec<u8>,
}

impl FrameDemuxer {
    pub fn new(frame_len: usize) -> Self {
        assert!(frame_len > 0, "frame length must be positive");
        Self {
            frame_len,
            carry: Vec::with_capacity(frame_len),
        }
    }

    /// Append one chunk and return every complete frame it unlocked, in
    /// stream order. Never yields a short frame.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.carry.extend_from_slice(chunk);

        let complete = self.carry.len() / self.frame_len;
        if complete == 0 {
            return Vec::new();
        }

        let mut frames = Vec::with_capacity(complete);
        for index in 0..complete {
            let start = index * self.frame_len;
            frames.push(self.carry[start..start + self.frame_len].to_vec());
        }
        self.carry.drain(..complete * self.frame_len);
        frames
    }

    /// Forget any partial frame. Called when the active decoder changes.
    pub fn reset(&mut self) {
        self.carry.clear();
    }

    #[cfg(test)]
    fn carry_len(&self) -> usize {
        self.carry.len()
    }
}
