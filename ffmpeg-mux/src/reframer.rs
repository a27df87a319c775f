//! Reassembles arbitrarily sized PCM pushes into codec-sized frames.
//!
//! All pending bytes live in one arena. A push appends to the valid region and
//! hands back a [`Drain`] that yields whole frames as slices of that arena. When
//! the drain goes away, however it ends, the unread tail is shifted back to
//! offset zero, so the valid region always starts at the beginning of the arena
//! between pushes.

use ffmpeg_next::codec;

use crate::error::{MuxError, Result};

/// Input PCM is signed 16-bit interleaved.
pub const INPUT_SAMPLE_BYTES: usize = 2;

/// Largest encoded audio packet the encoder scratch space is sized for.
pub const MAX_AUDIO_PACKET_SIZE: usize = 128 * 1024;

/// Audio encoder scratch capacity. Also bounds the frame size of codecs that
/// accept any frame length.
pub const AUDIO_SCRATCH_SIZE: usize = 4 * MAX_AUDIO_PACKET_SIZE;

/// Samples per channel the reframer should cut for a codec.
///
/// `frame_size` is what the opened encoder declares. Codecs that take any length
/// (`frame_size <= 1`) get a length derived from the scratch capacity instead:
/// divided across channels, halved again for 16-bit PCM codecs.
pub fn samples_per_frame(frame_size: u32, channels: u16, codec_id: codec::Id) -> usize {
    if frame_size > 1 {
        return frame_size as usize;
    }
    let mut samples = AUDIO_SCRATCH_SIZE / channels.max(1) as usize;
    if matches!(
        codec_id,
        codec::Id::PCM_S16LE | codec::Id::PCM_S16BE | codec::Id::PCM_U16LE | codec::Id::PCM_U16BE
    ) {
        samples >>= 1;
    }
    samples
}

pub struct AudioReframer {
    arena: Vec<u8>,
    len: usize,
    capacity: usize,
    frame_bytes: usize,
}

impl AudioReframer {
    pub fn new(frame_bytes: usize, capacity: usize) -> Result<Self> {
        if frame_bytes == 0 || frame_bytes > capacity {
            return Err(MuxError::InvalidSettings {
                reason: format!(
                    "audio frame of {} bytes does not fit carry-over capacity {}",
                    frame_bytes, capacity
                ),
            });
        }
        Ok(Self {
            arena: Vec::new(),
            len: 0,
            capacity,
            frame_bytes,
        })
    }

    /// Bytes of one aligned frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Bytes carried over from previous pushes.
    pub fn pending(&self) -> usize {
        self.len
    }

    pub fn pending_bytes(&self) -> &[u8] {
        &self.arena[..self.len]
    }

    /// Appends `chunk` and returns the frames that are now complete.
    ///
    /// Fails without touching the carry-over when the chunk does not fit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Drain<'_>> {
        if chunk.len() > self.capacity - self.len {
            return Err(MuxError::BufferOverflow {
                pending: self.len,
                incoming: chunk.len(),
                capacity: self.capacity,
            });
        }
        let end = self.len + chunk.len();
        if self.arena.len() < end {
            self.arena.resize(end, 0);
        }
        self.arena[self.len..end].copy_from_slice(chunk);
        self.len = end;
        Ok(Drain {
            reframer: self,
            read: 0,
        })
    }

    /// Takes whatever is left, shorter than one frame. Used once at end of stream.
    pub fn take_tail(&mut self) -> Vec<u8> {
        let tail = self.arena[..self.len].to_vec();
        self.len = 0;
        tail
    }
}

/// Frames made available by one push. Dropping it compacts the carry-over.
pub struct Drain<'a> {
    reframer: &'a mut AudioReframer,
    read: usize,
}

impl Drain<'_> {
    /// Next aligned frame, or `None` once less than a frame remains.
    pub fn next_frame(&mut self) -> Option<&[u8]> {
        let frame_bytes = self.reframer.frame_bytes;
        if self.reframer.len - self.read < frame_bytes {
            return None;
        }
        let start = self.read;
        self.read += frame_bytes;
        Some(&self.reframer.arena[start..start + frame_bytes])
    }

    /// Frames still available in this drain.
    pub fn remaining(&self) -> usize {
        (self.reframer.len - self.read) / self.reframer.frame_bytes
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        if self.read == 0 {
            return;
        }
        let r = &mut *self.reframer;
        r.arena.copy_within(self.read..r.len, 0);
        r.len -= self.read;
    }
}
