use super::buffer::AppBuffer;
use crate::models::error::{Result, TransferError};

/// Fixed-capacity circular capture store for triggered recording.
///
/// Storage is channel-major (`channel * capacity + frame`), the same layout
/// as [`AppBuffer`]. The write cursor advances one frame at a time; when it
/// reaches the end it either wraps (setting `wrapped`) or holds at
/// `capacity`, which marks an unwrapped ring as exactly full.
///
/// Single writer: owned by the loop or period handler of its session.
#[derive(Debug, Clone, PartialEq)]
pub struct RingCaptureBuffer {
    data: AppBuffer,
    cursor: usize,
    wrapped: bool,
}

impl RingCaptureBuffer {
    pub fn new(capacity: usize, channels: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TransferError::invalid_config("ring capture needs at least one frame"));
        }
        Ok(Self {
            data: AppBuffer::silent(capacity, channels)?,
            cursor: 0,
            wrapped: false,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.frames()
    }

    pub fn channels(&self) -> usize {
        self.data.channels()
    }

    /// Next frame to be written.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    /// True once an unwrapped ring has been filled to the end and held there.
    pub fn is_full(&self) -> bool {
        self.cursor == self.capacity()
    }

    /// Frames left before the end of the storage.
    pub fn space_to_end(&self) -> usize {
        self.capacity() - self.cursor
    }

    /// Store one sample of the frame at the cursor.
    #[inline]
    pub fn store(&mut self, channel: usize, sample: f64) {
        self.data.set(self.cursor, channel, sample);
    }

    /// Move past the frame at the cursor. At the end of storage the cursor
    /// wraps to zero if `wrap` is set, otherwise it holds at `capacity`.
    #[inline]
    pub fn advance(&mut self, wrap: bool) {
        self.cursor += 1;
        if self.cursor == self.capacity() && wrap {
            self.cursor = 0;
            self.wrapped = true;
        }
    }

    /// Write one whole frame (one sample per channel) and wrap if needed.
    pub fn push_frame(&mut self, frame: &[f64]) {
        for (channel, &sample) in frame.iter().enumerate() {
            self.store(channel, sample);
        }
        self.advance(true);
    }

    /// Rotate each channel into chronological order.
    ///
    /// A ring that never wrapped is already chronological and is left
    /// untouched. Otherwise `[0, cursor)` holds the newest frames and moves
    /// to the end while `[cursor, capacity)` moves to the front. The scratch
    /// space is `cursor` frames, reused across channels. Returns the shift
    /// applied; a second call returns 0.
    pub fn unwrap(&mut self) -> Result<usize> {
        if !self.wrapped {
            return Ok(0);
        }

        let shift = self.cursor;
        if shift > 0 {
            let mut scratch = Vec::new();
            scratch.try_reserve_exact(shift).map_err(|e| {
                TransferError::exhausted(format!("cannot allocate unwrap scratch of {} frames: {}", shift, e))
            })?;
            for channel in 0..self.channels() {
                rotate_left_with_scratch(self.data.channel_mut(channel), shift, &mut scratch);
            }
        }

        self.wrapped = false;
        self.cursor = self.capacity();
        Ok(shift)
    }

    /// Reset to empty, keeping the allocation.
    pub fn reset(&mut self) {
        self.data.as_mut_slice().fill(0.0);
        self.cursor = 0;
        self.wrapped = false;
    }

    pub fn as_buffer(&self) -> &AppBuffer {
        &self.data
    }

    pub fn into_buffer(self) -> AppBuffer {
        self.data
    }
}

/// Extract `[0, shift)` into `scratch`, shift the tail to the front and
/// reinsert the scratch at the end.
fn rotate_left_with_scratch(channel: &mut [f64], shift: usize, scratch: &mut Vec<f64>) {
    let len = channel.len();
    scratch.clear();
    scratch.extend_from_slice(&channel[..shift]);
    channel.copy_within(shift.., 0);
    channel[len - shift..].copy_from_slice(scratch);
}
