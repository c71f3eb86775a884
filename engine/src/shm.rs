//! The double-buffered region a stream and its device hand frames through.
//! Modeled as an in-process struct with the same field layout and cursor
//! discipline as the wire region a real client would map, but never mapped
//! across a process boundary here — there is no client process in this
//! engine, only the producer/consumer pair of a stream and its device.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NUM_BUFFERS: usize = 2;
const BUFFERS_MASK: usize = NUM_BUFFERS - 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: i64,
}

impl Timestamp {
    pub fn now() -> Self {
        let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Timestamp { secs: d.as_secs() as i64, nanos: d.subsec_nanos() as i64 }
    }
}

/// The double-buffered sample area shared between a stream's producer and
/// its consumer. Exactly mirrors the layout a real client/server shm region
/// would use: two equally sized buffers of `used_size` bytes, a read and a
/// write cursor each with their own active buffer index.
#[derive(Debug)]
pub struct SharedMemoryRegion {
    used_size: usize,
    frame_bytes: usize,
    read_buf_idx: usize,
    write_buf_idx: usize,
    read_offset: [usize; NUM_BUFFERS],
    write_offset: [usize; NUM_BUFFERS],
    write_in_progress: [bool; NUM_BUFFERS],
    volume_scaler: f32,
    mute: bool,
    callback_pending: bool,
    num_overruns: u32,
    timestamp: Timestamp,
    samples: Vec<u8>,
}

impl SharedMemoryRegion {
    pub fn create(used_size: usize, frame_bytes: usize) -> Self {
        SharedMemoryRegion {
            used_size,
            frame_bytes,
            read_buf_idx: 0,
            write_buf_idx: 0,
            read_offset: [0; NUM_BUFFERS],
            write_offset: [0; NUM_BUFFERS],
            write_in_progress: [false; NUM_BUFFERS],
            volume_scaler: 1.0,
            mute: false,
            callback_pending: false,
            num_overruns: 0,
            timestamp: Timestamp::default(),
            samples: vec![0u8; used_size * NUM_BUFFERS],
        }
    }

    pub fn used_size(&self) -> usize {
        self.used_size
    }

    pub fn used_frames(&self) -> usize {
        if self.frame_bytes == 0 { 0 } else { self.used_size / self.frame_bytes }
    }

    pub fn set_frame_bytes(&mut self, frame_bytes: usize) {
        self.frame_bytes = frame_bytes;
    }

    fn buf_base(&self, idx: usize) -> usize {
        (idx & BUFFERS_MASK) * self.used_size
    }

    fn check_read_offset(&self, offset: usize) -> usize {
        if offset > self.used_size { 0 } else { offset }
    }

    fn check_write_offset(&self, offset: usize) -> usize {
        if offset > self.used_size { self.used_size } else { offset }
    }

    /// Number of frames queued in the buffer currently being read.
    pub fn frames_in_curr_buffer(&self) -> usize {
        let i = self.read_buf_idx & BUFFERS_MASK;
        let r = self.read_offset[i].min(self.used_size);
        let w = self.write_offset[i].min(self.used_size);
        if w <= r { 0 } else { (w - r) / self.frame_bytes.max(1) }
    }

    /// Total frames queued across both buffers.
    pub fn frames_queued(&self) -> usize {
        self.bytes_queued() / self.frame_bytes.max(1)
    }

    fn bytes_queued(&self) -> usize {
        (0..NUM_BUFFERS)
            .map(|i| {
                let r = self.read_offset[i].min(self.used_size);
                let w = self.write_offset[i].min(self.used_size);
                w.saturating_sub(r)
            })
            .sum()
    }

    pub fn is_buffer_available(&self) -> bool {
        self.write_offset[self.write_buf_idx & BUFFERS_MASK] == 0
    }

    /// Flags an overrun and zeroes the current write buffer if a write has
    /// not yet started on it. Returns `true` if unread data was clobbered.
    pub fn check_write_overrun(&mut self) -> bool {
        let idx = self.write_buf_idx & BUFFERS_MASK;
        let mut overran = false;
        if !self.write_in_progress[idx] {
            if self.write_offset[idx] != 0 {
                self.num_overruns += 1;
                overran = true;
            }
            let base = self.buf_base(idx);
            self.samples[base..base + self.used_size].fill(0);
            self.write_in_progress[idx] = true;
            self.write_offset[idx] = 0;
        }
        overran
    }

    /// Byte range of the current write buffer's unwritten tail.
    pub fn writeable_frames_slice(&mut self) -> (&mut [u8], usize) {
        let idx = self.write_buf_idx & BUFFERS_MASK;
        let write_offset = self.check_write_offset(self.write_offset[idx]);
        let base = self.buf_base(idx) + write_offset;
        let frames = self.used_frames() - write_offset / self.frame_bytes.max(1);
        (&mut self.samples[base..base + frames * self.frame_bytes.max(1)], frames)
    }

    pub fn buffer_written(&mut self, frames: usize) {
        if frames == 0 {
            return;
        }
        let idx = self.write_buf_idx & BUFFERS_MASK;
        self.write_offset[idx] += frames * self.frame_bytes;
        self.read_offset[idx] = 0;
    }

    pub fn frames_written(&self) -> usize {
        let idx = self.write_buf_idx & BUFFERS_MASK;
        self.write_offset[idx] / self.frame_bytes.max(1)
    }

    pub fn buffer_write_complete(&mut self) {
        let idx = self.write_buf_idx & BUFFERS_MASK;
        self.write_in_progress[idx] = false;
        self.write_buf_idx = (idx + 1) & BUFFERS_MASK;
    }

    /// Read-side view: the base pointer and frame count readable starting
    /// `offset` frames past the current read cursor, following into the
    /// next buffer when the current one is exhausted.
    pub fn readable_frames(&self, offset: usize) -> (&[u8], usize) {
        let mut buf_idx = self.read_buf_idx & BUFFERS_MASK;
        let read_offset = self.check_read_offset(self.read_offset[buf_idx]);
        let mut write_offset = self.check_write_offset(self.write_offset[buf_idx]);
        let mut final_offset = read_offset + offset * self.frame_bytes;

        if final_offset >= write_offset {
            final_offset -= write_offset;
            buf_idx = (buf_idx + 1) & BUFFERS_MASK;
            write_offset = self.check_write_offset(self.write_offset[buf_idx]);
        }
        if final_offset >= write_offset {
            return (&[], 0);
        }
        let frames = (write_offset - final_offset) / self.frame_bytes.max(1);
        let base = self.buf_base(buf_idx) + final_offset;
        (&self.samples[base..base + frames * self.frame_bytes], frames)
    }

    /// Advances the read cursor by `frames`, rolling over to the next
    /// buffer (possibly skipping a fully-consumed one) exactly as the
    /// two-buffer wraparound in `readable_frames` expects.
    pub fn buffer_read(&mut self, frames: usize) {
        if frames == 0 {
            return;
        }
        let mut buf_idx = self.read_buf_idx & BUFFERS_MASK;
        self.read_offset[buf_idx] += frames * self.frame_bytes;
        if self.read_offset[buf_idx] >= self.write_offset[buf_idx] {
            let remainder = self.read_offset[buf_idx] - self.write_offset[buf_idx];
            self.read_offset[buf_idx] = 0;
            self.write_offset[buf_idx] = 0;
            buf_idx = (buf_idx + 1) & BUFFERS_MASK;
            if remainder < self.write_offset[buf_idx] {
                self.read_offset[buf_idx] = remainder;
            } else {
                self.read_offset[buf_idx] = 0;
                self.write_offset[buf_idx] = 0;
                if remainder > 0 {
                    buf_idx = (buf_idx + 1) & BUFFERS_MASK;
                }
            }
            self.read_buf_idx = buf_idx;
        }
    }

    pub fn set_volume_scaler(&mut self, v: f32) {
        self.volume_scaler = v.clamp(0.0, 1.0);
    }

    pub fn volume_scaler(&self) -> f32 {
        self.volume_scaler
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    pub fn mute(&self) -> bool {
        self.mute
    }

    pub fn set_callback_pending(&mut self, pending: bool) {
        self.callback_pending = pending;
    }

    pub fn callback_pending(&self) -> bool {
        self.callback_pending
    }

    pub fn num_overruns(&self) -> u32 {
        self.num_overruns
    }

    pub fn set_timestamp(&mut self, ts: Timestamp) {
        self.timestamp = ts;
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_one_frame() {
        let mut shm = SharedMemoryRegion::create(64, 4);
        assert!(!shm.check_write_overrun());
        {
            let (buf, frames) = shm.writeable_frames_slice();
            assert!(frames >= 1);
            buf[0..4].copy_from_slice(&[1, 2, 3, 4]);
        }
        shm.buffer_written(1);
        shm.buffer_write_complete();

        let (data, frames) = shm.readable_frames(0);
        assert_eq!(frames, 1);
        assert_eq!(&data[0..4], &[1, 2, 3, 4]);
        shm.buffer_read(1);
        assert_eq!(shm.frames_queued(), 0);
    }

    #[test]
    fn overrun_is_flagged_when_unread_data_is_overwritten() {
        let mut shm = SharedMemoryRegion::create(16, 4);
        shm.buffer_written(2);
        // Never called buffer_write_complete, so write_in_progress is still
        // false and the next overrun check sees leftover write_offset != 0.
        assert!(shm.check_write_overrun());
        assert_eq!(shm.num_overruns(), 1);
    }

    #[test]
    fn volume_scaler_clamps_to_unit_range() {
        let mut shm = SharedMemoryRegion::create(16, 4);
        shm.set_volume_scaler(5.0);
        assert_eq!(shm.volume_scaler(), 1.0);
        shm.set_volume_scaler(-1.0);
        assert_eq!(shm.volume_scaler(), 0.0);
    }

    #[test]
    fn buffer_available_only_before_any_write_this_cycle() {
        let mut shm = SharedMemoryRegion::create(16, 4);
        assert!(shm.is_buffer_available());
        shm.buffer_written(1);
        assert!(!shm.is_buffer_available());
    }
}
