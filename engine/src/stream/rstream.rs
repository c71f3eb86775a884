//! The server-side record of a client's stream. Owned by `AudioThread` in an
//! id-keyed table; every other structure that needs to refer to a stream
//! (`DevStream`, a command payload) holds an `RStreamId`, never a borrow.

use std::time::Duration;

use crate::format::PcmFormat;
use crate::shm::SharedMemoryRegion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RStreamId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Playback,
    Capture,
}

/// Per-stream option bits. A plain bitset rather than a dependency: the
/// engine only ever tests and ORs these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFlags(u32);

impl StreamFlags {
    pub const BULK_AUDIO_OK: StreamFlags = StreamFlags(0b01);
    pub const USE_DEV_TIMING: StreamFlags = StreamFlags(0b10);

    pub const fn empty() -> Self {
        StreamFlags(0)
    }

    pub const fn contains(self, other: StreamFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: StreamFlags) -> Self {
        StreamFlags(self.0 | other.0)
    }
}

/// Monotonic-raw instant, expressed as an offset so the scheduler can do
/// plain duration arithmetic without touching wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonoTime(pub Duration);

impl MonoTime {
    pub const ZERO: MonoTime = MonoTime(Duration::ZERO);

    pub fn saturating_add(self, d: Duration) -> Self {
        MonoTime(self.0.saturating_add(d))
    }

    pub fn saturating_sub(self, other: MonoTime) -> Duration {
        self.0.saturating_sub(other.0)
    }
}

#[derive(Debug)]
pub struct RStream {
    pub id: RStreamId,
    pub direction: Direction,
    pub format: PcmFormat,
    pub buffer_frames: usize,
    pub cb_threshold: usize,
    pub flags: StreamFlags,
    pub shm: SharedMemoryRegion,
    pub next_cb_ts: MonoTime,
    pub sleep_interval: Duration,
    pub longest_fetch_interval: Duration,
    /// Devices this stream is attached to (order insignificant).
    pub devices: Vec<u32>,
    /// The single device nominated to drive this stream's clock.
    pub master_dev: Option<u32>,
}

impl RStream {
    pub fn new(id: RStreamId, direction: Direction, format: PcmFormat, buffer_frames: usize, cb_threshold: usize, flags: StreamFlags) -> Self {
        let shm = SharedMemoryRegion::create(buffer_frames * format.frame_bytes(), format.frame_bytes());
        let sleep_interval = Duration::from_secs_f64(cb_threshold as f64 / format.frame_rate as f64);
        RStream {
            id,
            direction,
            format,
            buffer_frames,
            cb_threshold,
            flags,
            shm,
            next_cb_ts: MonoTime::ZERO,
            sleep_interval,
            longest_fetch_interval: Duration::ZERO,
            devices: Vec::new(),
            master_dev: None,
        }
    }

    pub fn attach_device(&mut self, dev_id: u32) {
        if self.master_dev.is_none() {
            self.master_dev = Some(dev_id);
        }
        if !self.devices.contains(&dev_id) {
            self.devices.push(dev_id);
        }
    }

    pub fn detach_device(&mut self, dev_id: u32) {
        self.devices.retain(|&d| d != dev_id);
        if self.master_dev == Some(dev_id) {
            self.master_dev = self.devices.first().copied();
        }
    }

    pub fn is_master(&self, dev_id: u32) -> bool {
        self.master_dev == Some(dev_id)
    }

    /// Advances `next_cb_ts` by one sleep interval; resets to `now +
    /// sleep_interval` if the result would still be in the past (the
    /// schedule-reset case described for posting a ready capture buffer).
    pub fn advance_next_cb(&mut self, now: MonoTime) {
        self.next_cb_ts = self.next_cb_ts.saturating_add(self.sleep_interval);
        if self.next_cb_ts <= now {
            self.next_cb_ts = now.saturating_add(self.sleep_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};

    fn fmt() -> PcmFormat {
        PcmFormat::new(SampleFormat::S16Le, 48_000, 2, ChannelLayout::stereo()).unwrap()
    }

    #[test]
    fn first_attached_device_becomes_master() {
        let mut s = RStream::new(RStreamId(1), Direction::Playback, fmt(), 1024, 256, StreamFlags::empty());
        s.attach_device(7);
        s.attach_device(9);
        assert!(s.is_master(7));
        assert!(!s.is_master(9));
    }

    #[test]
    fn detaching_master_promotes_next_device() {
        let mut s = RStream::new(RStreamId(1), Direction::Playback, fmt(), 1024, 256, StreamFlags::empty());
        s.attach_device(7);
        s.attach_device(9);
        s.detach_device(7);
        assert!(s.is_master(9));
    }

    #[test]
    fn next_cb_resets_forward_when_it_would_still_be_in_the_past() {
        let mut s = RStream::new(RStreamId(1), Direction::Capture, fmt(), 1024, 256, StreamFlags::empty());
        s.next_cb_ts = MonoTime(Duration::from_secs(1));
        let now = MonoTime(Duration::from_secs(10));
        s.advance_next_cb(now);
        assert!(s.next_cb_ts > now);
    }
}
