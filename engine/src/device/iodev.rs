//! The open-device abstraction the scheduler drives, and the state machine
//! (`OPEN -> NO_STREAM_RUN -> NORMAL_RUN`) every output device runs through.

use std::time::Instant;

use crate::error::EngineResult;
use crate::format::PcmFormat;
use crate::stream::{DevStream, Direction as StreamDirection};

#[derive(Debug, Clone, Copy)]
pub struct HwTimestamp {
    pub level: usize,
    pub when: Instant,
}

/// Hardware-facing operations an `IoDev` drives. Implemented once for real
/// ALSA hardware (see `device::alsa`); every method must be non-blocking —
/// the scheduler never suspends anywhere but its single `ppoll`.
pub trait Device {
    fn direction(&self) -> StreamDirection;
    fn format(&self) -> &PcmFormat;
    fn buffer_size(&self) -> usize;
    fn min_cb_level(&self) -> usize;
    fn max_cb_level(&self) -> usize;

    /// Frames currently queued in hardware, or `Err` on a severe condition
    /// (the ALSA backend maps `-EPIPE` to `EngineError::Xrun`).
    fn frames_queued(&mut self) -> EngineResult<HwTimestamp>;

    /// Borrows up to `frames` frames of the device's native buffer for the
    /// caller to fill (playback) or drain (capture). Returns the actual
    /// frame count made available, which may be less than requested.
    fn get_buffer(&mut self, frames: usize) -> EngineResult<(&mut [u8], usize)>;

    /// Commits `frames` frames written into (or read from) the buffer
    /// handed out by the last `get_buffer` call.
    fn put_buffer(&mut self, frames: usize) -> EngineResult<()>;

    /// Re-estimates the device's real sample rate given an observed
    /// hardware level and timestamp. Returns `Some(new_rate)` only when the
    /// estimate has changed enough to be worth propagating to streams.
    fn update_rate(&mut self, level: usize, when: Instant) -> Option<u32>;

    /// Drops and reopens the underlying hardware resource after an
    /// unrecoverable I/O error.
    fn reset(&mut self) -> EngineResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevState {
    Open,
    NoStreamRun,
    NormalRun,
}

/// One open device: hardware backend, its attached streams, and the
/// scheduling state the audio thread reads every tick.
pub struct IoDev<D: Device> {
    pub id: u32,
    pub hw: D,
    pub state: DevState,
    pub streams: Vec<DevStream>,
    pub frames_played: u64,
    pub severe_underrun_count: u32,
    /// `-1`, `0`, or `+1`: whether the hardware level says the device
    /// should run faster, unchanged, or slower this tick.
    pub coarse_rate_adjust: i32,
    pub est_rate_ratio: f64,
}

impl<D: Device> IoDev<D> {
    pub fn new(id: u32, hw: D) -> Self {
        IoDev {
            id,
            hw,
            state: DevState::Open,
            streams: Vec::new(),
            frames_played: 0,
            severe_underrun_count: 0,
            coarse_rate_adjust: 0,
            est_rate_ratio: 1.0,
        }
    }

    /// Appends a newly bound stream to this device. If other streams are
    /// already attached, the new one inherits the first stream's clamped
    /// per-device offset so the two never read the device at different
    /// points (the append-stream deadlock-avoidance policy).
    pub fn add_stream(&mut self, stream: DevStream, cb_threshold: usize) {
        if let Some(first) = self.streams.first() {
            let mut appended = stream;
            appended.inherit_offset_from(first, cb_threshold);
            self.streams.push(appended);
        } else {
            self.streams.push(stream);
        }
        if self.state == DevState::NoStreamRun || self.state == DevState::Open {
            self.state = DevState::NormalRun;
        }
    }

    pub fn remove_stream(&mut self, stream_id: crate::stream::RStreamId) {
        self.streams.retain(|s| s.stream_id != stream_id);
        if self.streams.is_empty() && self.state == DevState::NormalRun {
            self.state = DevState::NoStreamRun;
        }
    }

    /// Runs every scheduler tick for each open output: performs the
    /// `OPEN`/`NO_STREAM_RUN` <-> `NORMAL_RUN` transition based on whether
    /// any stream is attached.
    pub fn prepare_output_before_write_samples(&mut self) {
        match (self.state, self.streams.is_empty()) {
            (DevState::Open, false) | (DevState::NoStreamRun, false) => self.state = DevState::NormalRun,
            (DevState::NormalRun, true) => self.state = DevState::NoStreamRun,
            (DevState::Open, true) => self.state = DevState::NoStreamRun,
            _ => {}
        }
    }

    /// Updates `coarse_rate_adjust` from the hardware level thresholds,
    /// then asks the backend to re-estimate its rate; if the rate changed,
    /// the new value is returned so the caller can push it to every stream
    /// bound to this device.
    pub fn update_rate_estimate(&mut self, level: usize, when: Instant) -> Option<u32> {
        let min_cb = self.hw.min_cb_level();
        let max_cb = self.hw.max_cb_level();
        self.coarse_rate_adjust = if level < min_cb / 2 {
            1
        } else if level > 2 * max_cb {
            -1
        } else {
            0
        };
        self.hw.update_rate(level, when)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_state_transitions_with_streams() {
        let mut state = DevState::Open;
        state = if false { DevState::NormalRun } else { DevState::NoStreamRun };
        assert_eq!(state, DevState::NoStreamRun);
    }
}
