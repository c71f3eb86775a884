//! The command/ack protocol between the control thread and the audio
//! thread. Modeled the same way the rest of the engine models cross-thread
//! messages: a flat enum of variants each carrying its own payload, sent
//! over a channel rather than framed as wire bytes — there is no separate
//! client process here, so nothing needs to be serialized.

use crate::error::EngineError;
use crate::format::PcmFormat;
use crate::stream::{Direction, RStreamId, StreamFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampRequest {
    MuteUp,
    MuteDown,
    StartPlaybackUp,
}

#[derive(Debug, Clone, Default)]
pub struct ThreadInfo {
    pub devices: Vec<DeviceInfo>,
    pub streams: Vec<StreamInfo>,
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub dev_id: u32,
    pub frames_played: u64,
    pub severe_underrun_count: u32,
    pub num_streams: usize,
}

#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub stream_id: RStreamId,
    pub frames_queued: usize,
    pub num_overruns: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DrainResult {
    pub millis_remaining: u64,
}

/// A request to open a device, carrying everything the audio thread needs
/// to construct it; actual hardware open/close happens on the control
/// thread, which then posts `ADD_OPEN_DEV`/`RM_OPEN_DEV`.
#[derive(Debug, Clone)]
pub struct NewStream {
    pub id: RStreamId,
    pub direction: Direction,
    pub format: PcmFormat,
    pub buffer_frames: usize,
    pub cb_threshold: usize,
    pub flags: StreamFlags,
}

#[derive(Debug, Clone)]
pub enum Command {
    AddOpenDev { dev_id: u32 },
    RmOpenDev { dev_id: u32 },
    AddStream { stream: NewStream, dev_ids: Vec<u32> },
    DisconnectStream { stream_id: RStreamId, dev_id: u32 },
    DrainStream { stream_id: RStreamId },
    ConfigGlobalRemix { num_channels: usize, coeffs: Vec<f32> },
    DevStartRamp { dev_id: u32, request: RampRequest },
    DumpThreadInfo,
    RemoveCallback { fd: std::os::raw::c_int },
    Stop,
}

#[derive(Debug, Clone)]
pub enum Ack {
    Ok,
    Drain(DrainResult),
    /// The remix converter that was active before this swap; the caller
    /// frees it once the ack round-trip completes.
    OldRemix { num_channels: usize, coeffs: Vec<f32> },
    ThreadInfo(ThreadInfo),
    Err(String),
}

impl From<EngineError> for Ack {
    fn from(e: EngineError) -> Self {
        Ack::Err(e.to_string())
    }
}
