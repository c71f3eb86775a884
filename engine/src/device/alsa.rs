//! ALSA-backed `Device` implementation. Follows the same `HwParams`
//! negotiation and `State::XRun` recovery pattern as the mixer's own ALSA
//! backend, but opened non-blocking and read through the raw byte I/O path
//! rather than the typed `io_i16`/`io_i32` helpers, since the engine already
//! works in its own canonical S16LE encoding end to end.

use std::time::Instant;

use alsa::pcm::{Access, Format, HwParams, PCM, State};
use alsa::{Direction as AlsaDirection, ValueOr};

use crate::device::iodev::{Device, HwTimestamp};
use crate::error::{EngineError, EngineResult};
use crate::format::{ChannelLayout, PcmFormat, SampleFormat};
use crate::stream::Direction as StreamDirection;

pub struct AlsaDevice {
    pcm: PCM,
    direction: StreamDirection,
    format: PcmFormat,
    buffer_frames: usize,
    min_cb_level: usize,
    max_cb_level: usize,
    scratch: Vec<u8>,
    device_name: String,
}

impl AlsaDevice {
    pub fn open(device_name: &str, direction: StreamDirection, rate: u32, num_channels: usize, period_frames: usize, nperiods: usize) -> EngineResult<Self> {
        let alsa_dir = match direction {
            StreamDirection::Playback => AlsaDirection::Playback,
            StreamDirection::Capture => AlsaDirection::Capture,
        };
        let pcm = PCM::new(device_name, alsa_dir, true).map_err(|e| EngineError::IoError(format!("opening ALSA device '{device_name}': {e}")))?;

        let buffer_frames = period_frames.saturating_mul(nperiods.max(1));
        {
            let hwp = HwParams::any(&pcm).map_err(|e| EngineError::IoError(format!("ALSA hw_params: {e}")))?;
            hwp.set_access(Access::RWInterleaved).map_err(|e| EngineError::IoError(e.to_string()))?;
            hwp.set_format(Format::s16()).map_err(|e| EngineError::IoError(e.to_string()))?;
            hwp.set_rate(rate, ValueOr::Nearest).map_err(|e| EngineError::IoError(e.to_string()))?;
            hwp.set_channels(num_channels as u32).map_err(|e| EngineError::IoError(e.to_string()))?;
            hwp.set_period_size(period_frames as i64, ValueOr::Nearest).map_err(|e| EngineError::IoError(e.to_string()))?;
            hwp.set_buffer_size(buffer_frames as i64).map_err(|e| EngineError::IoError(e.to_string()))?;
            pcm.hw_params(&hwp).map_err(|e| EngineError::IoError(format!("applying ALSA hw_params: {e}")))?;
        }
        pcm.prepare().map_err(|e| EngineError::IoError(format!("ALSA prepare: {e}")))?;

        let actual_rate = pcm
            .hw_params_current()
            .and_then(|hwp| hwp.get_rate())
            .map_err(|e| EngineError::IoError(e.to_string()))?;

        let layout = if num_channels == 2 { ChannelLayout::stereo() } else { ChannelLayout::mono() };
        let format = PcmFormat::new(SampleFormat::S16Le, actual_rate, num_channels, layout)?;

        Ok(AlsaDevice {
            pcm,
            direction,
            format,
            buffer_frames,
            min_cb_level: period_frames,
            max_cb_level: buffer_frames,
            scratch: vec![0u8; buffer_frames * num_channels * 2],
            device_name: device_name.to_string(),
        })
    }
}

impl Device for AlsaDevice {
    fn direction(&self) -> StreamDirection {
        self.direction
    }

    fn format(&self) -> &PcmFormat {
        &self.format
    }

    fn buffer_size(&self) -> usize {
        self.buffer_frames
    }

    fn min_cb_level(&self) -> usize {
        self.min_cb_level
    }

    fn max_cb_level(&self) -> usize {
        self.max_cb_level
    }

    fn frames_queued(&mut self) -> EngineResult<HwTimestamp> {
        match self.pcm.avail_update() {
            Ok(avail) => {
                let queued = self.buffer_frames.saturating_sub(avail.max(0) as usize);
                Ok(HwTimestamp { level: queued, when: Instant::now() })
            }
            Err(e) => {
                if self.pcm.state() == State::XRun {
                    return Err(EngineError::Xrun(format!("{} xrun: {e}", self.device_name)));
                }
                Err(EngineError::IoError(format!("{} avail_update: {e}", self.device_name)))
            }
        }
    }

    fn get_buffer(&mut self, frames: usize) -> EngineResult<(&mut [u8], usize)> {
        let frame_bytes = self.format.frame_bytes();
        let n = frames.min(self.scratch.len() / frame_bytes.max(1));
        if self.direction == StreamDirection::Playback {
            self.scratch[..n * frame_bytes].fill(0);
        }
        Ok((&mut self.scratch[..n * frame_bytes], n))
    }

    fn put_buffer(&mut self, frames: usize) -> EngineResult<()> {
        let frame_bytes = self.format.frame_bytes();
        let result = match self.direction {
            StreamDirection::Playback => self.pcm.io_i16().and_then(|io| {
                let samples: Vec<i16> = self.scratch[..frames * frame_bytes]
                    .chunks(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect();
                io.writei(&samples)
            }),
            StreamDirection::Capture => self.pcm.io_i16().and_then(|io| {
                let mut samples = vec![0i16; frames * frame_bytes / 2];
                io.readi(&mut samples)?;
                for (i, s) in samples.iter().enumerate() {
                    self.scratch[i * 2..i * 2 + 2].copy_from_slice(&s.to_le_bytes());
                }
                Ok(frames)
            }),
        };

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if self.pcm.state() == State::XRun {
                    let _ = self.pcm.prepare();
                    return Err(EngineError::Xrun(format!("{} xrun on transfer: {e}", self.device_name)));
                }
                Err(EngineError::IoError(format!("{} io transfer failed: {e}", self.device_name)))
            }
        }
    }

    fn update_rate(&mut self, _level: usize, _when: Instant) -> Option<u32> {
        None
    }

    fn reset(&mut self) -> EngineResult<()> {
        self.pcm.drop().ok();
        self.pcm.prepare().map_err(|e| EngineError::IoError(format!("{} reset prepare: {e}", self.device_name)))
    }
}
