//! The (rstream, device) binding. Holds only an `RStreamId` — a weak
//! reference, per the engine's ownership rule that `RStream`s live in
//! `AudioThread`'s table and nothing else ever borrows them directly.

use std::time::{Duration, Instant};

use crate::error::EngineResult;
use crate::format::{AudioArea, ByteBuffer, Direction as ConvDirection, FormatConversion, PcmFormat};
use crate::stream::rstream::{MonoTime, RStream, RStreamId, StreamFlags};

const CAPTURE_FUZZ: Duration = Duration::from_millis(1);

/// Per-device binding state for one stream. `dev_rate`/`dev_rate_ratio`
/// mirror the device's own estimated clock; only `stream` ever owns the
/// `SharedMemoryRegion` and format — this struct just tracks where this
/// device's view of it currently sits.
pub struct DevStream {
    pub dev_id: u32,
    pub stream_id: RStreamId,
    conv: Option<FormatConversion>,
    conv_buffer: Option<ByteBuffer>,
    conv_buffer_size_frames: usize,
    dev_fmt: PcmFormat,
    dev_rate: u32,
    /// Per-device write offset into the rstream's shm, in frames. Used to
    /// align multiple devices sharing one stream so none outruns another.
    pub dev_offset: usize,
}

impl DevStream {
    pub fn create(dev_id: u32, stream: &RStream, dev_fmt: PcmFormat, max_frames: usize, direction: ConvDirection) -> EngineResult<Self> {
        let needs_conv = stream.format.sample_format != dev_fmt.sample_format
            || stream.format.num_channels != dev_fmt.num_channels
            || stream.format.frame_rate != dev_fmt.frame_rate
            || stream.format.channel_layout != dev_fmt.channel_layout;

        let (conv, conv_buffer, conv_buffer_size_frames) = if needs_conv {
            let fc = FormatConversion::create(stream.format.clone(), dev_fmt.clone(), max_frames, direction)?;
            let buf_frames = max_frames * 4;
            let bb = ByteBuffer::create(buf_frames * dev_fmt.frame_bytes());
            (Some(fc), Some(bb), buf_frames)
        } else {
            (None, None, 0)
        };

        Ok(DevStream {
            dev_id,
            stream_id: stream.id,
            conv,
            conv_buffer,
            conv_buffer_size_frames,
            dev_fmt,
            dev_rate: stream.format.frame_rate,
            dev_offset: 0,
        })
    }

    pub fn needs_conversion(&self) -> bool {
        self.conv.is_some()
    }

    /// Copies the first stream's clamped dev-offset onto a newly appended
    /// stream on the same device, preventing the two from reading the
    /// device at different points.
    pub fn inherit_offset_from(&mut self, first: &DevStream, cb_threshold: usize) {
        self.dev_offset = first.dev_offset.min(cb_threshold);
    }

    pub fn set_dev_rate(&mut self, dev_rate: u32, dev_rate_ratio: f64, master_rate_ratio: f64, coarse_rate_adjust: i32, stream: &mut RStream) {
        const COARSE_STEP_HZ: f64 = 3.0;
        self.dev_rate = dev_rate;
        if stream.is_master(self.dev_id) {
            stream.sleep_interval = Duration::from_secs_f64(stream.cb_threshold as f64 / (stream.format.frame_rate as f64 * dev_rate_ratio));
        } else {
            let target = dev_rate as f64 * dev_rate_ratio / master_rate_ratio + COARSE_STEP_HZ * coarse_rate_adjust as f64;
            if let Some(conv) = &mut self.conv {
                conv.set_drift_rate(target);
            }
        }
    }

    /// Renders `num_to_write` frames of this stream from its shm into
    /// `dst` (already at `fmt`). Returns frames actually mixed.
    pub fn mix(&mut self, stream: &mut RStream, dst: &mut [u8], dst_offset_frames: usize, num_to_write: usize) -> usize {
        let frame_bytes = self.dev_fmt.frame_bytes();
        let mut written = 0usize;

        while written < num_to_write {
            let (readable, frames) = stream.shm.readable_frames(self.dev_offset);
            if frames == 0 {
                break;
            }
            let want = frames.min(num_to_write - written);
            let gain = if stream.shm.mute() { 0.0 } else { stream.shm.volume_scaler() };

            if let (Some(conv), Some(conv_buf)) = (&mut self.conv, &mut self.conv_buffer) {
                let mut in_frames = want as u32;
                let stream_frame_bytes = stream.format.frame_bytes();
                let mut scratch = vec![0u8; want * frame_bytes];
                let produced = conv
                    .convert_frames(&readable[..want * stream_frame_bytes], &mut in_frames, &mut scratch, want as u32)
                    .unwrap_or(0) as usize;
                scratch.truncate(produced * frame_bytes);
                let _ = conv_buf; // conv_buffer exists for the capture path's two-pass split; playback mixes straight through.
                mix_into(dst, (dst_offset_frames + written) * frame_bytes, &scratch, produced, frame_bytes, gain);
                self.dev_offset += in_frames as usize;
                written += produced;
            } else {
                mix_into(dst, (dst_offset_frames + written) * frame_bytes, readable, want, frame_bytes, gain);
                self.dev_offset += want;
                written += want;
            }
            stream.shm.buffer_read(want.min(frames));
        }
        written
    }

    /// Captures `area` (the device's hardware-format view) into this
    /// stream, starting `area_offset` frames in. Direct `AudioArea::copy`
    /// when no conversion is needed; otherwise converts into the internal
    /// byte buffer first, then copies whole converted frames into the
    /// client's shm in a second pass — the split that lets producer and
    /// consumer run at different rates after SRC.
    pub fn capture(&mut self, stream: &mut RStream, area: &AudioArea<'_>, area_offset: usize, software_gain_scaler: f32) -> usize {
        let frame_bytes = stream.format.frame_bytes();

        if self.conv.is_none() {
            let (writeable, cap_frames) = stream.shm.writeable_frames_slice();
            let mut dst_area = AudioArea::config_buf_pointers(&stream.format, writeable);
            dst_area.frames = cap_frames;
            let copied = dst_area.copy(0, area, area_offset, software_gain_scaler);
            stream.shm.buffer_written(copied);
            self.dev_offset += copied;
            return copied;
        }

        let conv_buf = self.conv_buffer.as_mut().expect("conversion path always owns a byte buffer");
        let src_frame_bytes = self.dev_fmt.frame_bytes();
        let src_bytes = area.frames.saturating_sub(area_offset) * src_frame_bytes;
        let mut src_scratch = vec![0u8; src_bytes];
        {
            let mut tmp_area = AudioArea::config_buf_pointers(&self.dev_fmt, &mut src_scratch);
            tmp_area.frames = area.frames.saturating_sub(area_offset);
            tmp_area.copy(0, area, area_offset, software_gain_scaler);
        }

        let max_out_frames = self.conv_buffer_size_frames;
        let mut out_scratch = vec![0u8; max_out_frames * frame_bytes];
        let mut in_frames = (area.frames.saturating_sub(area_offset)) as u32;
        let conv = self.conv.as_mut().unwrap();
        let produced = conv.convert_frames(&src_scratch, &mut in_frames, &mut out_scratch, max_out_frames as u32).unwrap_or(0);
        conv_buf.write_slice(&out_scratch[..produced as usize * frame_bytes]);

        let avail = conv_buf.readable_bytes() / frame_bytes;
        let (writeable, cap_frames) = stream.shm.writeable_frames_slice();
        let to_copy = avail.min(cap_frames);
        let mut tmp = vec![0u8; to_copy * frame_bytes];
        let read = conv_buf.read_slice(&mut tmp);
        writeable[..read].copy_from_slice(&tmp[..read]);
        stream.shm.buffer_written(to_copy);
        self.dev_offset += in_frames as usize;
        to_copy
    }

    pub fn capture_avail(&self, stream: &RStream) -> usize {
        let shm_writeable = stream.buffer_frames.saturating_sub(stream.shm.frames_queued());
        match (&self.conv, &self.conv_buffer) {
            (Some(conv), Some(buf)) => {
                let buf_free_frames = buf.available_bytes() / self.dev_fmt.frame_bytes().max(1);
                conv.out_frames_to_in(shm_writeable.min(buf_free_frames) as u32) as usize
            }
            _ => shm_writeable,
        }
    }

    pub fn cb_threshold_dev_frames(&self, stream: &RStream) -> usize {
        match &self.conv {
            Some(conv) => conv.out_frames_to_in(stream.cb_threshold as u32) as usize,
            None => stream.cb_threshold,
        }
    }

    /// Posts a ready capture buffer to the client if either the stream
    /// allows bulk posting and has a full callback's worth queued, or the
    /// scheduled callback time has elapsed (within a 1ms fuzz).
    pub fn capture_update_rstream(&self, stream: &mut RStream, now: MonoTime) -> bool {
        let bulk_ready = stream.flags.contains(StreamFlags::BULK_AUDIO_OK) && stream.shm.frames_queued() >= stream.cb_threshold;
        let time_ready = now.0 + CAPTURE_FUZZ >= stream.next_cb_ts.0;

        if bulk_ready || time_ready {
            stream.shm.set_callback_pending(true);
            stream.advance_next_cb(now);
            true
        } else {
            false
        }
    }

    /// Computes this stream's wake-up time for one capture tick: enough
    /// queued device frames to satisfy the remaining callback threshold,
    /// or the time at which they will be, bounded by the scheduled
    /// callback time.
    pub fn wake_time(&self, stream: &RStream, curr_level: usize, level_tstamp: Instant) -> Instant {
        let needed_stream_frames = stream.cb_threshold.saturating_sub(stream.shm.frames_queued()).saturating_sub(self.dev_offset);
        let needed_dev_frames = crate::format::frames_at_rate(needed_stream_frames as u32, stream.format.frame_rate, self.dev_rate) as usize;

        if curr_level >= needed_dev_frames {
            return level_tstamp;
        }
        let remaining = needed_dev_frames - curr_level;
        let wait = Duration::from_secs_f64(remaining as f64 / self.dev_rate.max(1) as f64);
        level_tstamp + wait
    }
}

fn mix_into(dst: &mut [u8], dst_offset_bytes: usize, src: &[u8], frames: usize, frame_bytes: usize, gain: f32) {
    use crate::format::sample_convert::{decode_sample, encode_sample};
    use crate::format::SampleFormat;

    let n = frame_bytes / 2;
    for i in 0..frames {
        for c in 0..n {
            let s_off = i * frame_bytes + c * 2;
            let d_off = dst_offset_bytes + i * frame_bytes + c * 2;
            if d_off + 2 > dst.len() || s_off + 2 > src.len() {
                continue;
            }
            let sample = decode_sample(src, s_off, SampleFormat::S16Le) as f32 * gain;
            let existing = decode_sample(dst, d_off, SampleFormat::S16Le);
            let mixed = (existing as f64 + sample as f64).clamp(i32::MIN as f64, i32::MAX as f64) as i32;
            encode_sample(mixed, dst, d_off, SampleFormat::S16Le);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};
    use crate::stream::rstream::{Direction as StreamDirection, StreamFlags};

    fn fmt() -> PcmFormat {
        PcmFormat::new(SampleFormat::S16Le, 48_000, 2, ChannelLayout::stereo()).unwrap()
    }

    #[test]
    fn identity_format_dev_stream_needs_no_conversion() {
        let stream = RStream::new(RStreamId(1), StreamDirection::Playback, fmt(), 1024, 256, StreamFlags::empty());
        let ds = DevStream::create(1, &stream, fmt(), 256, ConvDirection::Output).unwrap();
        assert!(!ds.needs_conversion());
    }

    #[test]
    fn second_stream_inherits_first_streams_clamped_offset() {
        let stream = RStream::new(RStreamId(1), StreamDirection::Capture, fmt(), 1024, 256, StreamFlags::empty());
        let mut first = DevStream::create(1, &stream, fmt(), 256, ConvDirection::Input).unwrap();
        first.dev_offset = 500;
        let mut second = DevStream::create(2, &stream, fmt(), 256, ConvDirection::Input).unwrap();
        second.inherit_offset_from(&first, 256);
        assert_eq!(second.dev_offset, 256);
    }
}
