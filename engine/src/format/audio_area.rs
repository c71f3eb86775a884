//! A multi-planar view over a PCM buffer. `AudioArea` never owns the sample
//! bytes itself — it borrows a backing buffer and describes, per channel,
//! where that channel's samples live and which semantic channel(s) they
//! carry. `copy` is the one operation every mix path in the engine funnels
//! through.

use super::sample::{Channel, PcmFormat, SampleFormat};
use super::sample_convert::{decode_sample, encode_sample};

#[derive(Debug, Clone, Copy)]
pub struct ChannelArea {
    /// OR of every semantic channel bit this plane carries.
    pub mask: u32,
    /// Byte stride between consecutive frames of this channel.
    pub step_bytes: usize,
    /// Byte offset of frame 0 of this channel within the backing buffer.
    pub base_offset: usize,
}

/// A view over `frames` frames across `channels.len()` channels, backed by
/// a caller-supplied byte buffer and a fixed sample format.
#[derive(Debug)]
pub struct AudioArea<'a> {
    pub buf: &'a mut [u8],
    pub format: SampleFormat,
    pub frames: usize,
    pub channels: Vec<ChannelArea>,
}

impl<'a> AudioArea<'a> {
    pub fn new(buf: &'a mut [u8], format: SampleFormat, frames: usize, channels: Vec<ChannelArea>) -> Self {
        AudioArea { buf, format, frames, channels }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Interleaved-layout helper: `step_bytes` is the full frame size and
    /// each channel's base offset is `sample_size * channel_index`. This is
    /// the only layout the engine produces; planar devices are out of scope.
    pub fn config_buf_pointers(fmt: &PcmFormat, base_buffer: &'a mut [u8]) -> Self {
        let sample_size = fmt.sample_format.bytes_per_sample();
        let frame_bytes = fmt.frame_bytes();
        let frames = if frame_bytes == 0 { 0 } else { base_buffer.len() / frame_bytes };
        let masks = Self::config_channels(fmt);
        let mut channels = Vec::with_capacity(fmt.num_channels);
        for i in 0..fmt.num_channels {
            channels.push(ChannelArea {
                mask: masks[i],
                step_bytes: frame_bytes,
                base_offset: i * sample_size,
            });
        }
        AudioArea::new(base_buffer, fmt.sample_format, frames, channels)
    }

    /// Computes the channel mask for every plane of a format, applying the
    /// mono-duplicate special case: a single-channel format whose layout
    /// doesn't explicitly carry `FC` or `FL` is treated as carrying both,
    /// so mono content is automatically picked up by a stereo destination
    /// via the mask-intersection rule in `copy`.
    pub fn config_channels(fmt: &PcmFormat) -> Vec<u32> {
        if fmt.num_channels == 1
            && (fmt.channel_layout.get(Channel::Fc).is_none()
                || fmt.channel_layout.get(Channel::Fl).is_none())
        {
            return vec![Channel::Fl.bit() | Channel::Fr.bit()];
        }
        (0..fmt.num_channels)
            .map(|i| fmt.channel_layout.mask_for_index(i))
            .collect()
    }

    /// Copies `min(src.frames - src_offset, self.frames - dst_offset)`
    /// frames from `src` into `self`. For every `(src_ch, dst_ch)` pair
    /// whose channel masks overlap, performs `dst += src * gain` with
    /// saturation in `self.format`. Returns the number of frames copied.
    pub fn copy(&mut self, dst_offset: usize, src: &AudioArea<'_>, src_offset: usize, gain: f32) -> usize {
        let ncopy = (src.frames - src_offset).min(self.frames - dst_offset);
        for s in &src.channels {
            for d in &self.channels {
                if s.mask & d.mask == 0 {
                    continue;
                }
                for frame in 0..ncopy {
                    let s_off = s.base_offset + (src_offset + frame) * s.step_bytes;
                    let d_off = d.base_offset + (dst_offset + frame) * d.step_bytes;
                    let sample = decode_sample(src.buf, s_off, src.format) as f32 * gain;
                    let existing = decode_sample(self.buf, d_off, self.format);
                    let mixed = existing as f64 + sample as f64;
                    let mixed = mixed.clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                    encode_sample(mixed, self.buf, d_off, self.format);
                }
            }
        }
        ncopy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::sample::ChannelLayout;

    fn s16_frame_bytes(frames: &[i16]) -> Vec<u8> {
        frames.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn mono_duplicates_into_stereo_via_mask_intersection() {
        let mono_fmt = PcmFormat::new(SampleFormat::S16Le, 48_000, 1, ChannelLayout::mono()).unwrap();
        let stereo_fmt = PcmFormat::new(SampleFormat::S16Le, 48_000, 2, ChannelLayout::stereo()).unwrap();

        let mut src_buf = s16_frame_bytes(&[100, -200, 300]);
        let mut dst_buf = vec![0u8; 3 * stereo_fmt.frame_bytes()];

        let src = AudioArea::config_buf_pointers(&mono_fmt, &mut src_buf);
        let mut dst = AudioArea::config_buf_pointers(&stereo_fmt, &mut dst_buf);
        let copied = dst.copy(0, &src, 0, 1.0);
        assert_eq!(copied, 3);

        let expect: [i16; 6] = [100, 100, -200, -200, 300, 300];
        for (i, e) in expect.iter().enumerate() {
            let v = i16::from_le_bytes([dst_buf[i * 2], dst_buf[i * 2 + 1]]);
            assert_eq!(v, *e);
        }
    }

    #[test]
    fn copy_respects_offsets_and_frame_bound() {
        let fmt = PcmFormat::new(SampleFormat::S16Le, 48_000, 1, ChannelLayout::mono()).unwrap();
        let mut src_buf = s16_frame_bytes(&[1, 2, 3, 4]);
        let mut dst_buf = s16_frame_bytes(&[0, 0]);
        let src = AudioArea::config_buf_pointers(&fmt, &mut src_buf);
        let mut dst = AudioArea::config_buf_pointers(&fmt, &mut dst_buf);
        let copied = dst.copy(0, &src, 2, 1.0);
        assert_eq!(copied, 2);
        assert_eq!(i16::from_le_bytes([dst_buf[0], dst_buf[1]]), 3);
        assert_eq!(i16::from_le_bytes([dst_buf[2], dst_buf[3]]), 4);
    }
}
