//! The configurable conversion pipeline: up to five stages chained through
//! preallocated scratch buffers. Construction alone decides which stages
//! are active; `convert_frames` never allocates once built, aside from the
//! small per-call S16 views the polyphase stage needs to hand to `rubato`.

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::error::{EngineError, EngineResult};
use crate::format::channel_convert::{
    ChannelMatrix, average_n_to_m, mono_to_5_1, mono_to_stereo, stereo_to_5_1, stereo_to_mono,
    surround_5_1_to_stereo, surround_5_1_to_stereo_shortcut,
};
use crate::format::linear_resampler::LinearResampler;
use crate::format::sample::{Channel, ChannelLayout, PcmFormat, SampleFormat};
use crate::format::sample_convert::convert_buffer;

const SRC_QUALITY_SINC_LEN: usize = 128;
const SRC_QUALITY_OVERSAMPLING: usize = 128;

enum ChannelStage {
    MonoToStereo,
    StereoToMono,
    MonoTo51,
    StereoTo51,
    Surround51ToStereo { explicit_layout: bool },
    Matrix(ChannelMatrix),
    Average { out_ch: usize },
}

impl ChannelStage {
    fn out_channels(&self, _fallback: usize) -> usize {
        match self {
            ChannelStage::MonoToStereo => 2,
            ChannelStage::StereoToMono => 1,
            ChannelStage::MonoTo51 | ChannelStage::StereoTo51 => 6,
            ChannelStage::Surround51ToStereo { .. } => 2,
            ChannelStage::Matrix(m) => m.out_channels,
            ChannelStage::Average { out_ch } => *out_ch,
        }
    }

    fn apply(&self, src: &[i16], dst: &mut [i16], frames: usize, in_ch: usize, out_layout: &ChannelLayout) {
        match self {
            ChannelStage::MonoToStereo => mono_to_stereo(src, dst, frames),
            ChannelStage::StereoToMono => stereo_to_mono(src, dst, frames),
            ChannelStage::MonoTo51 => mono_to_5_1(src, dst, frames, out_layout),
            ChannelStage::StereoTo51 => stereo_to_5_1(src, dst, frames, out_layout),
            ChannelStage::Surround51ToStereo { explicit_layout } => {
                if *explicit_layout {
                    surround_5_1_to_stereo(src, dst, frames)
                } else {
                    surround_5_1_to_stereo_shortcut(src, dst, frames)
                }
            }
            ChannelStage::Matrix(m) => m.apply(src, dst, frames),
            ChannelStage::Average { out_ch } => average_n_to_m(src, dst, frames, in_ch, *out_ch),
        }
    }
}

fn choose_channel_stage(in_fmt: &PcmFormat, out_fmt: &PcmFormat) -> EngineResult<Option<ChannelStage>> {
    let layout_differs = in_fmt.num_channels > 2 && in_fmt.channel_layout != out_fmt.channel_layout;
    if in_fmt.num_channels == out_fmt.num_channels && !layout_differs {
        return Ok(None);
    }
    let stage = match (in_fmt.num_channels, out_fmt.num_channels) {
        (1, 2) => ChannelStage::MonoToStereo,
        (2, 1) => ChannelStage::StereoToMono,
        (1, 6) => ChannelStage::MonoTo51,
        (2, 6) => ChannelStage::StereoTo51,
        (6, 2) => ChannelStage::Surround51ToStereo {
            explicit_layout: in_fmt.channel_layout.get(Channel::Fl).is_some(),
        },
        (6, 6) => ChannelStage::Matrix(ChannelMatrix::build(&in_fmt.channel_layout, 6, &out_fmt.channel_layout, 6)?),
        (_, m) => ChannelStage::Average { out_ch: m },
    };
    Ok(Some(stage))
}

/// A polyphase sample-rate converter at a fixed mid-quality/low-latency
/// setting, wired over the canonical S16 interleaved representation by
/// deinterleaving into `rubato`'s planar f32 buffers and back.
struct PolyphaseSrc {
    resampler: SincFixedIn<f32>,
    num_channels: usize,
    planar_in: Vec<Vec<f32>>,
}

impl PolyphaseSrc {
    fn new(in_rate: u32, out_rate: u32, num_channels: usize, max_frames: usize) -> EngineResult<Self> {
        let params = SincInterpolationParameters {
            sinc_len: SRC_QUALITY_SINC_LEN,
            f_cutoff: 0.925,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: SRC_QUALITY_OVERSAMPLING,
            window: WindowFunction::Blackman2,
        };
        let ratio = out_rate as f64 / in_rate as f64;
        let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, max_frames, num_channels)
            .map_err(|e| EngineError::NoMem(format!("failed to build polyphase resampler: {e}")))?;
        Ok(PolyphaseSrc {
            resampler,
            num_channels,
            planar_in: vec![Vec::with_capacity(max_frames); num_channels],
        })
    }

    fn process(&mut self, src: &[i16], in_frames: usize, dst: &mut [i16], dst_capacity_frames: usize) -> EngineResult<usize> {
        for plane in &mut self.planar_in {
            plane.clear();
        }
        for i in 0..in_frames {
            for (c, plane) in self.planar_in.iter_mut().enumerate() {
                plane.push(src[i * self.num_channels + c] as f32 / 32768.0);
            }
        }
        let out = self
            .resampler
            .process(&self.planar_in, None)
            .map_err(|e| EngineError::InvalidArg(format!("polyphase resample failed: {e}")))?;
        let produced = out.first().map(|p| p.len()).unwrap_or(0).min(dst_capacity_frames);
        for i in 0..produced {
            for (c, plane) in out.iter().enumerate() {
                let v = (plane[i] * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32);
                dst[i * self.num_channels + c] = v as i16;
            }
        }
        Ok(produced)
    }
}

/// Construction direction: decides whether the linear resampler runs
/// before or after the polyphase stage. Input streams resample before
/// the device's native channel layout is touched, so the limit passed to
/// the polyphase stage stays in the input-rate domain; output streams
/// resample last, right before handing samples to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Configurable five-stage conversion pipeline between two PCM formats.
pub struct FormatConversion {
    in_fmt: PcmFormat,
    out_fmt: PcmFormat,
    max_frames: usize,
    pre_linear_resample: bool,
    channel_stage: Option<ChannelStage>,
    src: Option<PolyphaseSrc>,
    linear: LinearResampler,
    scratch: [Vec<u8>; 4],
}

impl FormatConversion {
    pub fn create(in_fmt: PcmFormat, out_fmt: PcmFormat, max_frames: usize, direction: Direction) -> EngineResult<Self> {
        let channel_count = in_fmt.num_channels.max(out_fmt.num_channels).max(1);
        let scratch_len = max_frames * 4 * channel_count;
        let channel_stage = choose_channel_stage(&in_fmt, &out_fmt)?;

        let src = if in_fmt.frame_rate != out_fmt.frame_rate {
            let mid_channels = channel_stage
                .as_ref()
                .map(|s| s.out_channels(out_fmt.num_channels))
                .unwrap_or(out_fmt.num_channels);
            Some(PolyphaseSrc::new(in_fmt.frame_rate, out_fmt.frame_rate, mid_channels, max_frames * 2)?)
        } else {
            None
        };

        let linear = LinearResampler::new(out_fmt.num_channels, out_fmt.frame_rate as f32, out_fmt.frame_rate as f32);

        Ok(FormatConversion {
            in_fmt,
            out_fmt,
            max_frames,
            pre_linear_resample: direction == Direction::Input,
            channel_stage,
            src,
            linear,
            scratch: std::array::from_fn(|_| vec![0u8; scratch_len]),
        })
    }

    /// Feeds a device clock-drift correction into the linear-resample
    /// stage: `target_rate` is this device's current estimated rate (Hz)
    /// for a non-master binding. The master binding never calls this, so
    /// its linear stage stays at the unity rate it was built with.
    pub fn set_drift_rate(&mut self, target_rate: f64) {
        self.linear.set_rates(self.out_fmt.frame_rate as f32, target_rate as f32);
    }

    /// Mirrors `cras_fmt_conversion_needed`: true when the linear resampler
    /// is active, or when more than zero real stages are chained.
    pub fn needed(&self) -> bool {
        self.linear.needed() || self.stage_count() > 0
    }

    fn stage_count(&self) -> usize {
        let mut n = 0;
        if !self.in_fmt.sample_format.is_canonical() {
            n += 1;
        }
        if !self.out_fmt.sample_format.is_canonical() {
            n += 1;
        }
        if self.channel_stage.is_some() {
            n += 1;
        }
        if self.src.is_some() {
            n += 1;
        }
        n
    }

    pub fn in_frames_to_out(&self, frames: u32) -> u32 {
        let pre_active = self.pre_linear_resample && self.linear.needed();
        let post_active = !self.pre_linear_resample && self.linear.needed();
        let after_pre = if pre_active { self.linear.in_frames_to_out(frames) } else { frames };
        let after_src = match &self.src {
            Some(_) => {
                let ratio = self.out_fmt.frame_rate as f64 / self.in_fmt.frame_rate as f64;
                (after_pre as f64 * ratio).ceil() as u32
            }
            None => after_pre,
        };
        if post_active { self.linear.in_frames_to_out(after_src) } else { after_src }
    }

    pub fn out_frames_to_in(&self, frames: u32) -> u32 {
        let pre_active = self.pre_linear_resample && self.linear.needed();
        let post_active = !self.pre_linear_resample && self.linear.needed();
        let before_post = if post_active { self.linear.out_frames_to_in(frames) } else { frames };
        let before_src = match &self.src {
            Some(_) => {
                let ratio = self.in_fmt.frame_rate as f64 / self.out_fmt.frame_rate as f64;
                (before_post as f64 * ratio).ceil() as u32
            }
            None => before_post,
        };
        if pre_active { self.linear.out_frames_to_in(before_src) } else { before_src }
    }

    /// Converts `*in_frames` frames of `input` (encoded as `in_fmt`) into
    /// `output` (encoded as `out_fmt`, capacity `out_capacity` frames).
    /// Returns the number of output frames produced and updates
    /// `*in_frames` to the number of input frames actually consumed.
    pub fn convert_frames(&mut self, input: &[u8], in_frames: &mut u32, output: &mut [u8], out_capacity: u32) -> EngineResult<u32> {
        if self.src.is_none() {
            *in_frames = (*in_frames).min(out_capacity);
        }
        let consumed_in_frames = *in_frames;

        let mut cur_channels = self.in_fmt.num_channels;
        let mut cur16: Vec<i16> = if self.in_fmt.sample_format.is_canonical() {
            bytes_to_i16(input, *in_frames as usize * cur_channels)
        } else {
            let mut s16_bytes = vec![0u8; *in_frames as usize * cur_channels * 2];
            convert_buffer(input, &mut s16_bytes, *in_frames as usize * cur_channels, self.in_fmt.sample_format, SampleFormat::S16Le);
            bytes_to_i16(&s16_bytes, *in_frames as usize * cur_channels)
        };
        let mut cur_frames = *in_frames as usize;

        // Pre-linear-resample: input direction only, before the channel
        // stage, so the resample limit is still expressed against the
        // device's native channel count and input rate.
        if self.pre_linear_resample && self.linear.needed() {
            let mut dst = vec![0i16; self.max_frames * cur_channels];
            let mut consumed = cur_frames as u32;
            let produced = self.linear.resample(&cur16, &mut consumed, &mut dst, self.max_frames as u32);
            dst.truncate(produced as usize * cur_channels);
            cur16 = dst;
            cur_frames = produced as usize;
        }

        // Channel up/down-mix.
        if let Some(stage) = &self.channel_stage {
            let out_ch = stage.out_channels(self.out_fmt.num_channels);
            let mut dst = vec![0i16; cur_frames * out_ch];
            stage.apply(&cur16, &mut dst, cur_frames, cur_channels, &self.out_fmt.channel_layout);
            cur16 = dst;
            cur_channels = out_ch;
        }

        // Polyphase SRC.
        if let Some(src_stage) = &mut self.src {
            let mut dst = vec![0i16; out_capacity as usize * cur_channels];
            let produced = src_stage.process(&cur16, cur_frames, &mut dst, out_capacity as usize)?;
            dst.truncate(produced * cur_channels);
            cur16 = dst;
            cur_frames = produced;
        }

        // Post-linear-resample: output direction only, after SRC, still
        // on the output channel count.
        if !self.pre_linear_resample && self.linear.needed() {
            let mut dst = vec![0i16; out_capacity as usize * cur_channels];
            let mut consumed = cur_frames as u32;
            let produced = self.linear.resample(&cur16, &mut consumed, &mut dst, out_capacity);
            dst.truncate(produced as usize * cur_channels);
            cur16 = dst;
            cur_frames = produced as usize;
        }

        let produced_frames = cur_frames.min(out_capacity as usize);
        let produced_samples = produced_frames * cur_channels;
        if self.out_fmt.sample_format.is_canonical() {
            i16_to_bytes(&cur16[..produced_samples], output);
        } else {
            let mut s16_bytes = vec![0u8; produced_samples * 2];
            i16_to_bytes(&cur16[..produced_samples], &mut s16_bytes);
            convert_buffer(&s16_bytes, output, produced_samples, SampleFormat::S16Le, self.out_fmt.sample_format);
        }

        *in_frames = consumed_in_frames;
        Ok(produced_frames as u32)
    }
}

fn bytes_to_i16(bytes: &[u8], num_samples: usize) -> Vec<i16> {
    (0..num_samples).map(|i| i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]])).collect()
}

fn i16_to_bytes(src: &[i16], dst: &mut [u8]) {
    for (i, s) in src.iter().enumerate() {
        dst[i * 2..i * 2 + 2].copy_from_slice(&s.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_fmt(rate: u32) -> PcmFormat {
        PcmFormat::new(SampleFormat::S16Le, rate, 2, ChannelLayout::stereo()).unwrap()
    }

    fn mono_fmt(rate: u32) -> PcmFormat {
        PcmFormat::new(SampleFormat::S16Le, rate, 1, ChannelLayout::mono()).unwrap()
    }

    #[test]
    fn identity_format_is_not_needed_and_is_a_noop() {
        let fmt = stereo_fmt(48_000);
        let mut conv = FormatConversion::create(fmt.clone(), fmt, 256, Direction::Output).unwrap();
        assert!(!conv.needed());

        let input: Vec<u8> = [1i16, 2, 3, 4].iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut output = vec![0u8; input.len()];
        let mut in_frames = 2u32;
        let produced = conv.convert_frames(&input, &mut in_frames, &mut output, 2).unwrap();
        assert_eq!(produced, 2);
        assert_eq!(output, input);
    }

    #[test]
    fn rate_change_alone_marks_conversion_needed() {
        let conv = FormatConversion::create(stereo_fmt(48_000), stereo_fmt(44_100), 1024, Direction::Output).unwrap();
        assert!(conv.needed());
    }

    #[test]
    fn mono_to_stereo_pipeline_duplicates_samples() {
        let mut conv = FormatConversion::create(mono_fmt(48_000), stereo_fmt(48_000), 16, Direction::Output).unwrap();
        let input: Vec<u8> = [100i16, -200, 300].iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut output = vec![0u8; 3 * 2 * 2];
        let mut in_frames = 3u32;
        let produced = conv.convert_frames(&input, &mut in_frames, &mut output, 3).unwrap();
        assert_eq!(produced, 3);
        let samples: Vec<i16> = output.chunks(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();
        assert_eq!(samples, vec![100, 100, -200, -200, 300, 300]);
    }

    #[test]
    fn forty_eight_to_forty_four_one_bounds_output_length() {
        let mut conv = FormatConversion::create(stereo_fmt(48_000), stereo_fmt(44_100), 2048, Direction::Output).unwrap();
        let q = conv.in_frames_to_out(1024);
        assert!((940..=942).contains(&q), "expected 940..=942, got {q}");
        let p = conv.out_frames_to_in(q);
        assert!((1024i64 - p as i64).abs() <= 1);
    }
}
