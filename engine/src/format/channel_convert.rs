//! Channel up/down-mix routines operating on S16LE-interleaved buffers, plus
//! the generic N×M matrix builder and the standalone channel-remix matrix
//! used by `CONFIG_GLOBAL_REMIX`.

use crate::error::{EngineError, EngineResult};
use crate::format::sample::{Channel, ChannelLayout};

/// `SL -> RL` and `SR -> RR` are the only substitutions the matrix builder
/// will accept when a destination format lacks a channel present on the
/// input; anything else with no exact match fails construction.
const SUBSTITUTIONS: &[(Channel, Channel)] = &[(Channel::Sl, Channel::Rl), (Channel::Sr, Channel::Rr)];

pub fn mono_to_stereo(src: &[i16], dst: &mut [i16], frames: usize) {
    for i in 0..frames {
        dst[2 * i] = src[i];
        dst[2 * i + 1] = src[i];
    }
}

/// 2 -> 1: straight add with saturation, not an average, matching the
/// "add with saturation" wording for the down-mix direction.
pub fn stereo_to_mono(src: &[i16], dst: &mut [i16], frames: usize) {
    for i in 0..frames {
        let sum = src[2 * i] as i32 + src[2 * i + 1] as i32;
        dst[i] = sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }
}

/// 1 -> 6: place into `FC` if the destination layout carries it; otherwise
/// split to `FL`/`FR` at half amplitude; otherwise fall back to channel 0.
pub fn mono_to_5_1(src: &[i16], dst: &mut [i16], frames: usize, out_layout: &ChannelLayout) {
    for frame in dst.chunks_mut(6).take(frames) {
        frame.fill(0);
    }
    for i in 0..frames {
        let base = i * 6;
        let s = src[i];
        if let Some(fc) = out_layout.get(Channel::Fc) {
            dst[base + fc] = s;
        } else if let (Some(fl), Some(fr)) = (out_layout.get(Channel::Fl), out_layout.get(Channel::Fr)) {
            dst[base + fl] = s / 2;
            dst[base + fr] = s / 2;
        } else {
            dst[base] = s;
        }
    }
}

/// 2 -> 6: place L/R into `FL`/`FR`; if absent, sum into `FC`; otherwise
/// fall back to the first two channels.
pub fn stereo_to_5_1(src: &[i16], dst: &mut [i16], frames: usize, out_layout: &ChannelLayout) {
    for frame in dst.chunks_mut(6).take(frames) {
        frame.fill(0);
    }
    for i in 0..frames {
        let base = i * 6;
        let l = src[2 * i];
        let r = src[2 * i + 1];
        if let (Some(fl), Some(fr)) = (out_layout.get(Channel::Fl), out_layout.get(Channel::Fr)) {
            dst[base + fl] = l;
            dst[base + fr] = r;
        } else if let Some(fc) = out_layout.get(Channel::Fc) {
            let sum = l as i32 + r as i32;
            dst[base + fc] = sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        } else {
            dst[base] = l;
            dst[base + 1] = r;
        }
    }
}

/// The 6 -> 2 weighted downmix matrix, indexed `[out_ch][in_ch]` over
/// `{FL,FR,RL,RR,FC,LFE}`. Coefficients are normalized per output row by
/// the sum of squares of the row (not a true L2 norm — no square root is
/// applied), which is deliberately preserved rather than "corrected" since
/// every other component in the pipeline was sized and tested against it.
const DOWNMIX_5_1_TO_STEREO: [[f32; 6]; 2] = [
    // FL,    FR,   RL,    RR,    FC,    LFE
    [1.0, 0.0, 0.866, 0.5, 0.707, 0.707],
    [0.0, 1.0, 0.5, 0.866, 0.707, 0.707],
];

fn normalize_buf(mtx: &mut [[f32; 6]; 2]) {
    for row in mtx.iter_mut() {
        let sum_sq: f32 = row.iter().map(|c| c * c).sum();
        if sum_sq > 1.0 {
            for c in row.iter_mut() {
                *c /= sum_sq;
            }
        }
    }
}

/// Full matrix downmix; used when the input carries an explicit 5.1 layout.
pub fn surround_5_1_to_stereo(src: &[i16], dst: &mut [i16], frames: usize) {
    let mut mtx = DOWNMIX_5_1_TO_STEREO;
    normalize_buf(&mut mtx);
    for i in 0..frames {
        let base_in = i * 6;
        let frame: [f32; 6] = std::array::from_fn(|c| src[base_in + c] as f32);
        for (out_ch, coeffs) in mtx.iter().enumerate() {
            let mixed: f32 = coeffs.iter().zip(frame.iter()).map(|(c, s)| c * s).sum();
            dst[i * 2 + out_ch] = mixed.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }
}

/// Shortcut used when the input has no explicit channel layout: ignore the
/// rear pair and halve the center into each side, rather than running the
/// full weighted matrix.
pub fn surround_5_1_to_stereo_shortcut(src: &[i16], dst: &mut [i16], frames: usize) {
    for i in 0..frames {
        let base = i * 6;
        let fl = src[base] as i32;
        let fr = src[base + 1] as i32;
        let fc_half = src[base + 4] as i32 / 2;
        dst[i * 2] = (fl + fc_half).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        dst[i * 2 + 1] = (fr + fc_half).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }
}

/// Uniform average of every input channel into every output channel; the
/// fallback for any `N -> M` pair with no more specific handling.
pub fn average_n_to_m(src: &[i16], dst: &mut [i16], frames: usize, in_ch: usize, out_ch: usize) {
    for i in 0..frames {
        let sum: i32 = (0..in_ch).map(|c| src[i * in_ch + c] as i32).sum();
        let avg = (sum / in_ch as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        for c in 0..out_ch {
            dst[i * out_ch + c] = avg;
        }
    }
}

/// An `out_ch x in_ch` matrix built by matching semantic channels between
/// two layouts, with a fixed substitution table for channels the
/// destination drops.
#[derive(Debug, Clone)]
pub struct ChannelMatrix {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Row-major `[out_ch][in_ch]`.
    pub coeffs: Vec<f32>,
}

impl ChannelMatrix {
    pub fn build(in_layout: &ChannelLayout, in_ch: usize, out_layout: &ChannelLayout, out_ch: usize) -> EngineResult<Self> {
        let mut coeffs = vec![0.0f32; out_ch * in_ch];
        for ch in Channel::ALL {
            let Some(src_idx) = in_layout.get(ch) else { continue };
            if let Some(dst_idx) = out_layout.get(ch) {
                coeffs[dst_idx * in_ch + src_idx] = 1.0;
                continue;
            }
            let substitute = SUBSTITUTIONS
                .iter()
                .find(|(from, _)| *from == ch)
                .and_then(|(_, to)| out_layout.get(*to));
            match substitute {
                Some(dst_idx) => coeffs[dst_idx * in_ch + src_idx] = 1.0,
                None => {
                    return Err(EngineError::InvalidArg(format!(
                        "conversion unsupported: channel {ch:?} present on input has no destination or substitute"
                    )));
                }
            }
        }
        Ok(ChannelMatrix { in_channels: in_ch, out_channels: out_ch, coeffs })
    }

    pub fn apply(&self, src: &[i16], dst: &mut [i16], frames: usize) {
        for i in 0..frames {
            for o in 0..self.out_channels {
                let row = &self.coeffs[o * self.in_channels..(o + 1) * self.in_channels];
                let sum: f32 = row.iter().enumerate().map(|(c, w)| w * src[i * self.in_channels + c] as f32).sum();
                dst[i * self.out_channels + o] = sum.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            }
        }
    }
}

/// A square N×N matrix applied in place, used by `CONFIG_GLOBAL_REMIX`.
/// Detects an identity matrix at construction so the caller can skip the
/// stage entirely when no remix is actually requested.
#[derive(Debug, Clone)]
pub struct ChannelRemixConverter {
    num_channels: usize,
    coeffs: Vec<f32>,
    is_identity: bool,
}

impl ChannelRemixConverter {
    pub fn new(num_channels: usize, coeffs: Vec<f32>) -> Self {
        assert_eq!(coeffs.len(), num_channels * num_channels);
        let is_identity = (0..num_channels).all(|r| {
            (0..num_channels).all(|c| {
                let expect = if r == c { 1.0 } else { 0.0 };
                (coeffs[r * num_channels + c] - expect).abs() < f32::EPSILON
            })
        });
        ChannelRemixConverter { num_channels, coeffs, is_identity }
    }

    pub fn is_identity(&self) -> bool {
        self.is_identity
    }

    pub fn remix(&self, buf: &mut [i16], frames: usize) {
        if self.is_identity {
            return;
        }
        let n = self.num_channels;
        let mut frame = vec![0f32; n];
        for i in 0..frames {
            for (c, slot) in frame.iter_mut().enumerate() {
                *slot = buf[i * n + c] as f32;
            }
            for r in 0..n {
                let row = &self.coeffs[r * n..(r + 1) * n];
                let mixed: f32 = row.iter().zip(frame.iter()).map(|(w, s)| w * s).sum();
                buf[i * n + r] = mixed.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_to_stereo_duplicates_samples() {
        let src = [100i16, -200, 300];
        let mut dst = [0i16; 6];
        mono_to_stereo(&src, &mut dst, 3);
        assert_eq!(dst, [100, 100, -200, -200, 300, 300]);
    }

    #[test]
    fn downmix_of_only_fl_yields_positive_left_and_zero_right() {
        let src = [13450i16, 0, 0, 0, 0, 0];
        let mut dst = [0i16; 2];
        surround_5_1_to_stereo(&src, &mut dst, 1);
        assert!(dst[0] > 0);
        assert_eq!(dst[1], 0);
    }

    #[test]
    fn remix_identity_matrix_is_detected() {
        let id = ChannelRemixConverter::new(2, vec![1.0, 0.0, 0.0, 1.0]);
        assert!(id.is_identity());
        let mut buf = [10i16, -10];
        id.remix(&mut buf, 1);
        assert_eq!(buf, [10, -10]);
    }

    #[test]
    fn matrix_build_rejects_unmappable_channel() {
        let mut in_layout = ChannelLayout::new();
        in_layout.set(Channel::Rc, Some(0));
        let out_layout = ChannelLayout::stereo();
        let res = ChannelMatrix::build(&in_layout, 1, &out_layout, 2);
        assert!(res.is_err());
    }

    #[test]
    fn matrix_build_accepts_surround_substitution() {
        let mut in_layout = ChannelLayout::new();
        in_layout.set(Channel::Sl, Some(0));
        let mut out_layout = ChannelLayout::new();
        out_layout.set(Channel::Rl, Some(0));
        let m = ChannelMatrix::build(&in_layout, 1, &out_layout, 1).unwrap();
        assert_eq!(m.coeffs, vec![1.0]);
    }
}
