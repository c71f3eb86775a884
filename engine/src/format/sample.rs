//! PCM sample formats and the fixed semantic channel set.

use crate::error::{EngineError, EngineResult};

/// Sample formats understood by the conversion pipeline. `S16Le` is the
/// canonical internal format: every conversion stage operates on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    S16Le,
    /// 24 bits of sample held in the low bits of a 4 byte little-endian word.
    S24Le,
    /// 24 bits packed into exactly 3 bytes, little-endian.
    S24_3Le,
    S32Le,
}

impl SampleFormat {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le => 2,
            SampleFormat::S24_3Le => 3,
            SampleFormat::S24Le | SampleFormat::S32Le => 4,
        }
    }

    pub const fn is_canonical(self) -> bool {
        matches!(self, SampleFormat::S16Le)
    }
}

/// The fixed set of semantic channel positions, in the bit order defined by
/// the wire format (`FL` is bit 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    Fl = 0,
    Fr = 1,
    Rl = 2,
    Rr = 3,
    Fc = 4,
    Lfe = 5,
    Sl = 6,
    Sr = 7,
    Rc = 8,
    Flc = 9,
    Frc = 10,
}

pub const NUM_CHANNELS: usize = 11;

impl Channel {
    pub const ALL: [Channel; NUM_CHANNELS] = [
        Channel::Fl,
        Channel::Fr,
        Channel::Rl,
        Channel::Rr,
        Channel::Fc,
        Channel::Lfe,
        Channel::Sl,
        Channel::Sr,
        Channel::Rc,
        Channel::Flc,
        Channel::Frc,
    ];

    pub const fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// `channel_layout[channel] == index_in_frame`, or `-1` if the channel is
/// absent from this format. Mirrors the wire layout in section 6 of the
/// interface contract rather than a `HashMap`, since it is small, fixed-size
/// and hot on the mix path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout([i8; NUM_CHANNELS]);

impl Default for ChannelLayout {
    fn default() -> Self {
        ChannelLayout([-1; NUM_CHANNELS])
    }
}

impl ChannelLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ch: Channel) -> Option<usize> {
        let v = self.0[ch as usize];
        if v < 0 { None } else { Some(v as usize) }
    }

    pub fn set(&mut self, ch: Channel, index: Option<usize>) {
        self.0[ch as usize] = match index {
            None => -1,
            Some(i) => i as i8,
        };
    }

    /// `true` if `ch` is present and resolves to `index`.
    pub fn maps_to(&self, ch: Channel, index: usize) -> bool {
        self.get(ch) == Some(index)
    }

    /// OR of every channel bit whose layout value equals `index`, i.e. the
    /// channel-mask of a single interleaved position.
    pub fn mask_for_index(&self, index: usize) -> u32 {
        let mut mask = 0u32;
        for ch in Channel::ALL {
            if self.maps_to(ch, index) {
                mask |= ch.bit();
            }
        }
        mask
    }

    pub fn validate(&self, num_channels: usize) -> EngineResult<()> {
        for ch in Channel::ALL {
            if let Some(idx) = self.get(ch)
                && idx >= num_channels
            {
                return Err(EngineError::InvalidArg(format!(
                    "channel layout index {idx} out of range for {num_channels} channels"
                )));
            }
        }
        Ok(())
    }

    /// Stereo identity layout: `FL=0, FR=1`, all others absent.
    pub fn stereo() -> Self {
        let mut l = Self::default();
        l.set(Channel::Fl, Some(0));
        l.set(Channel::Fr, Some(1));
        l
    }

    /// Mono layout with the sole channel mapped to `FC`.
    pub fn mono() -> Self {
        let mut l = Self::default();
        l.set(Channel::Fc, Some(0));
        l
    }

    /// 5.1 identity layout `FL,FR,RL,RR,FC,LFE`.
    pub fn surround_5_1() -> Self {
        let mut l = Self::default();
        l.set(Channel::Fl, Some(0));
        l.set(Channel::Fr, Some(1));
        l.set(Channel::Rl, Some(2));
        l.set(Channel::Rr, Some(3));
        l.set(Channel::Fc, Some(4));
        l.set(Channel::Lfe, Some(5));
        l
    }
}

/// A complete PCM format: sample encoding, rate, channel count and layout.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFormat {
    pub sample_format: SampleFormat,
    pub frame_rate: u32,
    pub num_channels: usize,
    pub channel_layout: ChannelLayout,
}

impl PcmFormat {
    pub fn new(
        sample_format: SampleFormat,
        frame_rate: u32,
        num_channels: usize,
        channel_layout: ChannelLayout,
    ) -> EngineResult<Self> {
        if num_channels == 0 || num_channels > NUM_CHANNELS {
            return Err(EngineError::InvalidArg(format!(
                "num_channels {num_channels} out of range"
            )));
        }
        channel_layout.validate(num_channels)?;
        Ok(Self {
            sample_format,
            frame_rate,
            num_channels,
            channel_layout,
        })
    }

    pub fn frame_bytes(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.num_channels
    }

    /// A format identical to `self` but using the canonical S16LE sample
    /// format, same rate/channels/layout.
    pub fn as_s16(&self) -> Self {
        Self {
            sample_format: SampleFormat::S16Le,
            frame_rate: self.frame_rate,
            num_channels: self.num_channels,
            channel_layout: self.channel_layout,
        }
    }
}

/// Convert a frame count at `from_rate` into the equivalent count at
/// `to_rate`, rounding up so a scheduler never under-requests.
pub fn frames_at_rate(frames: u32, from_rate: u32, to_rate: u32) -> u32 {
    if from_rate == to_rate || frames == 0 {
        return frames;
    }
    let scaled = (frames as u64) * (to_rate as u64);
    ((scaled + from_rate as u64 - 1) / from_rate as u64) as u32
}
