//! PCM format types, per-sample conversion, channel mixing, resampling and
//! the `AudioArea` view that ties them together into the conversion
//! pipeline used by every stream in the engine.

pub mod audio_area;
pub mod byte_buffer;
pub mod channel_convert;
pub mod conversion;
pub mod linear_resampler;
pub mod sample;
pub mod sample_convert;

pub use audio_area::{AudioArea, ChannelArea};
pub use byte_buffer::ByteBuffer;
pub use conversion::{Direction, FormatConversion};
pub use linear_resampler::LinearResampler;
pub use sample::{Channel, ChannelLayout, PcmFormat, SampleFormat, frames_at_rate};
