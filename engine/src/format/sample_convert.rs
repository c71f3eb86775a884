//! Per-sample integer format conversions to and from the canonical S16LE
//! representation. Every routine here operates on whole interleaved buffers
//! so callers can shell out to one of these and move on to the next stage.

use super::sample::SampleFormat;

/// Decodes one sample at `format` from `buf[offset..]` into a signed 32-bit
/// value scaled so that `S16` round-trips exactly and wider formats keep
/// their extra precision in the low bits.
pub fn decode_sample(buf: &[u8], offset: usize, format: SampleFormat) -> i32 {
    match format {
        SampleFormat::U8 => (buf[offset] as i32 - 128) << 8,
        SampleFormat::S16Le => i16::from_le_bytes([buf[offset], buf[offset + 1]]) as i32,
        SampleFormat::S24Le => {
            let raw = i32::from_le_bytes([
                buf[offset],
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
            ]);
            // Low 24 bits hold the sample; sign-extend from bit 23.
            (raw << 8) >> 8
        }
        SampleFormat::S24_3Le => {
            let b = [buf[offset], buf[offset + 1], buf[offset + 2], 0];
            let raw = i32::from_le_bytes(b);
            (raw << 8) >> 8
        }
        SampleFormat::S32Le => i32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]),
    }
}

/// Encodes `value` (same scale convention as `decode_sample`) into `format`
/// at `buf[offset..]`, saturating to the target's representable range.
pub fn encode_sample(value: i32, buf: &mut [u8], offset: usize, format: SampleFormat) {
    match format {
        SampleFormat::U8 => {
            let v = value.clamp(i16::MIN as i32, i16::MAX as i32);
            buf[offset] = ((v >> 8) + 128) as u8;
        }
        SampleFormat::S16Le => {
            let v = value.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            buf[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::S24Le => {
            let v = value.clamp(-(1 << 23), (1 << 23) - 1);
            buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::S24_3Le => {
            let v = value.clamp(-(1 << 23), (1 << 23) - 1);
            let b = v.to_le_bytes();
            buf[offset] = b[0];
            buf[offset + 1] = b[1];
            buf[offset + 2] = b[2];
        }
        SampleFormat::S32Le => {
            buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// Converts every sample in `src` (encoded as `from`) into `dst` (encoded as
/// `to`), one channel-interleaved stream of `num_samples` total samples.
pub fn convert_buffer(
    src: &[u8],
    dst: &mut [u8],
    num_samples: usize,
    from: SampleFormat,
    to: SampleFormat,
) {
    let from_sz = from.bytes_per_sample();
    let to_sz = to.bytes_per_sample();
    for i in 0..num_samples {
        let v = decode_sample(src, i * from_sz, from);
        encode_sample(v, dst, i * to_sz, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s16_round_trips_through_every_integer_format() {
        let samples: [i16; 5] = [0, 1, -1, i16::MAX, i16::MIN];
        for fmt in [
            SampleFormat::U8,
            SampleFormat::S24Le,
            SampleFormat::S24_3Le,
            SampleFormat::S32Le,
        ] {
            let mut widened = vec![0u8; samples.len() * fmt.bytes_per_sample()];
            let src: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            convert_buffer(&src, &mut widened, samples.len(), SampleFormat::S16Le, fmt);

            let mut back = vec![0u8; samples.len() * 2];
            convert_buffer(&widened, &mut back, samples.len(), fmt, SampleFormat::S16Le);

            for (i, expected) in samples.iter().enumerate() {
                let got = i16::from_le_bytes([back[i * 2], back[i * 2 + 1]]);
                if fmt == SampleFormat::U8 {
                    // U8 only keeps the top 8 bits: document the truncation
                    // rather than expect exact equality.
                    assert!((got as i32 - *expected as i32).abs() <= 256);
                } else {
                    assert_eq!(got, *expected, "format {fmt:?} failed to round-trip");
                }
            }
        }
    }

    #[test]
    fn s24_3le_packs_into_exactly_three_bytes() {
        let mut buf = [0u8; 3];
        encode_sample(0x00_12_34, &mut buf, 0, SampleFormat::S24_3Le);
        assert_eq!(buf, [0x34, 0x12, 0x00]);
        let back = decode_sample(&buf, 0, SampleFormat::S24_3Le);
        assert_eq!(back, 0x00_12_34);
    }
}
