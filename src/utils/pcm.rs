//! PCM sample conversion helpers.
//!
//! Inbound audio fragments are fixed-bit-depth signed PCM (16-bit
//! little-endian) at the provider's sample rate. Conversion to the playback
//! device's float representation is a linear normalization - never a
//! resample; the sample rate passes through unchanged or playback pitch
//! shifts.

use std::time::Duration;

/// Full-scale magnitude of a 16-bit signed sample.
const PCM16_FULL_SCALE: f32 = 32768.0;

/// Convert 16-bit signed little-endian PCM bytes to normalized f32 samples.
///
/// A trailing odd byte (truncated sample) is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / PCM16_FULL_SCALE)
        .collect()
}

/// Wall-clock duration of a mono pcm16 buffer at the given sample rate.
pub fn frame_duration(byte_len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let samples = (byte_len / 2) as u64;
    Duration::from_micros(samples * 1_000_000 / sample_rate as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_to_f32_normalization() {
        let bytes = [
            0x00, 0x00, // 0
            0xFF, 0x7F, // i16::MAX
            0x00, 0x80, // i16::MIN
        ];
        let samples = pcm16_to_f32(&bytes);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - (i16::MAX as f32 / 32768.0)).abs() < f32::EPSILON);
        assert_eq!(samples[2], -1.0);
    }

    #[test]
    fn test_pcm16_to_f32_ignores_trailing_byte() {
        let samples = pcm16_to_f32(&[0x00, 0x00, 0xAB]);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_frame_duration() {
        // 24000 samples of mono pcm16 at 24 kHz = exactly one second.
        assert_eq!(frame_duration(48000, 24000), Duration::from_secs(1));
        assert_eq!(frame_duration(480, 24000), Duration::from_millis(10));
        assert_eq!(frame_duration(100, 0), Duration::ZERO);
    }
}
