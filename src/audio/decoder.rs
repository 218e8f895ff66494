//! # Frame Decoding
//!
//! Converts raw binary WebSocket payloads into normalized float samples for
//! the transcription pipeline. Each incoming binary message is one frame of
//! little-endian, single-channel audio in one of two encodings:
//!
//! - **16-bit signed PCM**: every byte pair is an `i16` scaled to [-1.0, 1.0]
//! - **32-bit float**: bytes are reinterpreted directly as IEEE floats
//!
//! The deployed encoding is fixed by configuration (`audio.sample_format`);
//! the server does not try to detect it from the payload.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::str::FromStr;

/// Wire encoding of incoming audio samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit PCM, little-endian (2 bytes per sample)
    #[serde(rename = "pcm16")]
    PcmS16Le,

    /// IEEE 32-bit float, little-endian (4 bytes per sample)
    #[serde(rename = "f32")]
    F32Le,
}

impl SampleFormat {
    /// Size of one encoded sample in bytes.
    pub fn sample_width(&self) -> usize {
        match self {
            SampleFormat::PcmS16Le => 2,
            SampleFormat::F32Le => 4,
        }
    }

    /// Configuration string for this format.
    pub fn as_str(&self) -> &str {
        match self {
            SampleFormat::PcmS16Le => "pcm16",
            SampleFormat::F32Le => "f32",
        }
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pcm16" => Ok(SampleFormat::PcmS16Le),
            "f32" => Ok(SampleFormat::F32Le),
            other => Err(format!(
                "Unknown sample format '{}' (expected 'pcm16' or 'f32')",
                other
            )),
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode a raw byte buffer into normalized float samples.
///
/// ## Behavior:
/// - 16-bit mode: each `i16` is divided by 32768.0, landing in [-1.0, 1.0]
/// - float mode: samples are passed through unscaled
/// - Trailing bytes shorter than one sample width are discarded
/// - A zero-length buffer decodes to an empty vector
///
/// Truncated payloads are expected from some clients, so this never fails.
pub fn decode_samples(data: &[u8], format: SampleFormat) -> Vec<f32> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / format.sample_width());

    match format {
        SampleFormat::PcmS16Le => {
            // Read until fewer than 2 bytes remain; the remainder is dropped
            while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
                samples.push(sample as f32 / 32768.0);
            }
        }
        SampleFormat::F32Le => {
            while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
                samples.push(sample);
            }
        }
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_pcm16(values: &[i16]) -> Vec<u8> {
        let mut data = Vec::with_capacity(values.len() * 2);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data
    }

    #[test]
    fn test_pcm16_round_trip() {
        let original = vec![0i16, 16384, -16384, 32767, -32768, 1, -1];
        let decoded = decode_samples(&encode_pcm16(&original), SampleFormat::PcmS16Le);

        assert_eq!(decoded.len(), original.len());
        for (raw, sample) in original.iter().zip(decoded.iter()) {
            let rescaled = sample * 32768.0;
            let diff = (rescaled - *raw as f32).abs();
            assert!(
                diff < 1.0,
                "Round trip drifted more than one quantization step: {} vs {}",
                raw,
                rescaled
            );
        }
    }

    #[test]
    fn test_pcm16_normalized_range() {
        let extremes = encode_pcm16(&[i16::MAX, i16::MIN]);
        let decoded = decode_samples(&extremes, SampleFormat::PcmS16Le);
        assert!(decoded.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_odd_length_truncation() {
        let mut data = encode_pcm16(&[100, -200, 300]);
        let full = decode_samples(&data, SampleFormat::PcmS16Le);

        // One dangling byte decodes the same as not having it at all
        data.push(0xAB);
        let truncated = decode_samples(&data, SampleFormat::PcmS16Le);
        assert_eq!(full, truncated);
    }

    #[test]
    fn test_zero_length_input() {
        assert!(decode_samples(&[], SampleFormat::PcmS16Le).is_empty());
        assert!(decode_samples(&[], SampleFormat::F32Le).is_empty());
    }

    #[test]
    fn test_f32_passthrough_exact() {
        let original = vec![0.0f32, 0.5, -0.5, 1.0, -1.0, 0.123456];
        let mut data = Vec::new();
        for v in &original {
            data.extend_from_slice(&v.to_le_bytes());
        }

        let decoded = decode_samples(&data, SampleFormat::F32Le);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_f32_partial_sample_discarded() {
        let mut data = 0.25f32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0x01, 0x02, 0x03]); // 3 bytes short of a sample

        let decoded = decode_samples(&data, SampleFormat::F32Le);
        assert_eq!(decoded, vec![0.25]);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("pcm16".parse::<SampleFormat>().unwrap(), SampleFormat::PcmS16Le);
        assert_eq!("f32".parse::<SampleFormat>().unwrap(), SampleFormat::F32Le);
        assert!("mp3".parse::<SampleFormat>().is_err());
    }
}
