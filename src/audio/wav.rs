//! # WAV Persistence
//!
//! Sequential-write WAV sink for sessions that persist their audio. One file
//! per session, named from the connection's remote endpoint with `:` replaced
//! by `_` and suffixed `.wav`, written as 16-bit mono PCM at the configured
//! sample rate.

use crate::transcription::engine::{EngineError, TranscriptionSink};
use hound::{SampleFormat as WavSampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// File name for a session's recording.
///
/// `127.0.0.1:52644` becomes `127.0.0.1_52644.wav`.
pub fn recording_file_name(endpoint: &str) -> String {
    format!("{}.wav", endpoint.replace(':', "_"))
}

/// Appends normalized float samples to a WAV file as 16-bit PCM.
///
/// ## Thread Safety:
/// The writer sits behind a Mutex; in practice only the session's worker
/// thread touches it, one frame at a time.
pub struct WavFileSink {
    path: PathBuf,
    writer: Mutex<Option<WavWriter<BufWriter<File>>>>,
}

impl WavFileSink {
    /// Open a new recording file under `output_dir`.
    ///
    /// Creates the directory if needed. An existing recording for the same
    /// endpoint is overwritten; endpoints are unique while a connection is
    /// registered.
    pub fn create(output_dir: &Path, endpoint: &str, sample_rate: u32) -> Result<Self, String> {
        std::fs::create_dir_all(output_dir)
            .map_err(|e| format!("Failed to create output directory: {}", e))?;

        let path = output_dir.join(recording_file_name(endpoint));
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: WavSampleFormat::Int,
        };

        let writer = WavWriter::create(&path, spec)
            .map_err(|e| format!("Failed to create {}: {}", path.display(), e))?;

        info!(path = %path.display(), sample_rate, "Recording session audio");

        Ok(Self {
            path,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TranscriptionSink for WavFileSink {
    fn process(&self, frame: &[f32]) -> Result<(), EngineError> {
        let mut guard = self.writer.lock().unwrap();
        let writer = guard
            .as_mut()
            .ok_or_else(|| EngineError::Fatal("Recording already finalized".to_string()))?;

        for &sample in frame {
            let scaled = sample * 32768.0;
            let pcm = scaled.clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(pcm).map_err(|e| {
                EngineError::Fatal(format!("Write to {} failed: {}", self.path.display(), e))
            })?;
        }

        Ok(())
    }

    fn finalize(&self) -> Result<(), EngineError> {
        let writer = self.writer.lock().unwrap().take();
        if let Some(writer) = writer {
            writer.finalize().map_err(|e| {
                EngineError::Fatal(format!(
                    "Failed to finalize {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
            info!(path = %self.path.display(), "Recording closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_file_name() {
        assert_eq!(recording_file_name("127.0.0.1:52644"), "127.0.0.1_52644.wav");
        assert_eq!(
            recording_file_name("[::1]:9002"),
            "[__1]_9002.wav"
        );
    }

    #[test]
    fn test_sequential_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let sink = WavFileSink::create(dir.path(), "10.1.2.3:4000", 16000).unwrap();

        sink.process(&[0.0, 0.25, -0.25]).unwrap();
        sink.process(&[0.5, -0.5]).unwrap();
        sink.finalize().unwrap();

        let reader = hound::WavReader::open(sink.path()).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.bits_per_sample, 16);

        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], 8192);
        assert_eq!(samples[2], -8192);
    }

    #[test]
    fn test_process_after_finalize_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let sink = WavFileSink::create(dir.path(), "10.1.2.3:4001", 16000).unwrap();

        sink.finalize().unwrap();
        match sink.process(&[0.1]) {
            Err(EngineError::Fatal(_)) => {}
            other => panic!("Expected fatal error, got {:?}", other),
        }
    }

    #[test]
    fn test_samples_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let sink = WavFileSink::create(dir.path(), "10.1.2.3:4002", 16000).unwrap();

        sink.process(&[2.0, -2.0]).unwrap();
        sink.finalize().unwrap();

        let reader = hound::WavReader::open(sink.path()).unwrap();
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![32767, -32768]);
    }
}
