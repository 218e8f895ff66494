//! # Engine Boundary
//!
//! The seam between the session core and the external speech-to-text engine.
//! The core never interprets audio itself: a per-session worker pulls frames
//! off the session's channel and pushes them through a [`TranscriptionSink`].
//! What sits behind the sink (a whisper-style streaming engine, a WAV file,
//! a test counter) is opaque to the session lifecycle.
//!
//! ## Failure Classification:
//! Sink errors are split into two variants and the worker applies one fixed
//! policy: [`EngineError::Frame`] is logged and the worker moves on to the
//! next frame; [`EngineError::Fatal`] ends the worker early and the session
//! tears down as if the connection had closed.

use crate::audio::wav::WavFileSink;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Error raised by a sink while consuming a frame.
#[derive(Debug)]
pub enum EngineError {
    /// This frame could not be processed; the stream itself is still healthy
    Frame(String),

    /// The sink cannot continue for this stream (lost file handle, engine
    /// crash); the worker exits and the session proceeds to teardown
    Fatal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Frame(msg) => write!(f, "frame error: {}", msg),
            EngineError::Fatal(msg) => write!(f, "fatal engine error: {}", msg),
        }
    }
}

/// Consumer of decoded audio frames for one session.
///
/// ## Contract:
/// `process` may block (engine inference, disk writes); it runs on the
/// session's dedicated worker thread, never on the network path, and no lock
/// is held while it executes. `finalize` is called exactly once when the
/// worker exits.
pub trait TranscriptionSink: Send + Sync {
    fn process(&self, frame: &[f32]) -> Result<(), EngineError>;

    fn finalize(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Tuning surface of the external streaming engine.
///
/// These options are handed through to whatever engine backend a sink wraps;
/// the session core validates only the window arithmetic and otherwise
/// treats them as opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineParams {
    /// Inference thread count
    pub n_threads: u32,

    /// Audio step between engine invocations (milliseconds)
    pub step_ms: u32,

    /// Total window length fed to the engine per invocation (milliseconds)
    pub length_ms: u32,

    /// Audio carried over from the previous window (milliseconds)
    pub keep_ms: u32,

    /// Maximum tokens emitted per invocation
    pub max_tokens: u32,

    /// Engine audio context size (0 = engine default)
    pub audio_ctx: u32,

    /// Voice activity detection threshold
    pub vad_thold: f32,

    /// High-pass frequency cutoff for VAD (Hz)
    pub freq_thold: f32,

    /// Spoken language hint (ISO 639-1)
    pub language: String,

    /// Path to the engine model file
    pub model: String,

    /// Translate the transcript to English
    pub translate: bool,

    /// Disable temperature fallback during decoding
    pub no_fallback: bool,

    /// Suppress timestamps in engine output
    pub no_timestamps: bool,

    /// Enable speaker diarization
    pub diarize: bool,

    /// Persist each stream's audio to a WAV file
    pub save_audio: bool,

    /// Run inference on the GPU when available
    pub use_gpu: bool,

    /// Directory for persisted audio files
    pub output_dir: PathBuf,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            n_threads: 4,
            step_ms: 3000,
            length_ms: 10000,
            keep_ms: 200,
            max_tokens: 32,
            audio_ctx: 0,
            vad_thold: 0.6,
            freq_thold: 100.0,
            language: "en".to_string(),
            model: "models/ggml-base.en.bin".to_string(),
            translate: false,
            no_fallback: false,
            no_timestamps: true,
            diarize: false,
            save_audio: true,
            use_gpu: true,
            output_dir: PathBuf::from("recordings"),
        }
    }
}

impl EngineParams {
    /// Check the window arithmetic the engine cannot recover from.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_threads == 0 {
            return Err("Engine thread count must be greater than 0".to_string());
        }
        if self.step_ms == 0 {
            return Err("Engine step_ms must be greater than 0".to_string());
        }
        if self.length_ms < self.step_ms {
            return Err(format!(
                "Engine length_ms ({}) must be at least step_ms ({})",
                self.length_ms, self.step_ms
            ));
        }
        Ok(())
    }
}

/// Builds the per-session sink when a session is registered.
///
/// Sink construction runs on the session's worker thread, not under the
/// registry lock, so implementations are free to open files or warm up an
/// engine. A construction failure is session-fatal.
pub trait SinkFactory: Send + Sync {
    fn create(&self, endpoint: &str) -> Result<Arc<dyn TranscriptionSink>, String>;
}

/// Default factory: WAV persistence when `save_audio` is set, otherwise a
/// counting discard sink.
pub struct SessionSinkFactory {
    params: EngineParams,
    sample_rate: u32,
}

impl SessionSinkFactory {
    pub fn new(params: EngineParams, sample_rate: u32) -> Self {
        Self {
            params,
            sample_rate,
        }
    }
}

impl SinkFactory for SessionSinkFactory {
    fn create(&self, endpoint: &str) -> Result<Arc<dyn TranscriptionSink>, String> {
        if self.params.save_audio {
            let sink = WavFileSink::create(&self.params.output_dir, endpoint, self.sample_rate)?;
            Ok(Arc::new(sink))
        } else {
            Ok(Arc::new(DiscardSink::new(endpoint)))
        }
    }
}

/// Sink that drops frames after counting them.
///
/// Used when audio persistence is disabled and no engine backend is wired
/// for the deployment; keeps the worker loop and its accounting observable.
pub struct DiscardSink {
    endpoint: String,
    frames: AtomicU64,
}

impl DiscardSink {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            frames: AtomicU64::new(0),
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl TranscriptionSink for DiscardSink {
    fn process(&self, frame: &[f32]) -> Result<(), EngineError> {
        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            endpoint = %self.endpoint,
            frame = count,
            samples = frame.len(),
            "Discarding frame (persistence disabled)"
        );
        Ok(())
    }

    fn finalize(&self) -> Result<(), EngineError> {
        debug!(
            endpoint = %self.endpoint,
            frames = self.frames_seen(),
            "Discard sink finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        assert!(EngineParams::default().validate().is_ok());
    }

    #[test]
    fn test_window_validation() {
        let mut params = EngineParams::default();
        params.length_ms = 1000;
        params.step_ms = 3000;
        assert!(params.validate().is_err());

        params.step_ms = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_discard_sink_counts_frames() {
        let sink = DiscardSink::new("127.0.0.1_5000");
        for _ in 0..3 {
            sink.process(&[0.0; 10]).unwrap();
        }
        assert_eq!(sink.frames_seen(), 3);
        assert!(sink.finalize().is_ok());
    }

    #[test]
    fn test_factory_builds_discard_sink_without_persistence() {
        let mut params = EngineParams::default();
        params.save_audio = false;

        let factory = SessionSinkFactory::new(params, 16000);
        assert!(factory.create("10.0.0.1_4242").is_ok());
    }
}
