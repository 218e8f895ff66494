//! # Transcription Worker
//!
//! The long-running task bound to one session's audio channel. Each session
//! gets exactly one worker, spawned when the session is registered and
//! joined during teardown. The worker drives the external engine through the
//! [`TranscriptionSink`] seam; because the engine call can block for a full
//! inference pass, the loop runs on a dedicated blocking thread rather than
//! an async task.
//!
//! ## Cancellation:
//! Level-triggered through the channel's sticky stop flag. The engine call
//! itself is not preempted, so cancellation latency is at most one frame's
//! processing time. A `None` from `consume` is the only exit signal the
//! worker needs; teardown joins the task afterwards.

use crate::audio::channel::AudioChannel;
use crate::transcription::engine::{EngineError, SinkFactory};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Launch the worker for one session.
///
/// Must be called from within the server runtime. The handle resolves once
/// the worker has observed the stop signal (or hit a fatal sink error) and
/// returned; teardown awaits it before the session is discarded.
pub fn spawn_worker(
    channel: Arc<AudioChannel>,
    factory: Arc<dyn SinkFactory>,
    endpoint: String,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || run_worker(channel, factory, endpoint))
}

fn run_worker(channel: Arc<AudioChannel>, factory: Arc<dyn SinkFactory>, endpoint: String) {
    let sink = match factory.create(&endpoint) {
        Ok(sink) => sink,
        Err(err) => {
            error!(endpoint = %endpoint, "Failed to create transcription sink: {}", err);
            // No consumer will ever drain this channel; stop it so late
            // frames are dropped instead of piling up until disconnect.
            channel.stop();
            return;
        }
    };

    debug!(endpoint = %endpoint, "Transcription worker started");

    let mut frames: u64 = 0;
    let mut samples: u64 = 0;
    let mut frame_errors: u64 = 0;

    while let Some(frame) = channel.consume() {
        // The channel lock is released here; the sink may block as long as
        // it needs without stalling produce()
        match sink.process(&frame) {
            Ok(()) => {
                frames += 1;
                samples += frame.len() as u64;
            }
            Err(EngineError::Frame(msg)) => {
                frame_errors += 1;
                warn!(endpoint = %endpoint, "Dropping frame: {}", msg);
            }
            Err(EngineError::Fatal(msg)) => {
                error!(endpoint = %endpoint, "Engine failure ends this session: {}", msg);
                channel.stop();
                break;
            }
        }
    }

    if let Err(err) = sink.finalize() {
        warn!(endpoint = %endpoint, "Sink finalization failed: {}", err);
    }

    info!(
        endpoint = %endpoint,
        frames,
        samples,
        frame_errors,
        "Transcription worker exited"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::engine::TranscriptionSink;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingSink {
        frames: AtomicU64,
        samples: AtomicU64,
        finalized: AtomicU64,
    }

    impl TranscriptionSink for CountingSink {
        fn process(&self, frame: &[f32]) -> Result<(), EngineError> {
            self.frames.fetch_add(1, Ordering::SeqCst);
            self.samples.fetch_add(frame.len() as u64, Ordering::SeqCst);
            Ok(())
        }

        fn finalize(&self) -> Result<(), EngineError> {
            self.finalized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FixedSinkFactory(Arc<dyn TranscriptionSink>);

    impl SinkFactory for FixedSinkFactory {
        fn create(&self, _endpoint: &str) -> Result<Arc<dyn TranscriptionSink>, String> {
            Ok(self.0.clone())
        }
    }

    /// Fails every frame after the first, fatally on the third.
    struct FlakySink {
        frames: AtomicU64,
    }

    impl TranscriptionSink for FlakySink {
        fn process(&self, _frame: &[f32]) -> Result<(), EngineError> {
            match self.frames.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(()),
                1 => Err(EngineError::Frame("transient".to_string())),
                _ => Err(EngineError::Fatal("engine crashed".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_worker_consumes_all_frames_then_exits() {
        let channel = Arc::new(AudioChannel::new());
        let sink = Arc::new(CountingSink::default());
        let factory = Arc::new(FixedSinkFactory(sink.clone()));

        let handle = spawn_worker(channel.clone(), factory, "test:1".to_string());

        for _ in 0..5 {
            channel.produce(vec![0.1; 10]);
        }
        channel.stop();
        handle.await.unwrap();

        assert_eq!(sink.frames.load(Ordering::SeqCst), 5);
        assert_eq!(sink.samples.load(Ordering::SeqCst), 50);
        assert_eq!(sink.finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_frame_error_is_recoverable_fatal_is_not() {
        let channel = Arc::new(AudioChannel::new());
        let sink = Arc::new(FlakySink {
            frames: AtomicU64::new(0),
        });
        let factory = Arc::new(FixedSinkFactory(sink.clone() as Arc<dyn TranscriptionSink>));

        let handle = spawn_worker(channel.clone(), factory, "test:2".to_string());

        for _ in 0..10 {
            channel.produce(vec![0.0; 4]);
        }
        handle.await.unwrap();

        // Worker exited on the fatal error, well before frame 10, and
        // stopped the channel on its way out
        assert_eq!(sink.frames.load(Ordering::SeqCst), 3);
        assert!(channel.is_stopped());
    }

    #[tokio::test]
    async fn test_failed_sink_creation_stops_channel() {
        struct FailingFactory;
        impl SinkFactory for FailingFactory {
            fn create(&self, _endpoint: &str) -> Result<Arc<dyn TranscriptionSink>, String> {
                Err("no disk".to_string())
            }
        }

        let channel = Arc::new(AudioChannel::new());
        let handle = spawn_worker(channel.clone(), Arc::new(FailingFactory), "test:3".to_string());
        handle.await.unwrap();

        assert!(channel.is_stopped());
    }
}
