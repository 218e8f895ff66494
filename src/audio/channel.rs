//! # Audio Handoff Channel
//!
//! The handoff queue between the WebSocket delivery path and a session's
//! transcription worker. One channel per session: the network side calls
//! `produce` (never blocks), the worker thread calls `consume` (blocks until
//! a frame arrives or the channel is stopped).
//!
//! ## Shutdown Contract:
//! `stop()` sets a sticky flag and wakes every blocked consumer. Frames
//! enqueued before the stop are still delivered in order; once the queue is
//! drained, `consume` returns `None` forever. Frames produced after the stop
//! are dropped.
//!
//! ## Concurrency:
//! The expected shape is one producer (the connection's message handler) and
//! one consumer (the worker), but the mutex discipline is safe under
//! concurrent producers as well.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// One decoded unit of audio: the normalized samples from one binary message.
pub type AudioFrame = Vec<f32>;

struct ChannelState {
    queue: VecDeque<AudioFrame>,
    stopped: bool,
}

/// FIFO queue of audio frames with a sticky stop signal.
///
/// ## Memory:
/// The queue is unbounded; `produce` must stay non-blocking so the network
/// delivery path never stalls. A consumer that falls behind grows the queue.
pub struct AudioChannel {
    state: Mutex<ChannelState>,
    available: Condvar,
}

impl AudioChannel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                queue: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append a frame to the tail of the queue and wake one waiting consumer.
    ///
    /// Never blocks beyond the O(1) lock acquisition. If the channel has been
    /// stopped, the frame is dropped: the session is already tearing down and
    /// its registry entry is gone.
    pub fn produce(&self, frame: AudioFrame) {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return;
        }
        state.queue.push_back(frame);
        drop(state);
        self.available.notify_one();
    }

    /// Block until a frame is available or the channel is stopped.
    ///
    /// ## Returns:
    /// - **Some(frame)**: the oldest enqueued frame
    /// - **None**: the channel is stopped and the queue has drained; every
    ///   later call returns `None` immediately
    ///
    /// Frames enqueued before `stop()` are delivered in order before the
    /// terminal `None`.
    pub fn consume(&self) -> Option<AudioFrame> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(frame) = state.queue.pop_front() {
                return Some(frame);
            }
            if state.stopped {
                return None;
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Signal shutdown. Idempotent and sticky.
    ///
    /// Wakes **all** blocked consumers, not just one, so no thread is left
    /// parked on an empty queue during teardown.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        drop(state);
        self.available.notify_all();
    }

    /// Whether `stop()` has been called.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AudioChannel {
    fn default() -> Self {
        Self::new()
    }
}
