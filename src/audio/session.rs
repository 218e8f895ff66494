//! # Session Lifecycle and Registry
//!
//! One session per WebSocket connection: the session owns the audio handoff
//! channel and the handle of the worker task draining it. The registry is the
//! single point of creation, lookup, and removal, constructed once at startup
//! and shared through the application state.
//!
//! ## Session Lifecycle:
//! 1. **Created**: session constructed, channel allocated, worker launched
//! 2. **Running**: registered, accepting audio from the connection
//! 3. **Stopping**: unregistered, channel stopped, waiting for the worker
//! 4. **Closed**: worker has exited; the session can be discarded
//!
//! ## Teardown Ordering:
//! Remove the registry entry first (no new frames can be produced against
//! the identity), then stop the channel, then await the worker, and only
//! then drop the session. The worker holds its own `Arc` to the channel, so
//! the channel outlives the worker under every interleaving.

use crate::audio::channel::{AudioChannel, AudioFrame};
use crate::transcription::engine::SinkFactory;
use crate::transcription::worker::spawn_worker;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

/// Opaque token identifying one network connection.
///
/// Minted by the transport adapter when a connection opens; never reused
/// while the connection is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Current lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Constructed but not yet visible in the registry
    Created,
    /// Registered and accepting audio
    Running,
    /// Unregistered; channel stopped, worker still draining
    Stopping,
    /// Worker has exited; terminal
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Closed => "closed",
        }
    }
}

/// Ingest accounting for one session.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    /// Frames handed to the channel
    pub frames: u64,
    /// Raw payload bytes received from the connection
    pub bytes: u64,
}

/// One active audio stream: identity, channel, and worker handle.
pub struct AudioSession {
    /// Registry key for this connection
    id: ConnectionId,

    /// Remote address of the connection; used for diagnostics and to derive
    /// recording file names
    endpoint: String,

    /// Handoff queue shared with the worker
    channel: Arc<AudioChannel>,

    /// Worker handle, taken exactly once during teardown
    worker: Mutex<Option<JoinHandle<()>>>,

    status: RwLock<SessionStatus>,

    ingest: RwLock<IngestStats>,

    pub created_at: DateTime<Utc>,
}

impl AudioSession {
    fn new(
        id: ConnectionId,
        endpoint: String,
        channel: Arc<AudioChannel>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            endpoint,
            channel,
            worker: Mutex::new(Some(worker)),
            status: RwLock::new(SessionStatus::Created),
            ingest: RwLock::new(IngestStats::default()),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read().unwrap()
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.write().unwrap() = status;
    }

    /// Hand one decoded frame to the worker.
    ///
    /// Non-blocking; called from the connection's message handler.
    /// `raw_bytes` is the size of the wire payload the frame came from.
    pub fn produce(&self, frame: AudioFrame, raw_bytes: usize) {
        {
            let mut ingest = self.ingest.write().unwrap();
            ingest.frames += 1;
            ingest.bytes += raw_bytes as u64;
        }
        self.channel.produce(frame);
    }

    pub fn ingest_stats(&self) -> IngestStats {
        *self.ingest.read().unwrap()
    }

    /// Frames queued but not yet consumed by the worker.
    pub fn backlog(&self) -> usize {
        self.channel.len()
    }

    pub fn duration_seconds(&self) -> f64 {
        let age = Utc::now().signed_duration_since(self.created_at);
        age.num_milliseconds() as f64 / 1000.0
    }

    /// Stop the channel and wait for the worker to exit.
    ///
    /// Called by whoever received this session from [`SessionRegistry::remove`].
    /// Once this returns, the worker has observed the stop signal and
    /// finished; dropping the session afterwards is safe. Calling it a
    /// second time is a no-op.
    pub async fn teardown(&self) {
        self.set_status(SessionStatus::Stopping);
        self.channel.stop();

        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                error!(session = %self.id, "Worker task did not exit cleanly: {}", err);
            }
        }

        self.set_status(SessionStatus::Closed);
        let stats = self.ingest_stats();
        info!(
            session = %self.id,
            endpoint = %self.endpoint,
            frames = stats.frames,
            bytes = stats.bytes,
            "Session closed"
        );
    }
}

/// Diagnostic snapshot of one session.
#[derive(Debug, serde::Serialize)]
pub struct SessionInfo {
    pub id: ConnectionId,
    pub endpoint: String,
    pub status: String,
    pub frames: u64,
    pub bytes: u64,
    pub backlog: usize,
    pub age_seconds: f64,
}

/// Aggregate view of the registry for the health endpoints.
#[derive(Debug, serde::Serialize)]
pub struct RegistrySummary {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub status_counts: HashMap<String, usize>,
    pub total_frames: u64,
    pub total_bytes: u64,
}

/// Concurrent mapping from connection identity to session.
///
/// ## Locking:
/// One RwLock around the map; critical sections only mutate or read the map
/// and are O(1) in the session count (the summary walk excepted). Stopping
/// and joining workers always happens outside the lock.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Arc<AudioSession>>>,
    max_sessions: usize,
    sink_factory: Arc<dyn SinkFactory>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize, sink_factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            sink_factory,
        }
    }

    /// Return the session for `id`, creating and registering it if absent.
    ///
    /// Creation is atomic under the map's write lock: concurrent calls for
    /// the same identity all observe the same single session. The worker is
    /// launched here, bound to the fresh channel; launching is a queue push,
    /// so the lock is never held across anything blocking.
    ///
    /// ## Errors:
    /// When the concurrent session limit is reached.
    pub fn find_or_create(
        &self,
        id: ConnectionId,
        endpoint: &str,
    ) -> Result<Arc<AudioSession>, String> {
        let mut sessions = self.sessions.write().unwrap();

        if let Some(existing) = sessions.get(&id) {
            return Ok(existing.clone());
        }

        if sessions.len() >= self.max_sessions {
            return Err(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_sessions
            ));
        }

        let channel = Arc::new(AudioChannel::new());
        let worker = spawn_worker(
            channel.clone(),
            self.sink_factory.clone(),
            endpoint.to_string(),
        );

        let session = Arc::new(AudioSession::new(id, endpoint.to_string(), channel, worker));
        session.set_status(SessionStatus::Running);
        sessions.insert(id, session.clone());

        info!(session = %id, endpoint = %endpoint, "Session registered");
        Ok(session)
    }

    /// Read-only lookup. Absent is not an error: messages can race the close
    /// of their own connection and are then dropped by the caller.
    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<AudioSession>> {
        self.sessions.read().unwrap().get(id).cloned()
    }

    /// Remove and return the session, transferring ownership to the caller.
    ///
    /// The caller must run [`AudioSession::teardown`] before discarding it.
    /// Removing an unknown identity is a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<AudioSession>> {
        self.sessions.write().unwrap().remove(id)
    }

    /// Remove every session and tear each one down in turn.
    ///
    /// Used on server shutdown. Sessions are pulled out of the map first so
    /// the lock is released before any worker is joined.
    pub async fn drain(&self) {
        let sessions: Vec<Arc<AudioSession>> = {
            let mut map = self.sessions.write().unwrap();
            map.drain().map(|(_, session)| session).collect()
        };

        if sessions.is_empty() {
            return;
        }

        info!(count = sessions.len(), "Draining active sessions");
        for session in sessions {
            session.teardown().await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Snapshot every registered session for the diagnostics endpoint.
    pub fn session_infos(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .values()
            .map(|session| {
                let stats = session.ingest_stats();
                SessionInfo {
                    id: session.id(),
                    endpoint: session.endpoint().to_string(),
                    status: session.status().as_str().to_string(),
                    frames: stats.frames,
                    bytes: stats.bytes,
                    backlog: session.backlog(),
                    age_seconds: session.duration_seconds(),
                }
            })
            .collect()
    }

    pub fn summary(&self) -> RegistrySummary {
        let sessions = self.sessions.read().unwrap();

        let mut status_counts = HashMap::new();
        let mut total_frames = 0;
        let mut total_bytes = 0;

        for session in sessions.values() {
            *status_counts
                .entry(session.status().as_str().to_string())
                .or_insert(0) += 1;
            let stats = session.ingest_stats();
            total_frames += stats.frames;
            total_bytes += stats.bytes;
        }

        RegistrySummary {
            active_sessions: sessions.len(),
            max_sessions: self.max_sessions,
            status_counts,
            total_frames,
            total_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::engine::{EngineError, TranscriptionSink};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingSink {
        frames: AtomicU64,
        samples: AtomicU64,
    }

    impl TranscriptionSink for CountingSink {
        fn process(&self, frame: &[f32]) -> Result<(), EngineError> {
            self.frames.fetch_add(1, Ordering::SeqCst);
            self.samples.fetch_add(frame.len() as u64, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingFactory {
        sink: Arc<CountingSink>,
    }

    impl SinkFactory for CountingFactory {
        fn create(&self, _endpoint: &str) -> Result<Arc<dyn TranscriptionSink>, String> {
            Ok(self.sink.clone())
        }
    }

    fn counting_registry(max_sessions: usize) -> (Arc<SessionRegistry>, Arc<CountingSink>) {
        let sink = Arc::new(CountingSink::default());
        let registry = Arc::new(SessionRegistry::new(
            max_sessions,
            Arc::new(CountingFactory { sink: sink.clone() }),
        ));
        (registry, sink)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_find_or_create_yields_one_session() {
        let (registry, _sink) = counting_registry(16);
        let id = ConnectionId::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.find_or_create(id, "127.0.0.1:9999").unwrap() })
            })
            .collect();

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }

        assert_eq!(registry.active_count(), 1);
        for session in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], session));
        }

        registry.drain().await;
    }

    #[tokio::test]
    async fn test_remove_then_create_makes_new_session() {
        let (registry, _sink) = counting_registry(4);
        let id = ConnectionId::new();

        let first = registry.find_or_create(id, "127.0.0.1:1111").unwrap();
        let removed = registry.remove(&id).unwrap();
        assert!(Arc::ptr_eq(&first, &removed));
        removed.teardown().await;

        let second = registry.find_or_create(id, "127.0.0.1:1111").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        registry.drain().await;
    }

    #[tokio::test]
    async fn test_lookup_miss_and_remove_miss_are_silent() {
        let (registry, _sink) = counting_registry(4);
        let id = ConnectionId::new();

        assert!(registry.lookup(&id).is_none());
        assert!(registry.remove(&id).is_none());
    }

    #[tokio::test]
    async fn test_session_limit() {
        let (registry, _sink) = counting_registry(2);

        registry
            .find_or_create(ConnectionId::new(), "a:1")
            .unwrap();
        registry
            .find_or_create(ConnectionId::new(), "a:2")
            .unwrap();
        assert!(registry
            .find_or_create(ConnectionId::new(), "a:3")
            .is_err());

        registry.drain().await;
    }

    #[tokio::test]
    async fn test_teardown_after_five_frames() {
        let (registry, sink) = counting_registry(4);
        let id = ConnectionId::new();

        let session = registry.find_or_create(id, "127.0.0.1:5555").unwrap();
        assert_eq!(session.status(), SessionStatus::Running);

        for _ in 0..5 {
            session.produce(vec![0.1; 10], 20);
        }

        let removed = registry.remove(&id).unwrap();
        removed.teardown().await;

        // The worker consumed every queued frame before the join completed
        assert_eq!(sink.frames.load(Ordering::SeqCst), 5);
        assert_eq!(sink.samples.load(Ordering::SeqCst), 50);
        assert_eq!(removed.status(), SessionStatus::Closed);
        assert_eq!(removed.backlog(), 0);

        let stats = removed.ingest_stats();
        assert_eq!(stats.frames, 5);
        assert_eq!(stats.bytes, 100);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (registry, _sink) = counting_registry(4);
        let id = ConnectionId::new();

        let session = registry.find_or_create(id, "127.0.0.1:7777").unwrap();
        registry.remove(&id);
        session.teardown().await;
        session.teardown().await;

        assert_eq!(session.status(), SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_drain_tears_down_everything() {
        let (registry, sink) = counting_registry(8);

        for i in 0..3 {
            let session = registry
                .find_or_create(ConnectionId::new(), &format!("b:{}", i))
                .unwrap();
            session.produce(vec![0.0; 4], 8);
        }

        registry.drain().await;

        assert_eq!(registry.active_count(), 0);
        assert_eq!(sink.frames.load(Ordering::SeqCst), 3);
    }
}
