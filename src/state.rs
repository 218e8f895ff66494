//! # Application State
//!
//! Shared state handed to every handler: the configuration (readable and
//! partially updatable at runtime), the session registry, request metrics,
//! and the server start time. Constructed once in `main`; the registry is an
//! explicit instance here rather than process-global state, so tests can run
//! several independent registries side by side.

use crate::audio::session::SessionRegistry;
use crate::config::AppConfig;
use crate::transcription::engine::{SessionSinkFactory, SinkFactory, TranscriptionSink};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration; the engine section can change while running
    pub config: Arc<RwLock<AppConfig>>,

    /// All active audio sessions
    pub registry: Arc<SessionRegistry>,

    /// HTTP request metrics, updated by middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    pub start_time: Instant,
}

/// Request counters for the metrics endpoint.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// HTTP requests processed since start
    pub request_count: u64,

    /// Requests that ended in a 4xx/5xx or handler error
    pub error_count: u64,
}

/// Sink factory that re-reads the live configuration for every new session.
///
/// Runtime engine updates (PUT /api/v1/config) therefore apply to streams
/// opened after the change; running sessions keep the sink they started
/// with.
struct LiveSinkFactory {
    config: Arc<RwLock<AppConfig>>,
}

impl SinkFactory for LiveSinkFactory {
    fn create(&self, endpoint: &str) -> Result<Arc<dyn TranscriptionSink>, String> {
        let (params, sample_rate) = {
            let config = self.config.read().unwrap();
            (config.engine.clone(), config.audio.sample_rate)
        };
        SessionSinkFactory::new(params, sample_rate).create(endpoint)
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let max_sessions = config.performance.max_concurrent_sessions;
        let config = Arc::new(RwLock::new(config));

        let factory = Arc::new(LiveSinkFactory {
            config: config.clone(),
        });
        let registry = Arc::new(SessionRegistry::new(max_sessions, factory));

        Self {
            config,
            registry,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Snapshot of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap() = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_starts_with_empty_registry() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(state.registry.active_count(), 0);
        assert_eq!(state.get_metrics_snapshot().request_count, 0);
    }

    #[tokio::test]
    async fn test_update_config_rejects_invalid() {
        let state = AppState::new(AppConfig::default());

        let mut bad = state.get_config();
        bad.engine.step_ms = 0;
        assert!(state.update_config(bad).is_err());

        // The stored config is untouched
        assert_eq!(state.get_config().engine.step_ms, 3000);
    }

    #[tokio::test]
    async fn test_metrics_counters() {
        let state = AppState::new(AppConfig::default());
        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
    }
}
