//! # Configuration Management
//!
//! Loads application configuration from layered sources:
//! 1. Built-in defaults (lowest priority)
//! 2. `config.toml` in the working directory
//! 3. Environment variables with the `APP_` prefix
//! 4. `HOST` / `PORT` overrides used by deployment platforms
//!
//! ## Audio Format is Configuration, Not Detection:
//! The sample rate and wire encoding are fixed per deployment. Every client
//! must send single-channel audio at `audio.sample_rate` (16 kHz by
//! default) encoded as `audio.sample_format`; the server never inspects
//! payloads to guess.

use crate::audio::decoder::SampleFormat;
use crate::transcription::engine::EngineParams;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub engine: EngineParams,
    pub performance: PerformanceConfig,
}

/// Listening endpoint for the WebSocket server.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: accept streams from any interface (the default)
/// - `host = "127.0.0.1"`: local clients only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Wire audio format expected from every client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Samples per second. A deployment constant; 16000 matches what
    /// whisper-family engines expect.
    pub sample_rate: u32,

    /// Encoding of incoming binary frames: `"pcm16"` or `"f32"`
    pub sample_format: SampleFormat,

    /// Channel count; only mono streams are supported
    pub channels: u8,
}

/// Capacity limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum simultaneously registered sessions; connections beyond this
    /// are refused at open
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 9002,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                sample_format: SampleFormat::PcmS16Le,
                channels: 1,
            },
            engine: EngineParams::default(),
            performance: PerformanceConfig {
                max_concurrent_sessions: 32,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_PORT=9100`
    /// - `APP_SERVER_HOST=127.0.0.1`
    /// - `HOST=0.0.0.0` / `PORT=9002` (deployment platform convention)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate cannot be 0"));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!(
                "Only mono streams are supported (channels = {})",
                self.audio.channels
            ));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent sessions must be greater than 0"
            ));
        }

        self.engine
            .validate()
            .map_err(|msg| anyhow::anyhow!(msg))?;

        Ok(())
    }

    /// Apply a partial update from a JSON body.
    ///
    /// Only the engine section can change at runtime; it is re-read when
    /// each new session builds its sink, so updates apply to streams opened
    /// after the change. Listening address, audio format, and capacity are
    /// fixed for the process lifetime.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(engine) = partial.get("engine") {
            let source = engine
                .as_object()
                .ok_or_else(|| anyhow::anyhow!("The 'engine' section must be an object"))?;

            // Overlay the provided fields onto the current params
            let mut merged = serde_json::to_value(&self.engine)?;
            let target = merged
                .as_object_mut()
                .expect("EngineParams serializes to an object");
            for (key, value) in source {
                if !target.contains_key(key) {
                    return Err(anyhow::anyhow!("Unknown engine option '{}'", key));
                }
                target.insert(key.clone(), value.clone());
            }
            self.engine = serde_json::from_value(merged)?;
        }

        for section in ["server", "audio", "performance"] {
            if partial.get(section).is_some() {
                return Err(anyhow::anyhow!(
                    "The '{}' section cannot be changed at runtime",
                    section
                ));
            }
        }

        self.validate()?;
        Ok(())
    }
}
