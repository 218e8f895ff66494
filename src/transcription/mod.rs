//! # Transcription Module
//!
//! The per-session worker and the boundary types for the external
//! speech-to-text engine. The engine itself is deliberately out of tree:
//! the worker drives any [`engine::TranscriptionSink`] implementation, and
//! the engine's tuning options ride through [`engine::EngineParams`]
//! untouched.

pub mod engine; // Sink trait, engine parameter surface, default sinks
pub mod worker; // Per-session consume loop on a dedicated blocking thread

pub use engine::{EngineParams, SessionSinkFactory, SinkFactory, TranscriptionSink};
