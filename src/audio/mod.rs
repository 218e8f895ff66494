//! # Audio Streaming Module
//!
//! Everything between the wire and the transcription worker: decoding
//! binary frames into normalized samples, the per-session handoff channel,
//! the session registry, and optional WAV persistence.
//!
//! ## Audio Format:
//! Single channel, little-endian, at the fixed configured sample rate
//! (16 kHz by default). The wire encoding is either 16-bit signed PCM or
//! 32-bit float, selected by configuration for the whole deployment.

// The WebSocket transport adapter lives in src/websocket.rs at the root level
pub mod channel; // Producer/consumer handoff queue with sticky stop
pub mod decoder; // Binary payload to normalized float samples
pub mod session; // Session lifecycle and the concurrent registry
pub mod wav; // Sequential WAV persistence sink
