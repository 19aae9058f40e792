//! vosk-recog Library
//!
//! Per-call speech recognition channels bridging a call controller's
//! audio stream to a streaming decoder.

pub mod audio;
pub mod channel;
pub mod config;
pub mod decoder;
pub mod detector;
pub mod engine;
pub mod error;
pub mod grammar;
pub mod nlsml;
pub mod protocol;
pub mod queue;
