//! Voice pipeline primitives for the UDP duplex audio gateway: wire framing,
//! the streaming ADPCM codec, voice-activity triggering, fragmentation, and
//! the per-client pipeline worker that drives ASR → LLM → TTS.
//!
//! This crate has no socket or registry knowledge; the `gateway` binary wires
//! it to a real UDP socket and a per-IP client registry.

pub mod adpcm;
pub mod collaborators;
pub mod errors;
pub mod fragment;
pub mod pipeline;
pub mod session;
pub mod trigger;
pub mod vad;
pub mod wire;
