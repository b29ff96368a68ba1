//! Typed errors that cross module boundaries in this crate. Task-level code
//! wraps these in `anyhow` at the edge where they are logged and absorbed —
//! no collaborator or codec failure is allowed to escape a pipeline worker.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("speech recognizer call failed: {0}")]
    Asr(String),
    #[error("speech recognizer call timed out")]
    AsrTimeout,
    #[error("llm call failed: {0}")]
    Llm(String),
    #[error("llm call timed out")]
    LlmTimeout,
    #[error("tts call failed: {0}")]
    Tts(String),
    #[error("tts call timed out")]
    TtsTimeout,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry is at its soft capacity of {0} clients")]
    AtCapacity(usize),
}
