//! Contracts for the external transformers the pipeline worker drives:
//! speech recognition, the LLM, and text-to-speech. Each is injected as a
//! trait object so the gateway never discovers them by global lookup, and so
//! tests can swap in deterministic fakes.

use async_trait::async_trait;

use crate::session::Role;

#[async_trait]
pub trait Asr: Send + Sync {
    /// Transcribe a full utterance. An empty string means "no speech
    /// detected"; the caller returns the pipeline worker to idle without
    /// speaking.
    async fn transcribe(&self, pcm: &[f32], language_hint: &str) -> anyhow::Result<String>;
}

#[async_trait]
pub trait Llm: Send + Sync {
    /// Produce a reply given the dialogue history and the new user turn.
    /// Modeled here as a fully materialized token sequence rather than a
    /// true async stream, since the worker always aggregates them before
    /// dispatching TTS.
    async fn stream_reply(
        &self,
        history: &[(Role, String)],
        user_text: &str,
    ) -> anyhow::Result<Vec<String>>;
}

#[async_trait]
pub trait Tts: Send + Sync {
    /// Synthesize MP3 bytes for `text`. Callers fall back to a canned error
    /// utterance on failure; this trait just reports the failure.
    async fn synthesize(&self, text: &str, voice_id: &str) -> anyhow::Result<Vec<u8>>;
}

/// Deterministic ASR fake for tests: always returns the same transcript
/// regardless of input, unless the utterance is empty.
pub struct FixedAsr {
    pub transcript: String,
}

#[async_trait]
impl Asr for FixedAsr {
    async fn transcribe(&self, pcm: &[f32], _language_hint: &str) -> anyhow::Result<String> {
        if pcm.is_empty() {
            return Ok(String::new());
        }
        Ok(self.transcript.clone())
    }
}

/// Deterministic LLM fake for tests: ignores history, returns a fixed token
/// sequence split on whitespace.
pub struct FixedLlm {
    pub reply: String,
}

#[async_trait]
impl Llm for FixedLlm {
    async fn stream_reply(
        &self,
        _history: &[(Role, String)],
        _user_text: &str,
    ) -> anyhow::Result<Vec<String>> {
        Ok(self.reply.split(' ').map(|s| format!("{s} ")).collect())
    }
}

/// Deterministic TTS fake for tests: returns a fixed-size byte blob standing
/// in for MP3 data.
pub struct FixedTts {
    pub mp3_bytes: Vec<u8>,
}

#[async_trait]
impl Tts for FixedTts {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> anyhow::Result<Vec<u8>> {
        Ok(self.mp3_bytes.clone())
    }
}

/// Always-fails TTS fake, used to exercise the canned-error-utterance path.
pub struct FailingTts;

#[async_trait]
impl Tts for FailingTts {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> anyhow::Result<Vec<u8>> {
        Err(anyhow::anyhow!("synthesizer unavailable"))
    }
}
