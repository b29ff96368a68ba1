//! Default collaborator wiring for `main.rs`.
//!
//! No concrete ASR/LLM/TTS vendor is specified for this deployment; the
//! pipeline depends on these purely through the trait objects in
//! `vgw_media::collaborators`, so swapping in a real speech recognizer, LLM
//! client, or synthesizer is a matter of implementing those traits and
//! changing the three `Arc::new(...)` calls below — mirroring the seam the
//! teacher leaves around its own dev-mode auth provider.
//!
//! The default ASR always reports silence, so a freshly started gateway is
//! inert (never replies) until real collaborators are wired in; it never
//! panics or fabricates a transcript.

use async_trait::async_trait;

use vgw_media::collaborators::{Asr, Llm, Tts};
use vgw_media::session::Role;

pub struct SilentAsr;

#[async_trait]
impl Asr for SilentAsr {
    async fn transcribe(&self, _pcm: &[f32], _language_hint: &str) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

pub struct EchoLlm;

#[async_trait]
impl Llm for EchoLlm {
    async fn stream_reply(&self, _history: &[(Role, String)], user_text: &str) -> anyhow::Result<Vec<String>> {
        Ok(vec![user_text.to_string()])
    }
}

pub struct SilentTts;

#[async_trait]
impl Tts for SilentTts {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}
