//! The per-client pipeline worker: `idle → transcribing → generating →
//! synthesizing → sending → idle`.
//!
//! One worker is created per active client, lives as long as that client's
//! registry entry, and is driven off a single-slot channel of utterances (see
//! the gateway crate's receive loop). Everything here is collaborator-call
//! shaped: it blocks on ASR/LLM/TTS, never on the socket, and never lets a
//! collaborator failure escape — every error path returns the worker to
//! `Idle`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::collaborators::{Asr, Llm, Tts};
use crate::errors::CollaboratorError;
use crate::fragment::fragment;
use crate::session::Role;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Transcribing,
    Generating,
    Synthesizing,
    Sending,
}

/// What the client registry should do after a pipeline run completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// ASR returned nothing, or a collaborator failed in a way that has no
    /// user-visible effect. No turns were added to history.
    Idle,
    /// The full reply was sent.
    Replied { chunk_index: u32, fragments_sent: usize, reply_text: String },
    /// Sending was aborted partway through because fresh speech arrived.
    Interrupted { chunk_index: u32, fragments_sent: usize },
}

/// Whether an utterance carries recorded speech to transcribe, or is a
/// synthetic greeting that skips straight to synthesis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UtteranceKind {
    Speech,
    Greeting,
}

/// A canned opening line spoken once per client, the first time it is
/// welcomed. Collaborator-free: greeting text never goes through ASR or the
/// LLM, only TTS and the fragmenter.
pub const GREETING_TEXT: &str = "Hello, I'm listening whenever you're ready.";

/// What one utterance hands the pipeline worker.
pub struct UtteranceInput {
    pub kind: UtteranceKind,
    pub pcm: Vec<f32>,
    pub history: Vec<(Role, String)>,
    pub language_hint: String,
    pub voice_id: String,
    pub session_id: [u8; 16],
    pub chunk_index: u32,
}

/// Emits one already-framed fragment payload (header + MP3 slice) to the
/// client's current address. Implemented by the gateway over the shared UDP
/// socket; kept as a trait here so the pipeline has no socket knowledge.
#[async_trait]
pub trait FragmentSink: Send + Sync {
    async fn send_fragment(&self, payload: Vec<u8>) -> anyhow::Result<()>;
}

/// Cooperative interruption: checked at each pipeline state transition and
/// between fragments; mutated by the receive loop when fresh speech arrives.
pub trait InterruptHandle: Send + Sync {
    fn is_interrupted(&self) -> bool;
    fn clear(&self);
    /// Called exactly when a send-in-progress is aborted: the implementation
    /// bumps the client's chunk counter and starts its cooldown so that late
    /// fragments of the aborted chunk are recognizable as stale.
    fn note_interrupted_during_send(&self);
}

pub trait PipelineMetrics: Send + Sync {
    fn inc_transcribe_empty(&self) {}
    fn inc_collaborator_failure(&self, _stage: &'static str) {}
    fn inc_interrupted(&self) {}
    fn inc_replied(&self) {}
    fn observe_stage_seconds(&self, _stage: &'static str, _seconds: f64) {}
    fn inc_fragments_sent(&self, _n: usize) {}
}

pub struct NoopMetrics;
impl PipelineMetrics for NoopMetrics {}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub asr_timeout: Duration,
    pub llm_timeout: Duration,
    pub tts_timeout: Duration,
    pub inter_fragment_gap: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            asr_timeout: Duration::from_secs(4),
            llm_timeout: Duration::from_secs(8),
            tts_timeout: Duration::from_secs(4),
            inter_fragment_gap: Duration::from_millis(2),
        }
    }
}

pub struct PipelineWorker {
    cfg: PipelineConfig,
    asr: Arc<dyn Asr>,
    llm: Arc<dyn Llm>,
    tts: Arc<dyn Tts>,
    metrics: Arc<dyn PipelineMetrics>,
    canned_error_mp3: Vec<u8>,
}

impl PipelineWorker {
    pub fn new(
        cfg: PipelineConfig,
        asr: Arc<dyn Asr>,
        llm: Arc<dyn Llm>,
        tts: Arc<dyn Tts>,
        metrics: Arc<dyn PipelineMetrics>,
        canned_error_mp3: Vec<u8>,
    ) -> Self {
        Self { cfg, asr, llm, tts, metrics, canned_error_mp3 }
    }

    /// Run one utterance through the full state machine.
    pub async fn process(
        &self,
        input: UtteranceInput,
        sink: &dyn FragmentSink,
        interrupt: &dyn InterruptHandle,
    ) -> PipelineOutcome {
        if input.kind == UtteranceKind::Greeting {
            return self
                .synthesize_and_send(GREETING_TEXT.to_string(), &input, sink, interrupt)
                .await;
        }

        let _state = PipelineState::Transcribing;
        let started = std::time::Instant::now();
        let transcript = match timeout(
            self.cfg.asr_timeout,
            self.asr.transcribe(&input.pcm, &input.language_hint),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "asr call failed, returning to idle");
                self.metrics.inc_collaborator_failure("asr");
                return PipelineOutcome::Idle;
            }
            Err(_) => {
                warn!(error = %CollaboratorError::AsrTimeout, "asr timed out, returning to idle");
                self.metrics.inc_collaborator_failure("asr");
                return PipelineOutcome::Idle;
            }
        };
        self.metrics.observe_stage_seconds("transcribe", started.elapsed().as_secs_f64());

        if transcript.trim().is_empty() {
            self.metrics.inc_transcribe_empty();
            return PipelineOutcome::Idle;
        }

        let _state = PipelineState::Generating;
        let started = std::time::Instant::now();
        let tokens = match timeout(
            self.cfg.llm_timeout,
            self.llm.stream_reply(&input.history, &transcript),
        )
        .await
        {
            Ok(Ok(tokens)) => tokens,
            Ok(Err(e)) => {
                warn!(error = %e, "llm call failed, returning to idle");
                self.metrics.inc_collaborator_failure("llm");
                return PipelineOutcome::Idle;
            }
            Err(_) => {
                warn!(error = %CollaboratorError::LlmTimeout, "llm timed out, returning to idle");
                self.metrics.inc_collaborator_failure("llm");
                return PipelineOutcome::Idle;
            }
        };
        self.metrics.observe_stage_seconds("generate", started.elapsed().as_secs_f64());
        let reply_text: String = tokens.concat().trim().to_string();
        if reply_text.is_empty() {
            return PipelineOutcome::Idle;
        }

        self.synthesize_and_send(reply_text, &input, sink, interrupt).await
    }

    /// The shared `synthesizing -> sending` tail, used both for a generated
    /// reply and for a canned greeting that never went through ASR/LLM.
    async fn synthesize_and_send(
        &self,
        reply_text: String,
        input: &UtteranceInput,
        sink: &dyn FragmentSink,
        interrupt: &dyn InterruptHandle,
    ) -> PipelineOutcome {
        let _state = PipelineState::Synthesizing;
        if interrupt.is_interrupted() {
            interrupt.clear();
            return PipelineOutcome::Idle;
        }

        let started = std::time::Instant::now();
        let mp3_bytes = match timeout(
            self.cfg.tts_timeout,
            self.tts.synthesize(&reply_text, &input.voice_id),
        )
        .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(error = %e, "tts call failed, using canned error utterance");
                self.metrics.inc_collaborator_failure("tts");
                self.canned_error_mp3.clone()
            }
            Err(_) => {
                warn!(error = %CollaboratorError::TtsTimeout, "tts timed out, using canned error utterance");
                self.metrics.inc_collaborator_failure("tts");
                self.canned_error_mp3.clone()
            }
        };
        self.metrics.observe_stage_seconds("synthesize", started.elapsed().as_secs_f64());

        let _state = PipelineState::Sending;
        let fragments = fragment(input.session_id, input.chunk_index, &mp3_bytes);
        let mut sent = 0usize;

        for (idx, (header, payload)) in fragments.iter().enumerate() {
            if interrupt.is_interrupted() {
                interrupt.clear();
                interrupt.note_interrupted_during_send();
                self.metrics.inc_interrupted();
                return PipelineOutcome::Interrupted {
                    chunk_index: input.chunk_index,
                    fragments_sent: sent,
                };
            }

            let mut framed = Vec::new();
            header.encode(&mut framed);
            framed.extend_from_slice(payload);

            if let Err(e) = sink.send_fragment(framed).await {
                warn!(error = %e, fragment = idx, "failed to send fragment, aborting chunk");
                break;
            }
            sent += 1;

            if idx + 1 < fragments.len() {
                tokio::time::sleep(self.cfg.inter_fragment_gap).await;
            }
        }

        self.metrics.inc_fragments_sent(sent);
        self.metrics.inc_replied();
        info!(chunk_index = input.chunk_index, fragments = sent, "reply sent");
        PipelineOutcome::Replied { chunk_index: input.chunk_index, fragments_sent: sent, reply_text }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{FailingTts, FixedAsr, FixedLlm, FixedTts};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingSink {
        sent: Mutex<Vec<Vec<u8>>>,
    }
    impl RecordingSink {
        fn new() -> Self {
            Self { sent: Mutex::new(Vec::new()) }
        }
    }
    #[async_trait]
    impl FragmentSink for RecordingSink {
        async fn send_fragment(&self, payload: Vec<u8>) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }
    }

    struct TestInterrupt {
        flag: AtomicBool,
        note_count: AtomicUsize,
    }
    impl TestInterrupt {
        fn new() -> Self {
            Self { flag: AtomicBool::new(false), note_count: AtomicUsize::new(0) }
        }
        fn set(&self) {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
    impl InterruptHandle for TestInterrupt {
        fn is_interrupted(&self) -> bool {
            self.flag.load(Ordering::SeqCst)
        }
        fn clear(&self) {
            self.flag.store(false, Ordering::SeqCst);
        }
        fn note_interrupted_during_send(&self) {
            self.note_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn worker(tts: Arc<dyn Tts>) -> PipelineWorker {
        PipelineWorker::new(
            PipelineConfig {
                inter_fragment_gap: Duration::from_millis(0),
                ..PipelineConfig::default()
            },
            Arc::new(FixedAsr { transcript: "hello".into() }),
            Arc::new(FixedLlm { reply: "hi there".into() }),
            tts,
            Arc::new(NoopMetrics),
            b"canned-error".to_vec(),
        )
    }

    fn input(chunk_index: u32) -> UtteranceInput {
        UtteranceInput {
            kind: UtteranceKind::Speech,
            pcm: vec![0.1; 16_000],
            history: vec![],
            language_hint: "en".into(),
            voice_id: "default".into(),
            session_id: [1u8; 16],
            chunk_index,
        }
    }

    struct PanicAsr;
    #[async_trait]
    impl Asr for PanicAsr {
        async fn transcribe(&self, _pcm: &[f32], _language_hint: &str) -> anyhow::Result<String> {
            panic!("greeting utterances must never reach the ASR collaborator");
        }
    }

    struct PanicLlm;
    #[async_trait]
    impl Llm for PanicLlm {
        async fn stream_reply(&self, _history: &[(Role, String)], _user_text: &str) -> anyhow::Result<Vec<String>> {
            panic!("greeting utterances must never reach the LLM collaborator");
        }
    }

    fn greeting_input() -> UtteranceInput {
        UtteranceInput { kind: UtteranceKind::Greeting, ..input(0) }
    }

    #[tokio::test]
    async fn greeting_utterance_skips_asr_and_llm_and_still_sends_fragments() {
        let w = PipelineWorker::new(
            PipelineConfig { inter_fragment_gap: Duration::from_millis(0), ..PipelineConfig::default() },
            Arc::new(PanicAsr),
            Arc::new(PanicLlm),
            Arc::new(FixedTts { mp3_bytes: b"greeting-audio".to_vec() }),
            Arc::new(NoopMetrics),
            vec![],
        );
        let sink = RecordingSink::new();
        let interrupt = TestInterrupt::new();

        let outcome = w.process(greeting_input(), &sink, &interrupt).await;
        match outcome {
            PipelineOutcome::Replied { reply_text, fragments_sent, .. } => {
                assert_eq!(reply_text, GREETING_TEXT);
                assert_eq!(fragments_sent, 1);
            }
            other => panic!("expected Replied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_transcript_returns_idle_without_sending() {
        let w = PipelineWorker::new(
            PipelineConfig::default(),
            Arc::new(FixedAsr { transcript: String::new() }),
            Arc::new(FixedLlm { reply: "unused".into() }),
            Arc::new(FixedTts { mp3_bytes: vec![] }),
            Arc::new(NoopMetrics),
            vec![],
        );
        let sink = RecordingSink::new();
        let interrupt = TestInterrupt::new();

        // Non-empty pcm but FixedAsr(transcript="") still returns empty string.
        let outcome = w.process(input(1), &sink, &interrupt).await;
        assert_eq!(outcome, PipelineOutcome::Idle);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_roundtrip_sends_expected_fragment_count() {
        let mp3 = vec![0x11u8; 4100];
        let w = worker(Arc::new(FixedTts { mp3_bytes: mp3.clone() }));
        let sink = RecordingSink::new();
        let interrupt = TestInterrupt::new();

        let outcome = w.process(input(5), &sink, &interrupt).await;
        match outcome {
            PipelineOutcome::Replied { chunk_index, fragments_sent, .. } => {
                assert_eq!(chunk_index, 5);
                assert_eq!(fragments_sent, 3); // ceil(4100/1371)
            }
            other => panic!("expected Replied, got {other:?}"),
        }
        assert_eq!(sink.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn tts_failure_falls_back_to_canned_error_utterance() {
        let w = worker(Arc::new(FailingTts));
        let sink = RecordingSink::new();
        let interrupt = TestInterrupt::new();

        let outcome = w.process(input(1), &sink, &interrupt).await;
        assert!(matches!(outcome, PipelineOutcome::Replied { .. }));
        assert_eq!(sink.sent.lock().unwrap().len(), 1); // "canned-error" fits one fragment
    }

    #[tokio::test]
    async fn interruption_mid_send_aborts_remaining_fragments() {
        let mp3 = vec![0x22u8; 4100];
        let w = worker(Arc::new(FixedTts { mp3_bytes: mp3 }));
        let sink = RecordingSink::new();
        let interrupt = Arc::new(TestInterrupt::new());

        // Interrupt immediately so even the first fragment is skipped.
        interrupt.set();
        let outcome = w.process(input(9), &sink, interrupt.as_ref()).await;

        match outcome {
            PipelineOutcome::Interrupted { chunk_index, fragments_sent } => {
                assert_eq!(chunk_index, 9);
                assert_eq!(fragments_sent, 0);
            }
            other => panic!("expected Interrupted, got {other:?}"),
        }
        assert_eq!(interrupt.note_count.load(Ordering::SeqCst), 1);
        assert!(sink.sent.lock().unwrap().is_empty());
    }
}
