//! Bounded ring that turns a stream of VAD verdicts over fixed-size blocks
//! into discrete speech utterances.
//!
//! States: `Idle` (no speech seen yet, only a small pre-roll of recent
//! silence is retained), `Collecting` (speech in progress, samples are being
//! accumulated), `Flushing` (the sustained-silence or max-length threshold
//! was just crossed and the buffered utterance is handed to the caller).
//! `Flushing` is momentary: the buffer always returns to `Idle` immediately
//! after producing its blob.

use std::collections::VecDeque;

use crate::vad::BLOCK_SAMPLES;

/// Number of trailing silent blocks retained while idle, prepended to the
/// next utterance so the first word of speech is not clipped.
const PREROLL_BLOCKS: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Collecting,
    Flushing,
}

#[derive(Clone, Debug)]
pub struct TriggerConfig {
    pub sample_rate: u32,
    pub silence_ms_for_flush: u64,
    pub max_utterance_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self { sample_rate: 16_000, silence_ms_for_flush: 900, max_utterance_ms: 15_000 }
    }
}

pub struct AudioTriggerBuffer {
    cfg: TriggerConfig,
    state: TriggerState,
    preroll: VecDeque<f32>,
    collected: Vec<f32>,
    silence_run_ms: u64,
    collected_ms: u64,
    block_duration_ms: u64,
}

impl AudioTriggerBuffer {
    pub fn new(cfg: TriggerConfig) -> Self {
        let block_duration_ms = (BLOCK_SAMPLES as u64 * 1000) / cfg.sample_rate as u64;
        Self {
            cfg,
            state: TriggerState::Idle,
            preroll: VecDeque::with_capacity(PREROLL_BLOCKS * BLOCK_SAMPLES),
            collected: Vec::new(),
            silence_run_ms: 0,
            collected_ms: 0,
            block_duration_ms,
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    /// Feed one VAD-classified block. Returns the flushed utterance, if this
    /// block crossed the silence or max-length threshold.
    pub fn push_block(&mut self, block: &[f32], is_speech: bool) -> Option<Vec<f32>> {
        match self.state {
            TriggerState::Idle => {
                if is_speech {
                    self.state = TriggerState::Collecting;
                    self.collected.clear();
                    self.collected.extend(self.preroll.iter().copied());
                    self.collected.extend_from_slice(block);
                    self.collected_ms = self.block_duration_ms * (self.preroll.len() as u64 / BLOCK_SAMPLES as u64 + 1);
                    self.silence_run_ms = 0;
                    self.preroll.clear();
                } else {
                    self.push_preroll(block);
                }
                None
            }
            TriggerState::Collecting => {
                self.collected.extend_from_slice(block);
                self.collected_ms += self.block_duration_ms;

                if is_speech {
                    self.silence_run_ms = 0;
                } else {
                    self.silence_run_ms += self.block_duration_ms;
                }

                if self.silence_run_ms >= self.cfg.silence_ms_for_flush
                    || self.collected_ms >= self.cfg.max_utterance_ms
                {
                    Some(self.flush())
                } else {
                    None
                }
            }
            TriggerState::Flushing => unreachable!("flushing is momentary and resets to idle"),
        }
    }

    fn push_preroll(&mut self, block: &[f32]) {
        self.preroll.extend(block.iter().copied());
        let max_len = PREROLL_BLOCKS * BLOCK_SAMPLES;
        while self.preroll.len() > max_len {
            self.preroll.pop_front();
        }
    }

    fn flush(&mut self) -> Vec<f32> {
        self.state = TriggerState::Flushing;
        let utterance = std::mem::take(&mut self.collected);
        self.silence_run_ms = 0;
        self.collected_ms = 0;
        self.state = TriggerState::Idle;
        utterance
    }

    /// Drop any in-progress collection without emitting it, used by
    /// `CONTROL_RESET` handling.
    pub fn reset(&mut self) {
        self.state = TriggerState::Idle;
        self.collected.clear();
        self.preroll.clear();
        self.silence_run_ms = 0;
        self.collected_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(speech: bool) -> Vec<f32> {
        vec![if speech { 0.5 } else { 0.0 }; BLOCK_SAMPLES]
    }

    #[test]
    fn silence_keeps_buffer_idle() {
        let mut tb = AudioTriggerBuffer::new(TriggerConfig::default());
        for _ in 0..10 {
            assert!(tb.push_block(&block(false), false).is_none());
        }
        assert_eq!(tb.state(), TriggerState::Idle);
    }

    #[test]
    fn sustained_silence_after_speech_flushes_an_utterance() {
        let cfg = TriggerConfig { sample_rate: 16_000, silence_ms_for_flush: 64, max_utterance_ms: 15_000 };
        let mut tb = AudioTriggerBuffer::new(cfg);

        assert!(tb.push_block(&block(true), true).is_none());
        assert_eq!(tb.state(), TriggerState::Collecting);

        // block_duration_ms = 512*1000/16000 = 32ms; two silent blocks = 64ms >= threshold.
        assert!(tb.push_block(&block(false), false).is_none());
        let utterance = tb.push_block(&block(false), false).unwrap();

        assert_eq!(tb.state(), TriggerState::Idle);
        assert!(!utterance.is_empty());
    }

    #[test]
    fn max_utterance_length_forces_a_flush() {
        let cfg = TriggerConfig { sample_rate: 16_000, silence_ms_for_flush: 100_000, max_utterance_ms: 64 };
        let mut tb = AudioTriggerBuffer::new(cfg);

        assert!(tb.push_block(&block(true), true).is_none());
        let utterance = tb.push_block(&block(true), true).unwrap();
        assert!(!utterance.is_empty());
    }

    #[test]
    fn reset_clears_in_progress_collection() {
        let mut tb = AudioTriggerBuffer::new(TriggerConfig::default());
        tb.push_block(&block(true), true);
        assert_eq!(tb.state(), TriggerState::Collecting);
        tb.reset();
        assert_eq!(tb.state(), TriggerState::Idle);
    }
}
