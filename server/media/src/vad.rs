//! Voice-activity detection contract.
//!
//! The gateway treats VAD as an opaque, possibly stateful, per-client
//! classifier over fixed-size blocks of normalized audio. Production
//! deployments plug in a real model; [`EnergyVad`] is a deterministic
//! energy-threshold fallback useful for tests and for running the gateway
//! without a trained detector.

pub const BLOCK_SAMPLES: usize = 512;

pub trait VoiceActivityDetector: Send + Sync {
    /// Classify one block of `BLOCK_SAMPLES` normalized `f32` samples.
    fn is_speech(&mut self, block: &[f32]) -> bool;
}

/// Simple RMS-energy threshold detector. Stateless beyond the threshold
/// itself, but implements the stateful trait since real detectors smooth
/// across blocks.
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn is_speech(&mut self, block: &[f32]) -> bool {
        if block.is_empty() {
            return false;
        }
        let energy: f32 = block.iter().map(|s| s * s).sum::<f32>() / block.len() as f32;
        energy.sqrt() > self.threshold
    }
}
