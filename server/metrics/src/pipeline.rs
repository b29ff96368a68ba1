use metrics::{counter, histogram};

use crate::labels::LabelPolicy;

/// Metric names under: {ns}_pipeline_*
pub struct PipelineMetricsImpl {
    ns: &'static str,
    policy: LabelPolicy,
}

impl PipelineMetricsImpl {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace, policy: LabelPolicy }
    }

    #[inline]
    pub fn transcribe_empty(&self) {
        counter!(format!("{}_pipeline_transcribe_empty_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn collaborator_failure(&self, stage: &'static str) {
        counter!(
            format!("{}_pipeline_collaborator_failures_total", self.ns),
            "stage" => self.policy.reason(stage).as_str().to_string()
        )
        .increment(1);
    }

    #[inline]
    pub fn interrupted(&self) {
        counter!(format!("{}_pipeline_interruptions_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn replied(&self) {
        counter!(format!("{}_pipeline_replies_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn stage_seconds(&self, stage: &'static str, seconds: f64) {
        histogram!(
            format!("{}_pipeline_stage_seconds", self.ns),
            "stage" => self.policy.reason(stage).as_str().to_string()
        )
        .record(seconds);
    }

    #[inline]
    pub fn fragments_sent(&self, n: usize) {
        counter!(format!("{}_pipeline_fragments_sent_total", self.ns)).increment(n as u64);
        histogram!(format!("{}_pipeline_fragments_per_chunk", self.ns)).record(n as f64);
    }
}

/// Adapter implementing `vgw_media::pipeline::PipelineMetrics`. Kept as a
/// thin wrapper, mirroring how the teacher wires its voice-forwarder metrics
/// trait to the Prometheus-backed implementation.
impl vgw_media::pipeline::PipelineMetrics for PipelineMetricsImpl {
    fn inc_transcribe_empty(&self) {
        self.transcribe_empty();
    }
    fn inc_collaborator_failure(&self, stage: &'static str) {
        self.collaborator_failure(stage);
    }
    fn inc_interrupted(&self) {
        self.interrupted();
    }
    fn inc_replied(&self) {
        self.replied();
    }
    fn observe_stage_seconds(&self, stage: &'static str, seconds: f64) {
        self.stage_seconds(stage, seconds);
    }
    fn inc_fragments_sent(&self, n: usize) {
        self.fragments_sent(n);
    }
}
