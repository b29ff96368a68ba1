//! Wires the Prometheus-backed implementations in `vgw-metrics` to the
//! trait objects the rest of the gateway depends on, so no module outside
//! this one needs to name the `metrics` crate directly.

use std::sync::Arc;

use vgw_media::pipeline::PipelineMetrics;
use vgw_metrics::gateway::GatewayMetrics;
use vgw_metrics::pipeline::PipelineMetricsImpl;

pub const NAMESPACE: &str = "vgw";

pub fn pipeline_metrics() -> Arc<dyn PipelineMetrics> {
    Arc::new(PipelineMetricsImpl::new(NAMESPACE))
}

pub fn gateway_metrics() -> Arc<GatewayMetrics> {
    Arc::new(GatewayMetrics::new(NAMESPACE))
}
