use metrics::counter;

use crate::labels::LabelPolicy;

/// Metric names under: {ns}_gateway_*
/// Covers the receive loop, the client registry, and the reaper — everything
/// that happens before a datagram reaches the pipeline worker.
pub struct GatewayMetrics {
    ns: &'static str,
    policy: LabelPolicy,
}

impl GatewayMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace, policy: LabelPolicy }
    }

    #[inline]
    pub fn packet_received(&self) {
        counter!(format!("{}_gateway_packets_received_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn packet_dropped(&self, reason: &'static str) {
        counter!(
            format!("{}_gateway_packets_dropped_total", self.ns),
            "reason" => self.policy.reason(reason).as_str().to_string()
        )
        .increment(1);
    }

    #[inline]
    pub fn client_created(&self) {
        counter!(format!("{}_gateway_clients_created_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn client_migrated(&self) {
        counter!(format!("{}_gateway_clients_migrated_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn client_reaped(&self) {
        counter!(format!("{}_gateway_clients_reaped_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn client_reset(&self) {
        counter!(format!("{}_gateway_clients_reset_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn admission_rejected(&self) {
        counter!(format!("{}_gateway_admission_rejected_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn greeting_sent(&self) {
        counter!(format!("{}_gateway_greetings_sent_total", self.ns)).increment(1);
    }
}
