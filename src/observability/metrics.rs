//! Prometheus metrics for the gateway.
//!
//! Recording functions are grouped by the part of the system that emits them. Without an
//! installed recorder every call is a no-op, which keeps unit tests free of setup.

use std::fmt;
use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::info;

/// Every metric name the gateway emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Upload interface
    UploadsAccepted,
    UploadsRejected,
    PayloadsCompressed,
    PayloadsOversized,
    PayloadBytes,

    // Publishing and acknowledgement
    MessagesPublished,
    PublishErrors,
    AcknowledgementsSent,
    AcknowledgementErrors,

    // Transport session
    SessionConnects,
    SessionReconnectAttempts,
    SessionResponseMismatches,
    SessionErrorResponses,

    // Subscriptions
    SubscriptionsCreated,
    SubscriptionsRemoved,
    SubscriptionErrors,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::UploadsAccepted => "secom_mms_uploads_accepted_total",
            MetricName::UploadsRejected => "secom_mms_uploads_rejected_total",
            MetricName::PayloadsCompressed => "secom_mms_payloads_compressed_total",
            MetricName::PayloadsOversized => "secom_mms_payloads_oversized_total",
            MetricName::PayloadBytes => "secom_mms_payload_bytes",

            MetricName::MessagesPublished => "secom_mms_messages_published_total",
            MetricName::PublishErrors => "secom_mms_publish_errors_total",
            MetricName::AcknowledgementsSent => "secom_mms_acknowledgements_sent_total",
            MetricName::AcknowledgementErrors => "secom_mms_acknowledgement_errors_total",

            MetricName::SessionConnects => "secom_mms_session_connects_total",
            MetricName::SessionReconnectAttempts => "secom_mms_session_reconnect_attempts_total",
            MetricName::SessionResponseMismatches => "secom_mms_session_response_mismatches_total",
            MetricName::SessionErrorResponses => "secom_mms_session_error_responses_total",

            MetricName::SubscriptionsCreated => "secom_mms_subscriptions_created_total",
            MetricName::SubscriptionsRemoved => "secom_mms_subscriptions_removed_total",
            MetricName::SubscriptionErrors => "secom_mms_subscription_errors_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installs the Prometheus recorder, serving `/metrics` on `listen` when given.
pub fn init(listen: Option<SocketAddr>) -> Result<(), BuildError> {
    let builder = PrometheusBuilder::new();
    match listen {
        Some(addr) => {
            builder.with_http_listener(addr).install()?;
            info!(%addr, "Metrics exporter listening");
        }
        None => {
            builder.install_recorder()?;
            info!("Metrics recorder installed (no exporter)");
        }
    }
    Ok(())
}

pub mod uploads {
    use super::MetricName;

    pub fn accepted() {
        ::metrics::counter!(MetricName::UploadsAccepted.as_str()).increment(1);
    }

    pub fn rejected(reason: &'static str) {
        ::metrics::counter!(MetricName::UploadsRejected.as_str(), "reason" => reason).increment(1);
    }

    pub fn compressed() {
        ::metrics::counter!(MetricName::PayloadsCompressed.as_str()).increment(1);
    }

    pub fn oversized() {
        ::metrics::counter!(MetricName::PayloadsOversized.as_str()).increment(1);
    }

    pub fn payload_bytes(bytes: usize) {
        ::metrics::histogram!(MetricName::PayloadBytes.as_str()).record(bytes as f64);
    }
}

pub mod publishing {
    use super::MetricName;

    pub fn published() {
        ::metrics::counter!(MetricName::MessagesPublished.as_str()).increment(1);
    }

    pub fn publish_error(error_type: &'static str) {
        ::metrics::counter!(MetricName::PublishErrors.as_str(), "error_type" => error_type)
            .increment(1);
    }

    pub fn acknowledgement_sent() {
        ::metrics::counter!(MetricName::AcknowledgementsSent.as_str()).increment(1);
    }

    pub fn acknowledgement_error() {
        ::metrics::counter!(MetricName::AcknowledgementErrors.as_str()).increment(1);
    }
}

pub mod session {
    use super::MetricName;

    pub fn connected() {
        ::metrics::counter!(MetricName::SessionConnects.as_str()).increment(1);
    }

    pub fn reconnect_attempt() {
        ::metrics::counter!(MetricName::SessionReconnectAttempts.as_str()).increment(1);
    }

    pub fn response_mismatch() {
        ::metrics::counter!(MetricName::SessionResponseMismatches.as_str()).increment(1);
    }

    pub fn error_response() {
        ::metrics::counter!(MetricName::SessionErrorResponses.as_str()).increment(1);
    }
}

pub mod subscriptions {
    use super::MetricName;

    pub fn created() {
        ::metrics::counter!(MetricName::SubscriptionsCreated.as_str()).increment(1);
    }

    pub fn removed(trigger: &'static str) {
        ::metrics::counter!(MetricName::SubscriptionsRemoved.as_str(), "trigger" => trigger)
            .increment(1);
    }

    pub fn error(operation: &'static str) {
        ::metrics::counter!(MetricName::SubscriptionErrors.as_str(), "operation" => operation)
            .increment(1);
    }
}
