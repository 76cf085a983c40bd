use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::app::client_pool::OutboundClientPool;
use crate::app::ports::{MessagePublisher, SignatureProvider};
use crate::config::GatewayConfig;
use crate::domain::{AckType, Envelope, Subscription};
use crate::error::IngestError;
use crate::infra::certificate;
use crate::mmtp::wire::{signature_input, ApplicationMessage, MmtpMessage};
use crate::observability::metrics;
use crate::pipeline::{apply_size_policy, decode_payload, PreparedPayload};

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub own_mrn: String,
    pub payload_size_limit: usize,
    pub message_ttl: chrono::Duration,
}

impl From<&GatewayConfig> for IngestSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            own_mrn: config.mmtp.own_mrn.clone(),
            payload_size_limit: config.secom.payload_size_limit,
            message_ttl: chrono::Duration::days(config.mmtp.message_ttl_days),
        }
    }
}

/// What happened downstream of an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Published { correlation_id: String },
    Oversized { size: usize },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub service_mrn: String,
    pub delivery: Delivery,
    pub acknowledged: bool,
}

/// Republishes SECOM uploads onto MMTP under the subject registered for the uploader.
pub struct IngestUseCase {
    pool: Arc<OutboundClientPool>,
    publisher: Arc<dyn MessagePublisher>,
    signer: Arc<dyn SignatureProvider>,
    settings: IngestSettings,
}

impl IngestUseCase {
    pub fn new(
        pool: Arc<OutboundClientPool>,
        publisher: Arc<dyn MessagePublisher>,
        signer: Arc<dyn SignatureProvider>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            pool,
            publisher,
            signer,
            settings,
        }
    }

    /// Accepts one upload.
    ///
    /// Only identity and registry failures are returned. Once the uploader is known the upload
    /// counts as received: publish and acknowledgement failures show up in the report and the
    /// logs but never turn into an error.
    #[instrument(skip_all, fields(transaction_id = ?envelope.transaction_id))]
    pub async fn upload(&self, envelope: &Envelope) -> Result<IngestReport, IngestError> {
        let service_mrn = certificate::resolve_identity(&envelope.certificate).map_err(|e| {
            metrics::uploads::rejected("invalid_certificate");
            warn!(error = %e, "Upload refused: unusable certificate");
            e
        })?;

        let subscription = self
            .pool
            .store()
            .get(&service_mrn)
            .map_err(|e| {
                metrics::uploads::rejected("registry");
                e
            })?
            .ok_or_else(|| {
                metrics::uploads::rejected("missing_subscription");
                warn!(%service_mrn, "Upload refused: no subscription for uploader");
                IngestError::MissingSubscription(service_mrn.clone())
            })?;
        metrics::uploads::accepted();

        let data = decode_payload(&envelope.payload);
        metrics::uploads::payload_bytes(data.len());

        let delivery = match apply_size_policy(data, envelope.compressed, self.settings.payload_size_limit) {
            PreparedPayload::Ready { body, compressed } => {
                if compressed {
                    metrics::uploads::compressed();
                }
                self.publish(&subscription, body).await
            }
            PreparedPayload::Oversized { size } => {
                metrics::uploads::oversized();
                error!(
                    %service_mrn,
                    size,
                    limit = self.settings.payload_size_limit,
                    "Payload exceeds the size limit; not published"
                );
                Delivery::Oversized { size }
            }
        };

        let acknowledged = envelope.ack_requested && self.acknowledge(&subscription, envelope).await;

        Ok(IngestReport {
            service_mrn,
            delivery,
            acknowledged,
        })
    }

    async fn publish(&self, subscription: &Subscription, body: Vec<u8>) -> Delivery {
        let expires = (Utc::now() + self.settings.message_ttl).timestamp();
        let subject = subscription.mms_subject.as_str();
        let sender = self.settings.own_mrn.as_str();

        let input = signature_input(subject, expires, sender, &body);
        let signature = match self.signer.sign(&input, self.signer.key_alias()) {
            Ok(signature) => signature,
            Err(e) => {
                metrics::publishing::publish_error("signing");
                error!(error = %e, "Could not sign outbound message");
                return Delivery::Failed(e.to_string());
            }
        };

        let message = MmtpMessage::send(ApplicationMessage::new(subject, expires, sender, body, signature));
        match self.publisher.publish(message).await {
            Ok(correlation_id) => {
                metrics::publishing::published();
                info!(%subject, %correlation_id, "Published upload to MMS");
                Delivery::Published { correlation_id }
            }
            Err(e) => {
                metrics::publishing::publish_error("session");
                error!(%subject, error = %e, "Publishing to MMS failed");
                Delivery::Failed(e.to_string())
            }
        }
    }

    async fn acknowledge(&self, subscription: &Subscription, envelope: &Envelope) -> bool {
        let result = async {
            let pooled = self.pool.client_for(subscription).await?;
            pooled
                .client
                .acknowledge(envelope.transaction_id, AckType::DeliveredAck)
                .await
        }
        .await;

        match result {
            Ok(()) => {
                metrics::publishing::acknowledgement_sent();
                debug!(service_mrn = %subscription.service_mrn, "Delivered acknowledgement sent");
                true
            }
            Err(e) => {
                metrics::publishing::acknowledgement_error();
                warn!(service_mrn = %subscription.service_mrn, error = %e, "Acknowledgement failed");
                false
            }
        }
    }
}
