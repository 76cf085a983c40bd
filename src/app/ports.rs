use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::secom::{EnvelopeStamp, SubscriptionResponseObject};
use crate::domain::{AckType, Subscription, SubscriptionRequest};
use crate::error::{ClientError, SessionError, SignerError, StoreError};
use crate::infra::signer::SignatureAlgorithm;
use crate::mmtp::wire::MmtpMessage;

/// Produces and checks detached signatures with keys held by alias.
pub trait SignatureProvider: Send + Sync {
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Alias used when the caller has no reason to pick another.
    fn key_alias(&self) -> &str;

    fn sign(&self, payload: &[u8], key_alias: &str) -> Result<Vec<u8>, SignerError>;

    /// False for any failure, including unparsable signatures or certificates.
    fn verify(&self, payload: &[u8], signature: &[u8], certificate: &[u8]) -> bool;
}

pub trait CertificateProvider: Send + Sync {
    /// Certificate material to attach to an outbound SECOM envelope.
    fn envelope_stamp(&self) -> Result<EnvelopeStamp, SignerError>;
}

/// Persistent subscription registry keyed by service MRN.
pub trait SubscriptionStore: Send + Sync {
    fn get(&self, service_mrn: &str) -> Result<Option<Subscription>, StoreError>;
    fn get_by_subscription_id(&self, subscription_id: Uuid) -> Result<Option<Subscription>, StoreError>;
    fn list(&self) -> Result<Vec<Subscription>, StoreError>;
    /// Fails with [`StoreError::AlreadyExists`] when the MRN is taken.
    fn insert(&self, subscription: &Subscription) -> Result<Subscription, StoreError>;
    fn upsert(&self, subscription: &Subscription) -> Result<Subscription, StoreError>;
    /// Returns whether a record was removed.
    fn delete(&self, service_mrn: &str) -> Result<bool, StoreError>;
}

/// Client for one remote SECOM service.
#[async_trait]
pub trait SecomClient: Send + Sync {
    async fn subscribe(&self, request: &SubscriptionRequest) -> Result<SubscriptionResponseObject, ClientError>;
    async fn remove_subscription(&self, subscription_id: Uuid) -> Result<(), ClientError>;
    async fn acknowledge(&self, transaction_id: Option<Uuid>, ack_type: AckType) -> Result<(), ClientError>;
}

pub trait SecomClientFactory: Send + Sync {
    fn create(&self, subscription: &Subscription) -> Result<Arc<dyn SecomClient>, ClientError>;
}

/// Hands an MMTP message to the transport; yields the correlation id it was sent under.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, message: MmtpMessage) -> Result<String, SessionError>;
}
