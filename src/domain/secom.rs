//! SECOM JSON objects exchanged on the inbound interface and with outbound services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AckRequest, AckType, ContainerType, DataProductType, Envelope, SubscriptionEvent};

/// Any SECOM object of the form `{ "envelope": ..., "envelopeSignature": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedEnvelope<E> {
    pub envelope: E,
    #[serde(default)]
    pub envelope_signature: String,
}

/// Signing material stamped onto every outbound envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeStamp {
    #[serde(default)]
    pub envelope_signature_certificate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_root_certificate_thumbprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_signature_time: Option<DateTime<Utc>>,
}

// Upload

pub type UploadObject = SignedEnvelope<EnvelopeUploadObject>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeUploadObject {
    pub data: String,
    #[serde(default)]
    pub container_type: Option<ContainerType>,
    #[serde(default)]
    pub data_product_type: Option<DataProductType>,
    #[serde(default)]
    pub exchange_metadata: ExchangeMetadata,
    #[serde(default)]
    pub from_subscription: Option<bool>,
    #[serde(default)]
    pub ack_request: Option<AckRequest>,
    #[serde(default)]
    pub transaction_identifier: Option<Uuid>,
    #[serde(flatten)]
    pub stamp: EnvelopeStamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeMetadata {
    #[serde(default)]
    pub data_protection: Option<bool>,
    #[serde(default)]
    pub protection_scheme: Option<String>,
    #[serde(default)]
    pub digital_signature_reference: Option<String>,
    #[serde(default)]
    pub compression_flag: Option<bool>,
}

impl From<&EnvelopeUploadObject> for Envelope {
    fn from(upload: &EnvelopeUploadObject) -> Self {
        Envelope {
            payload: upload.data.as_bytes().to_vec(),
            certificate: upload.stamp.envelope_signature_certificate.as_bytes().to_vec(),
            ack_requested: upload
                .ack_request
                .is_some_and(|ack| ack != AckRequest::NoAckRequested),
            transaction_id: upload.transaction_identifier,
            compressed: upload.exchange_metadata.compression_flag.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Success,
    Failed,
    InvalidCertificate,
    MissingRequiredDataForService,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponseObject {
    #[serde(rename = "SECOM_ResponseCode")]
    pub response_code: ResponseCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

impl UploadResponseObject {
    pub fn success() -> Self {
        Self {
            response_code: ResponseCode::Success,
            response_text: None,
        }
    }

    pub fn failure(response_code: ResponseCode, text: impl Into<String>) -> Self {
        Self {
            response_code,
            response_text: Some(text.into()),
        }
    }
}

// Acknowledgement

pub type AcknowledgementObject = SignedEnvelope<EnvelopeAckObject>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeAckObject {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub transaction_identifier: Option<Uuid>,
    pub ack_type: AckType,
    #[serde(flatten)]
    pub stamp: EnvelopeStamp,
}

// Subscription management against remote services

pub type SubscriptionRequestObject = SignedEnvelope<EnvelopeSubscriptionObject>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeSubscriptionObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_type: Option<ContainerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_product_type: Option<DataProductType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_reference: Option<Uuid>,
    #[serde(flatten)]
    pub stamp: EnvelopeStamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponseObject {
    #[serde(default)]
    pub subscription_identifier: Option<Uuid>,
    #[serde(default)]
    pub response_text: Option<String>,
}

pub type RemoveSubscriptionObject = SignedEnvelope<EnvelopeRemoveSubscriptionObject>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeRemoveSubscriptionObject {
    pub subscription_identifier: Uuid,
    #[serde(flatten)]
    pub stamp: EnvelopeStamp,
}

// Subscription notifications pushed to the gateway

pub type SubscriptionNotificationObject = SignedEnvelope<EnvelopeSubscriptionNotificationObject>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeSubscriptionNotificationObject {
    #[serde(default)]
    pub subscription_identifier: Option<Uuid>,
    pub event_enum: SubscriptionEvent,
    #[serde(flatten)]
    pub stamp: EnvelopeStamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionNotificationResponseObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

// Capability and ping

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityResponseObject {
    pub capability: Vec<CapabilityObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityObject {
    pub container_type: ContainerType,
    pub data_product_type: DataProductType,
    pub implemented_interfaces: ImplementedInterfaces,
    pub service_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementedInterfaces {
    pub upload: bool,
    pub upload_link: bool,
    pub get: bool,
    pub get_summary: bool,
    pub get_by_link: bool,
    pub subscription: bool,
    pub access: bool,
    pub encryption_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponseObject {
    #[serde(default)]
    pub last_private_interaction_time: Option<DateTime<Utc>>,
}
