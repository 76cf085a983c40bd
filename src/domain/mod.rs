//! Core gateway records: registered subscriptions and inbound upload envelopes.

pub mod secom;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Declares a SECOM enumeration carried as an integer on the wire.
macro_rules! int_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant = $value),+
        }

        impl TryFrom<i64> for $name {
            type Error = String;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                match value {
                    $(v if v == $value => Ok($name::$variant),)+
                    other => Err(format!("invalid {} value {}", stringify!($name), other)),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_i64(*self as i64)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = i64::deserialize(deserializer)?;
                $name::try_from(value).map_err(serde::de::Error::custom)
            }
        }
    };
}

int_enum! {
    /// Kind of container a SECOM dataset travels in.
    pub enum ContainerType {
        S100DataSet = 0,
        S100ExchangeSet = 1,
        S100ExchangeSetWithoutCatalogue = 2,
    }
}

int_enum! {
    pub enum AckRequest {
        NoAckRequested = 0,
        DeliveredAckRequested = 1,
        ExceptionAckRequested = 2,
        DeliveredAndExceptionAckRequested = 3,
    }
}

int_enum! {
    pub enum AckType {
        DeliveredAck = 1,
        ExceptionAck = 2,
    }
}

int_enum! {
    pub enum SubscriptionEvent {
        SubscriptionCreated = 0,
        SubscriptionRemoved = 1,
    }
}

/// S-100 data product a subscription or capability refers to.
///
/// Names are parsed case-insensitively; anything unrecognised becomes [`DataProductType::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataProductType {
    #[default]
    Other,
    S57,
    S101,
    S102,
    S104,
    S111,
    S122,
    S123,
    S124,
    S125,
    S126,
    S127,
    S128,
    S129,
    S131,
    S201,
    S211,
    S212,
    S401,
    S402,
    S411,
    S412,
    S413,
    S414,
    S421,
    RTZ,
    EPC,
}

impl DataProductType {
    const ALL: [DataProductType; 27] = [
        DataProductType::Other,
        DataProductType::S57,
        DataProductType::S101,
        DataProductType::S102,
        DataProductType::S104,
        DataProductType::S111,
        DataProductType::S122,
        DataProductType::S123,
        DataProductType::S124,
        DataProductType::S125,
        DataProductType::S126,
        DataProductType::S127,
        DataProductType::S128,
        DataProductType::S129,
        DataProductType::S131,
        DataProductType::S201,
        DataProductType::S211,
        DataProductType::S212,
        DataProductType::S401,
        DataProductType::S402,
        DataProductType::S411,
        DataProductType::S412,
        DataProductType::S413,
        DataProductType::S414,
        DataProductType::S421,
        DataProductType::RTZ,
        DataProductType::EPC,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataProductType::Other => "OTHER",
            DataProductType::S57 => "S57",
            DataProductType::S101 => "S101",
            DataProductType::S102 => "S102",
            DataProductType::S104 => "S104",
            DataProductType::S111 => "S111",
            DataProductType::S122 => "S122",
            DataProductType::S123 => "S123",
            DataProductType::S124 => "S124",
            DataProductType::S125 => "S125",
            DataProductType::S126 => "S126",
            DataProductType::S127 => "S127",
            DataProductType::S128 => "S128",
            DataProductType::S129 => "S129",
            DataProductType::S131 => "S131",
            DataProductType::S201 => "S201",
            DataProductType::S211 => "S211",
            DataProductType::S212 => "S212",
            DataProductType::S401 => "S401",
            DataProductType::S402 => "S402",
            DataProductType::S411 => "S411",
            DataProductType::S412 => "S412",
            DataProductType::S413 => "S413",
            DataProductType::S414 => "S414",
            DataProductType::S421 => "S421",
            DataProductType::RTZ => "RTZ",
            DataProductType::EPC => "EPC",
        }
    }

    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(name))
            .unwrap_or(DataProductType::Other)
    }
}

impl fmt::Display for DataProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DataProductType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DataProductType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(DataProductType::parse(&name))
    }
}

/// A registered service whose uploads are republished under `mms_subject`.
///
/// `service_mrn` doubles as the uploader identity and is unique across the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub service_mrn: String,
    pub service_url: String,
    #[serde(default)]
    pub container_type: Option<ContainerType>,
    #[serde(default)]
    pub data_product_type: Option<DataProductType>,
    #[serde(default)]
    pub data_reference: Option<String>,
    /// Assigned by the remote service after a successful subscribe handshake.
    #[serde(default)]
    pub subscription_id: Option<Uuid>,
    pub mms_subject: String,
}

impl Subscription {
    pub fn new(
        service_mrn: impl Into<String>,
        service_url: impl Into<String>,
        mms_subject: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            created_at: None,
            updated_at: None,
            service_mrn: service_mrn.into(),
            service_url: service_url.into(),
            container_type: None,
            data_product_type: None,
            data_reference: None,
            subscription_id: None,
            mms_subject: mms_subject.into(),
        }
    }
}

/// Fields a SECOM subscribe request is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    pub container_type: Option<ContainerType>,
    pub data_product_type: Option<DataProductType>,
    pub data_reference: Option<Uuid>,
}

impl TryFrom<&Subscription> for SubscriptionRequest {
    type Error = String;

    fn try_from(subscription: &Subscription) -> Result<Self, Self::Error> {
        let data_reference = match subscription.data_reference.as_deref() {
            Some(reference) if !reference.trim().is_empty() => Some(
                Uuid::parse_str(reference.trim())
                    .map_err(|e| format!("invalid data reference '{reference}': {e}"))?,
            ),
            _ => None,
        };
        Ok(Self {
            container_type: subscription.container_type,
            data_product_type: subscription.data_product_type,
            data_reference,
        })
    }
}

/// One inbound upload, as the ingestion pipeline sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The `data` field exactly as received; usually base64 text.
    pub payload: Vec<u8>,
    /// Signing certificate as received: base64, PEM or DER.
    pub certificate: Vec<u8>,
    pub ack_requested: bool,
    pub transaction_id: Option<Uuid>,
    pub compressed: bool,
}
