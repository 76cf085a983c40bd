use thiserror::Error;

use crate::mmtp::session::SessionState;

/// Failures resolving an uploader identity from an embedded certificate.
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("certificate could not be parsed: {0}")]
    InvalidCertificate(String),

    #[error("certificate subject carries no UID attribute")]
    MissingIdentity,
}

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("signing key '{alias}' unavailable: {reason}")]
    SigningUnavailable { alias: String, reason: String },

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("signature generation failed: {0}")]
    Signature(String),
}

impl SignerError {
    pub(crate) fn unavailable(alias: &str, reason: impl ToString) -> Self {
        SignerError::SigningUnavailable {
            alias: alias.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("subscription for '{0}' already exists")]
    AlreadyExists(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt subscription record: {0}")]
    Corrupt(String),
}

/// Errors raised by an outbound SECOM client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote service answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid service URL '{0}'")]
    InvalidUrl(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("remote service returned no subscription identifier")]
    MissingSubscriptionId,

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Signer(#[from] SignerError),
}

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("subscription for '{0}' already exists")]
    AlreadyExists(String),

    #[error("could not create SECOM client: {0}")]
    ClientCreationFailed(#[source] ClientError),

    #[error("no subscription found for '{0}'")]
    NotFound(String),

    #[error("remote unsubscribe failed: {0}")]
    UnsubscribeFailed(#[source] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport session is not connected (state: {0})")]
    SessionUnavailable(SessionState),

    #[error("could not connect to edge router: {0}")]
    Connect(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("transport session is shutting down")]
    ShuttingDown,

    #[error("failed to connect to edge router after {0} attempts")]
    ReconnectExhausted(u32),
}

/// Why an upload was refused before anything was published.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    InvalidCertificate(#[from] CertificateError),

    #[error("no subscription found for '{0}'")]
    MissingSubscription(String),

    #[error(transparent)]
    Registry(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP server error: {0}")]
    Server(String),

    #[error("edge router unreachable: {0}")]
    EdgeRouterLost(String),
}
