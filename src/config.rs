use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DISCONNECT_GRACE_MS, EDGE_ROUTER_URL_ENV, KEYSTORE_PASSWORD_ENV, MAX_RECONNECT_ATTEMPTS,
    MESSAGE_TTL_DAYS, PAYLOAD_SIZE_LIMIT, RECONNECT_BACKOFF_SECS,
};
use crate::domain::DataProductType;
use crate::error::ConfigError;
use crate::infra::signer::SignatureAlgorithm;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub mmtp: MmtpConfig,
    pub secom: SecomConfig,
    pub keystore: KeystoreConfig,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// Edge router connection and message signing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MmtpConfig {
    pub edge_router_url: String,
    pub own_mrn: String,
    pub key_alias: String,
    pub signature_algorithm: SignatureAlgorithm,
    /// Extra PEM trust anchor for the edge router, on top of the web PKI roots.
    pub trust_anchor: Option<PathBuf>,
    pub reconnect_backoff_secs: u64,
    pub max_reconnect_attempts: u32,
    pub disconnect_grace_ms: u64,
    pub message_ttl_days: i64,
}

impl Default for MmtpConfig {
    fn default() -> Self {
        Self {
            edge_router_url: String::new(),
            own_mrn: String::new(),
            key_alias: "mms".to_string(),
            signature_algorithm: SignatureAlgorithm::Sha384WithEcdsa,
            trust_anchor: None,
            reconnect_backoff_secs: RECONNECT_BACKOFF_SECS,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            disconnect_grace_ms: DISCONNECT_GRACE_MS,
            message_ttl_days: MESSAGE_TTL_DAYS,
        }
    }
}

impl MmtpConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

/// Inbound SECOM interface and outbound SECOM clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecomConfig {
    pub key_alias: String,
    pub signature_algorithm: SignatureAlgorithm,
    pub data_product_type: DataProductType,
    pub payload_size_limit: usize,
    pub request_timeout_secs: u64,
    pub unsubscribe_on_shutdown: bool,
}

impl Default for SecomConfig {
    fn default() -> Self {
        Self {
            key_alias: "secom".to_string(),
            signature_algorithm: SignatureAlgorithm::Sha3_384WithEcdsa,
            data_product_type: DataProductType::Other,
            payload_size_limit: PAYLOAD_SIZE_LIMIT,
            request_timeout_secs: 30,
            unsubscribe_on_shutdown: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    pub path: PathBuf,
    pub password: Option<String>,
    /// Root CA whose thumbprint is stamped on outbound SECOM envelopes.
    pub root_ca: Option<PathBuf>,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("keystore"),
            password: None,
            root_ca: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub database: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data/subscriptions.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address for the Prometheus scrape endpoint; metrics are recorded but not served when unset.
    pub listen: Option<SocketAddr>,
}

impl GatewayConfig {
    /// Reads the TOML file at `path`, applies environment overrides and validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup(KEYSTORE_PASSWORD_ENV) {
            self.keystore.password = Some(password);
        }
        if let Some(url) = lookup(EDGE_ROUTER_URL_ENV) {
            self.mmtp.edge_router_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mmtp.edge_router_url.trim().is_empty() {
            return Err(ConfigError::Invalid("mmtp.edge_router_url is required".into()));
        }
        if self.mmtp.own_mrn.trim().is_empty() {
            return Err(ConfigError::Invalid("mmtp.own_mrn is required".into()));
        }
        if self.mmtp.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "mmtp.max_reconnect_attempts must be at least 1".into(),
            ));
        }
        if self.mmtp.message_ttl_days <= 0 {
            return Err(ConfigError::Invalid("mmtp.message_ttl_days must be positive".into()));
        }
        if self.secom.payload_size_limit == 0 {
            return Err(ConfigError::Invalid("secom.payload_size_limit must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [mmtp]
        edge_router_url = "wss://edge.example.org:8888"
        own_mrn = "urn:mrn:mcp:device:idp1:org1:gateway"
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = GatewayConfig::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.mmtp.max_reconnect_attempts, 10);
        assert_eq!(config.mmtp.reconnect_backoff(), Duration::from_secs(5));
        assert_eq!(config.mmtp.disconnect_grace(), Duration::from_secs(2));
        assert_eq!(config.mmtp.signature_algorithm, SignatureAlgorithm::Sha384WithEcdsa);
        assert_eq!(config.secom.signature_algorithm, SignatureAlgorithm::Sha3_384WithEcdsa);
        assert_eq!(config.secom.payload_size_limit, 48 * 1024);
        assert_eq!(config.secom.data_product_type, DataProductType::Other);
        assert!(config.metrics.listen.is_none());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [server]
            bind = "127.0.0.1:9000"

            [mmtp]
            edge_router_url = "wss://edge"
            own_mrn = "urn:mrn:gw"
            signature_algorithm = "SHA3-384withECDSA"
            max_reconnect_attempts = 3

            [secom]
            data_product_type = "S124"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.mmtp.signature_algorithm, SignatureAlgorithm::Sha3_384WithEcdsa);
        assert_eq!(config.mmtp.max_reconnect_attempts, 3);
        assert_eq!(config.secom.data_product_type, DataProductType::S124);
    }

    #[test]
    fn unknown_signature_algorithm_is_rejected() {
        let result = GatewayConfig::from_toml_str(
            r#"
            [mmtp]
            signature_algorithm = "MD5withRSA"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn missing_edge_router_fails_validation() {
        let config = GatewayConfig::from_toml_str("[mmtp]\nown_mrn = \"urn:mrn:gw\"").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn environment_overrides_keystore_password() {
        let mut config = GatewayConfig::from_toml_str(MINIMAL).unwrap();
        config.apply_env_overrides(|key| {
            (key == KEYSTORE_PASSWORD_ENV).then(|| "s3cret".to_string())
        });

        assert_eq!(config.keystore.password.as_deref(), Some("s3cret"));
        assert_eq!(config.mmtp.edge_router_url, "wss://edge.example.org:8888");
    }
}
