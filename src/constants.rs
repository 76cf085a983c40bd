// Gateway-wide constants

/// Largest body, in bytes, forwarded onto the messaging service.
pub const PAYLOAD_SIZE_LIMIT: usize = 48 * 1024;

/// Name of the single entry written when a payload is zipped.
pub const COMPRESSED_ENTRY_NAME: &str = "data";

/// Lifetime stamped onto every published application message.
pub const MESSAGE_TTL_DAYS: i64 = 30;

pub const RECONNECT_BACKOFF_SECS: u64 = 5;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Pause after DISCONNECT before the link is torn down.
pub const DISCONNECT_GRACE_MS: u64 = 2_000;

/// WebSocket close code for an orderly shutdown.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// OID of the `UID` attribute carrying an MRN in certificate subjects.
pub const UID_ATTRIBUTE_OID: &str = "0.9.2342.19200300.100.1.1";

pub const SECOM_SERVICE_VERSION: &str = "1.0.0";

/// Environment variable overriding the keystore password from the config file.
pub const KEYSTORE_PASSWORD_ENV: &str = "SECOM_MMS_KEYSTORE_PASSWORD";
pub const EDGE_ROUTER_URL_ENV: &str = "SECOM_MMS_EDGE_ROUTER_URL";
