//! Directory-backed keystore.
//!
//! Each alias is a pair of files: `<alias>.key.pem` holding a PKCS#8 P-384 key (encrypted when
//! a password is configured) and `<alias>.crt.pem` holding the certificate chain, leaf first.
//! Files are read on every call so rotated keys are picked up without a restart.

use std::fs;
use std::path::{Path, PathBuf};

use p384::SecretKey;
use pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha2::{Digest, Sha256};

use crate::config::KeystoreConfig;
use crate::error::SignerError;

#[derive(Debug, Clone)]
pub struct Keystore {
    dir: PathBuf,
    password: Option<String>,
    root_ca: Option<PathBuf>,
}

impl Keystore {
    pub fn new(dir: impl Into<PathBuf>, password: Option<String>, root_ca: Option<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            password: password.filter(|p| !p.is_empty()),
            root_ca,
        }
    }

    pub fn from_config(config: &KeystoreConfig) -> Self {
        Self::new(&config.path, config.password.clone(), config.root_ca.clone())
    }

    pub fn key_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{alias}.key.pem"))
    }

    pub fn certificate_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{alias}.crt.pem"))
    }

    pub fn signing_key(&self, alias: &str) -> Result<SecretKey, SignerError> {
        let pem = read_to_string(&self.key_path(alias), alias)?;
        match self.password.as_deref() {
            Some(password) => SecretKey::from_pkcs8_encrypted_pem(&pem, password),
            None => SecretKey::from_pkcs8_pem(&pem),
        }
        .map_err(|e| SignerError::unavailable(alias, format!("cannot decode key: {e}")))
    }

    /// Key material for a TLS client identity.
    pub fn private_key_der(&self, alias: &str) -> Result<PrivateKeyDer<'static>, SignerError> {
        let document = self
            .signing_key(alias)?
            .to_pkcs8_der()
            .map_err(|e| SignerError::unavailable(alias, e))?;
        Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            document.as_bytes().to_vec(),
        )))
    }

    pub fn certificate_chain(&self, alias: &str) -> Result<Vec<CertificateDer<'static>>, SignerError> {
        let pem = fs::read(self.certificate_path(alias))
            .map_err(|e| SignerError::unavailable(alias, format!("cannot read certificate: {e}")))?;
        let chain = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SignerError::unavailable(alias, format!("cannot parse certificate: {e}")))?;
        if chain.is_empty() {
            return Err(SignerError::unavailable(alias, "certificate file holds no certificates"));
        }
        Ok(chain)
    }

    /// DER of the leaf certificate for `alias`.
    pub fn certificate_der(&self, alias: &str) -> Result<Vec<u8>, SignerError> {
        let mut chain = self.certificate_chain(alias)?;
        Ok(chain.swap_remove(0).to_vec())
    }

    /// Key and certificate chain concatenated as one PEM bundle, as HTTP clients load identities.
    pub fn identity_pem(&self, alias: &str) -> Result<Vec<u8>, SignerError> {
        let key = self
            .signing_key(alias)?
            .to_pkcs8_pem(pkcs8::LineEnding::LF)
            .map_err(|e| SignerError::unavailable(alias, e))?;
        let chain = read_to_string(&self.certificate_path(alias), alias)?;

        let mut bundle = Vec::with_capacity(key.len() + chain.len() + 1);
        bundle.extend_from_slice(key.as_bytes());
        bundle.push(b'\n');
        bundle.extend_from_slice(chain.as_bytes());
        Ok(bundle)
    }

    /// Hex SHA-256 of the configured root CA, if one is configured and readable.
    pub fn root_thumbprint(&self) -> Option<String> {
        let path = self.root_ca.as_ref()?;
        let pem = fs::read(path).ok()?;
        let root = rustls_pemfile::certs(&mut pem.as_slice()).next()?.ok()?;
        Some(hex::encode(Sha256::digest(root.as_ref())))
    }
}

fn read_to_string(path: &Path, alias: &str) -> Result<String, SignerError> {
    fs::read_to_string(path)
        .map_err(|e| SignerError::unavailable(alias, format!("{}: {e}", path.display())))
}
