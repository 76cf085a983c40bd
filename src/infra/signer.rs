use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use p384::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::Deserialize;
use sha2::{Digest, Sha384};
use sha3::Sha3_384;

use crate::app::ports::{CertificateProvider, SignatureProvider};
use crate::domain::secom::EnvelopeStamp;
use crate::error::{CertificateError, SignerError};
use crate::infra::certificate;
use crate::infra::keystore::Keystore;

/// ECDSA over P-384 with the digest named by the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum SignatureAlgorithm {
    Sha384WithEcdsa,
    Sha3_384WithEcdsa,
}

impl SignatureAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha384WithEcdsa => "SHA384withECDSA",
            SignatureAlgorithm::Sha3_384WithEcdsa => "SHA3-384withECDSA",
        }
    }

    fn digest(&self, payload: &[u8]) -> Vec<u8> {
        match self {
            SignatureAlgorithm::Sha384WithEcdsa => Sha384::digest(payload).to_vec(),
            SignatureAlgorithm::Sha3_384WithEcdsa => Sha3_384::digest(payload).to_vec(),
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [SignatureAlgorithm::Sha384WithEcdsa, SignatureAlgorithm::Sha3_384WithEcdsa]
            .into_iter()
            .find(|algorithm| algorithm.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SignerError::UnsupportedAlgorithm(s.to_string()))
    }
}

impl TryFrom<String> for SignatureAlgorithm {
    type Error = SignerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Keystore-backed signer bound to one algorithm and one default alias.
pub struct KeystoreSigner {
    keystore: Arc<Keystore>,
    algorithm: SignatureAlgorithm,
    alias: String,
}

impl KeystoreSigner {
    pub fn new(keystore: Arc<Keystore>, algorithm: SignatureAlgorithm, alias: impl Into<String>) -> Self {
        Self {
            keystore,
            algorithm,
            alias: alias.into(),
        }
    }
}

impl SignatureProvider for KeystoreSigner {
    fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    fn key_alias(&self) -> &str {
        &self.alias
    }

    fn sign(&self, payload: &[u8], key_alias: &str) -> Result<Vec<u8>, SignerError> {
        let signing_key = SigningKey::from(self.keystore.signing_key(key_alias)?);
        let signature: Signature = signing_key
            .sign_prehash(&self.algorithm.digest(payload))
            .map_err(|e| SignerError::Signature(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn verify(&self, payload: &[u8], signature: &[u8], certificate: &[u8]) -> bool {
        let Ok(signature) = Signature::from_der(signature) else {
            return false;
        };
        let key = certificate::with_certificate(certificate, |cert| {
            VerifyingKey::from_sec1_bytes(&cert.public_key().subject_public_key.data)
                .map_err(|e| CertificateError::InvalidCertificate(e.to_string()))
        });
        match key {
            Ok(key) => key
                .verify_prehash(&self.algorithm.digest(payload), &signature)
                .is_ok(),
            Err(_) => false,
        }
    }
}

impl CertificateProvider for KeystoreSigner {
    fn envelope_stamp(&self) -> Result<EnvelopeStamp, SignerError> {
        let der = self.keystore.certificate_der(&self.alias)?;
        Ok(EnvelopeStamp {
            envelope_signature_certificate: certificate::to_pem(&der),
            envelope_root_certificate_thumbprint: self.keystore.root_thumbprint(),
            envelope_signature_time: Some(Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::keystore::tests::write_identity;
    use tempfile::TempDir;

    fn signer(dir: &TempDir, algorithm: SignatureAlgorithm) -> (KeystoreSigner, Vec<u8>) {
        let der = write_identity(dir.path(), "mms", None);
        let keystore = Arc::new(Keystore::new(dir.path(), None, None));
        (KeystoreSigner::new(keystore, algorithm, "mms"), der)
    }

    #[test]
    fn algorithm_names_parse() {
        assert_eq!(
            "SHA384withECDSA".parse::<SignatureAlgorithm>().unwrap(),
            SignatureAlgorithm::Sha384WithEcdsa
        );
        assert_eq!(
            "sha3-384withecdsa".parse::<SignatureAlgorithm>().unwrap(),
            SignatureAlgorithm::Sha3_384WithEcdsa
        );
        assert!("SHA256withRSA".parse::<SignatureAlgorithm>().is_err());
    }

    #[test]
    fn signatures_verify_against_the_signing_certificate() {
        for algorithm in [SignatureAlgorithm::Sha384WithEcdsa, SignatureAlgorithm::Sha3_384WithEcdsa] {
            let dir = TempDir::new().unwrap();
            let (signer, der) = signer(&dir, algorithm);

            let signature = signer.sign(b"payload", "mms").unwrap();
            assert!(signer.verify(b"payload", &signature, &der));
            assert!(!signer.verify(b"tampered", &signature, &der));
        }
    }

    #[test]
    fn digest_algorithms_are_not_interchangeable() {
        let dir = TempDir::new().unwrap();
        let (sha2_signer, der) = signer(&dir, SignatureAlgorithm::Sha384WithEcdsa);
        let sha3_signer = KeystoreSigner::new(
            Arc::new(Keystore::new(dir.path(), None, None)),
            SignatureAlgorithm::Sha3_384WithEcdsa,
            "mms",
        );

        let signature = sha2_signer.sign(b"payload", "mms").unwrap();
        assert!(!sha3_signer.verify(b"payload", &signature, &der));
    }

    #[test]
    fn verify_is_false_for_malformed_inputs() {
        let dir = TempDir::new().unwrap();
        let (signer, der) = signer(&dir, SignatureAlgorithm::Sha384WithEcdsa);

        assert!(!signer.verify(b"payload", b"not der", &der));
        let signature = signer.sign(b"payload", "mms").unwrap();
        assert!(!signer.verify(b"payload", &signature, b"not a certificate"));
    }

    #[test]
    fn missing_key_is_signing_unavailable() {
        let dir = TempDir::new().unwrap();
        let (signer, _) = signer(&dir, SignatureAlgorithm::Sha384WithEcdsa);

        assert!(matches!(
            signer.sign(b"payload", "other"),
            Err(SignerError::SigningUnavailable { .. })
        ));
    }

    #[test]
    fn envelope_stamp_carries_the_pem_certificate() {
        let dir = TempDir::new().unwrap();
        let (signer, der) = signer(&dir, SignatureAlgorithm::Sha3_384WithEcdsa);

        let stamp = signer.envelope_stamp().unwrap();
        assert_eq!(
            certificate::certificate_der(stamp.envelope_signature_certificate.as_bytes()).unwrap(),
            der
        );
        assert!(stamp.envelope_signature_time.is_some());
    }
}
