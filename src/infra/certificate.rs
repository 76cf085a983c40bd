//! Uploader identity from an embedded X.509 certificate.
//!
//! Certificates arrive in whatever shape the uploading client chose: base64 DER, PEM, base64
//! of a PEM document, or raw DER bytes. All of them normalise to DER before parsing.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use x509_parser::certificate::X509Certificate;
use x509_parser::parse_x509_certificate;
use x509_parser::pem::parse_x509_pem;

use crate::constants::UID_ATTRIBUTE_OID;
use crate::error::CertificateError;

const PEM_PREFIX: &[u8] = b"-----BEGIN";

/// Normalises certificate bytes to DER.
pub fn certificate_der(bytes: &[u8]) -> Result<Vec<u8>, CertificateError> {
    let trimmed = bytes.trim_ascii();
    if trimmed.is_empty() {
        return Err(CertificateError::InvalidCertificate("empty certificate".into()));
    }

    let compact: Vec<u8> = trimmed
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let decoded = if trimmed.starts_with(PEM_PREFIX) {
        trimmed.to_vec()
    } else {
        BASE64.decode(&compact).unwrap_or_else(|_| trimmed.to_vec())
    };

    if decoded.trim_ascii_start().starts_with(PEM_PREFIX) {
        let (_, pem) = parse_x509_pem(decoded.trim_ascii_start())
            .map_err(|e| CertificateError::InvalidCertificate(e.to_string()))?;
        return Ok(pem.contents);
    }
    Ok(decoded)
}

/// Runs `f` against the parsed certificate.
pub fn with_certificate<T>(
    bytes: &[u8],
    f: impl FnOnce(&X509Certificate<'_>) -> Result<T, CertificateError>,
) -> Result<T, CertificateError> {
    let der = certificate_der(bytes)?;
    let (_, certificate) = parse_x509_certificate(&der)
        .map_err(|e| CertificateError::InvalidCertificate(e.to_string()))?;
    f(&certificate)
}

/// Extracts the MRN carried in the subject `UID` attribute.
pub fn resolve_identity(bytes: &[u8]) -> Result<String, CertificateError> {
    with_certificate(bytes, |certificate| {
        certificate
            .subject()
            .iter_attributes()
            .find(|attr| attr.attr_type().to_id_string() == UID_ATTRIBUTE_OID)
            .ok_or(CertificateError::MissingIdentity)?
            .as_str()
            .map(str::to_owned)
            .map_err(|_| CertificateError::MissingIdentity)
    })
}

/// Encodes DER bytes as a PEM certificate block.
pub fn to_pem(der: &[u8]) -> String {
    let encoded = BASE64.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}
