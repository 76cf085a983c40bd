//! Payload decoding and size policy applied before publishing.

use std::io::{Cursor, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::constants::COMPRESSED_ENTRY_NAME;

/// Decodes a base64 payload, falling back to the raw bytes when it is not valid base64.
pub fn decode_payload(raw: &[u8]) -> Vec<u8> {
    match BASE64.decode(raw) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!(error = %e, "Payload is not base64; forwarding raw bytes");
            raw.to_vec()
        }
    }
}

/// Zips `data` as a single entry named `data`.
pub fn compress(data: &[u8]) -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(COMPRESSED_ENTRY_NAME, options)?;
    writer.write_all(data)?;
    Ok(writer.finish()?.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedPayload {
    Ready { body: Vec<u8>, compressed: bool },
    Oversized { size: usize },
}

/// Applies the size limit to a decoded payload.
///
/// Oversized payloads whose envelope did not set the compression flag get one zip attempt;
/// whatever is still over `limit` afterwards is reported oversized and must not be sent.
pub fn apply_size_policy(data: Vec<u8>, compression_flag: bool, limit: usize) -> PreparedPayload {
    if data.len() <= limit {
        return PreparedPayload::Ready {
            body: data,
            compressed: false,
        };
    }

    // TODO: gate on whether the uploader already compressed once the intended flag semantics are confirmed
    if !compression_flag {
        match compress(&data) {
            Ok(zipped) if zipped.len() <= limit => {
                debug!(original = data.len(), zipped = zipped.len(), "Compressed oversized payload");
                return PreparedPayload::Ready {
                    body: zipped,
                    compressed: true,
                };
            }
            Ok(zipped) => return PreparedPayload::Oversized { size: zipped.len() },
            Err(e) => warn!(error = %e, "Could not compress payload"),
        }
    }

    PreparedPayload::Oversized { size: data.len() }
}
