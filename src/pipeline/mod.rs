// Upload payload handling ahead of publishing

pub mod payload;

pub use payload::{apply_size_policy, compress, decode_payload, PreparedPayload};
