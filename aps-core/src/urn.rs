//! Helpers for model derivative URNs.
//!
//! The derivative service addresses a source file by the URL-safe base64 of
//! its storage object id, without padding and without an `urn:` prefix.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

pub fn encode_urn(storage_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(storage_id.as_bytes())
}

pub fn strip_urn_prefix(urn: &str) -> &str {
    urn.strip_prefix("urn:").unwrap_or(urn)
}
