//! Canonical encoding used as the signing input
//!
//! Serializes through `serde_json::Value`, whose object map is backed by a
//! `BTreeMap`, so keys come out in lexicographic order regardless of
//! construction order. The signature slots (`signature`, `countersignature`,
//! `security`) are stripped at the top level so that verification is
//! independent of signing state.

use crate::{CryptoError, CryptoResult};
use serde::Serialize;
use serde_json::Value;

/// Encode a value to its canonical signing bytes
pub fn canonical_bytes<T: Serialize>(value: &T) -> CryptoResult<Vec<u8>> {
    let mut json = serde_json::to_value(value)
        .map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
    if let Value::Object(map) = &mut json {
        map.remove("signature");
        map.remove("countersignature");
        map.remove("security");
    }
    serde_json::to_vec(&json).map_err(|e| CryptoError::Canonicalization(e.to_string()))
}
