//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding keys used in column families.

use meterd_core::{PrincipalId, RecordId};

/// Create a billing context key from a principal ID.
#[must_use]
pub fn context_key(principal_id: &PrincipalId) -> Vec<u8> {
    principal_id.as_bytes().to_vec()
}

/// Create a usage record key from a record ID.
#[must_use]
pub fn record_key(record_id: &RecordId) -> Vec<u8> {
    record_id.as_bytes().to_vec()
}

/// Create an idempotency index key.
///
/// Format: `principal_id (16 bytes) || request_id_len (4 bytes BE) ||
/// client_request_id || fingerprint`. The length prefix keeps the encoding
/// injective for arbitrary request-id contents.
#[must_use]
pub fn idempotency_key(
    principal_id: &PrincipalId,
    client_request_id: &str,
    fingerprint: &str,
) -> Vec<u8> {
    let request_bytes = client_request_id.as_bytes();
    let mut key = Vec::with_capacity(20 + request_bytes.len() + fingerprint.len());
    key.extend_from_slice(principal_id.as_bytes());
    key.extend_from_slice(&u32::try_from(request_bytes.len()).unwrap_or(u32::MAX).to_be_bytes());
    key.extend_from_slice(request_bytes);
    key.extend_from_slice(fingerprint.as_bytes());
    key
}

/// Create a result key from the owning record ID.
#[must_use]
pub fn result_key(record_id: &RecordId) -> Vec<u8> {
    record_id.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_key_length() {
        let principal = PrincipalId::generate();
        assert_eq!(context_key(&principal).len(), 16);
    }

    #[test]
    fn idempotency_key_format() {
        let principal = PrincipalId::generate();
        let key = idempotency_key(&principal, "req_1", "abc");

        assert_eq!(&key[..16], principal.as_bytes());
        assert_eq!(&key[16..20], &5u32.to_be_bytes());
        assert_eq!(&key[20..25], b"req_1");
        assert_eq!(&key[25..], b"abc");
    }

    #[test]
    fn idempotency_key_is_injective() {
        let principal = PrincipalId::generate();
        // Without the length prefix these two would collide.
        let a = idempotency_key(&principal, "ab", "cdef");
        let b = idempotency_key(&principal, "abc", "def");
        assert_ne!(a, b);
    }
}
