//! Client-address extraction and HMAC key management.
//!
//! The network address used for hashing is the first `X-Forwarded-For`
//! entry when the deployment explicitly trusts its reverse proxy, or the
//! direct peer address otherwise. A server exposed straight to the
//! internet should leave `trust_forwarded_for` unset.

use std::net::SocketAddr;

use axum::http::HeaderMap;

pub fn client_address(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = value.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }
    peer.ip().to_string()
}

/// Loads the HMAC key used to hash client addresses, decoding a configured
/// hex string if present, or generating an ephemeral one otherwise.
pub fn load_hmac_key(configured_hex: Option<&str>) -> Vec<u8> {
    if let Some(hex_key) = configured_hex {
        match hex::decode(hex_key) {
            Ok(bytes) => return bytes,
            Err(_) => {
                tracing::warn!(
                    "configured identity.hmac_key is not valid hex, generating an ephemeral key instead"
                );
            }
        }
    } else {
        tracing::warn!(
            "no identity.hmac_key configured, generating an ephemeral key; \
             principals will not be recognized across restarts"
        );
    }
    let mut key = uuid::Uuid::new_v4().as_bytes().to_vec();
    key.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "203.0.113.5:12345".parse().unwrap()
    }

    #[test]
    fn falls_back_to_peer_address_without_header() {
        let headers = HeaderMap::new();
        assert_eq!(client_address(&headers, peer(), true), "203.0.113.5");
    }

    #[test]
    fn uses_first_forwarded_for_entry_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.7, 203.0.113.5"),
        );
        assert_eq!(client_address(&headers, peer(), true), "198.51.100.7");
    }

    #[test]
    fn ignores_forwarded_for_when_not_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(client_address(&headers, peer(), false), "203.0.113.5");
    }

    #[test]
    fn generates_ephemeral_key_without_config() {
        let key = load_hmac_key(None);
        assert_eq!(key.len(), 32);
    }

    #[test]
    fn decodes_configured_hex_key() {
        let key = load_hmac_key(Some("deadbeef"));
        assert_eq!(key, vec![0xde, 0xad, 0xbe, 0xef]);
    }
}
