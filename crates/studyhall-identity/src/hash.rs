//! Network-address hashing.
//!
//! A principal's identity is derived from its network address, but the raw
//! address is never stored or returned — only a keyed HMAC-SHA256 digest of
//! it. The hash is one-way: there is no decode path back to the address, and
//! no component may log or surface it.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Deterministically hashes a raw network address into an opaque 32-byte hex
/// string (64 hex characters), keyed by `key` so that the mapping cannot be
/// brute-forced from a public rainbow table of addresses.
///
/// The same `(address, key)` pair always produces the same hash, which is
/// what lets the identity store recognize a returning principal without ever
/// retaining the address itself.
pub fn hash_address(address: &str, key: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(address.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Folds a hashed address into a stable `i64` rate-limit key.
///
/// The Rate Limit Engine keys its counters by `(i64, Action)`, but a
/// principal's database id doesn't exist yet the first time a caller is
/// about to hit `POST /users` — there is nothing to key on but the hashed
/// address itself. Taking the first 16 hex characters (64 bits) of the
/// digest and reinterpreting them as `i64` gives every caller the same key
/// before and after their principal row is created, so the `api` and
/// `identity_create` counters don't reset once a real id exists.
///
/// This is not a cryptographic use of the digest, just a deterministic way
/// to fit it into the engine's existing key space.
pub fn fold_to_i64(hashed_address: &str) -> i64 {
    let prefix = &hashed_address[..hashed_address.len().min(16)];
    u64::from_str_radix(prefix, 16).unwrap_or(0) as i64
}
