//! API key minting and verification
//!
//! Keys look like `rev_<48 hex chars>`. Only the SHA-256 hash of the full
//! key is persisted; the short prefix is kept for dashboard display.

use crate::signatures::constant_time_eq;
use rand::RngCore;
use sha2::{Digest, Sha256};

const KEY_PREFIX: &str = "rev_";
const SECRET_BYTES: usize = 24;
const DISPLAY_PREFIX_LEN: usize = 8;

/// A freshly minted key. The `secret` is shown to the caller exactly once.
#[derive(Debug, Clone)]
pub struct GeneratedApiKey {
    /// Full secret, e.g. `rev_3fa9c1…`; never stored
    pub secret: String,
    /// SHA-256 hex of the full secret; this is what the database keeps
    pub key_hash: String,
    /// Display prefix, e.g. `rev_3fa9`
    pub key_prefix: String,
}

/// Mint a new API key
pub fn mint_api_key() -> GeneratedApiKey {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = format!("{KEY_PREFIX}{}", hex::encode(bytes));
    GeneratedApiKey {
        key_hash: hash_api_key(&secret),
        key_prefix: secret[..KEY_PREFIX.len() + DISPLAY_PREFIX_LEN].to_string(),
        secret,
    }
}

/// Hash a presented key the way stored hashes were produced
pub fn hash_api_key(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a presented secret against a stored hash in constant time
pub fn verify_api_key(presented: &str, stored_hash: &str) -> bool {
    if !presented.starts_with(KEY_PREFIX) {
        return false;
    }
    let computed = hash_api_key(presented);
    constant_time_eq(computed.as_bytes(), stored_hash.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_key_verifies_against_its_hash() {
        let key = mint_api_key();
        assert!(key.secret.starts_with("rev_"));
        assert_eq!(key.secret.len(), 4 + SECRET_BYTES * 2);
        assert!(verify_api_key(&key.secret, &key.key_hash));
    }

    #[test]
    fn prefix_is_a_truncation_of_the_secret() {
        let key = mint_api_key();
        assert!(key.secret.starts_with(&key.key_prefix));
        assert_eq!(key.key_prefix.len(), 12);
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let key = mint_api_key();
        let other = mint_api_key();
        assert!(!verify_api_key(&other.secret, &key.key_hash));
        assert!(!verify_api_key("not_a_key", &key.key_hash));
    }
}
