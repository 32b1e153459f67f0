//! Application-layer credential encryption
//!
//! Provider credentials are encrypted with AES-256-GCM under a
//! per-deployment master key before they reach the database. The ciphertext
//! wire format is `v1|iv|tag|ct` with each segment base64-encoded.
//!
//! Two key slots support rotation: writes always use `current`; reads try
//! `current` first, then `previous`. [`CredentialCipher::rotate`]
//! re-encrypts a value under the current key.

use crate::errors::{SecurityError, SecurityResult};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use revback_shared::EncryptionConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;

const VERSION: &str = "v1";
const TAG_LEN: usize = 16;

/// AES-256-GCM cipher over the deployment master key slots
#[derive(Clone)]
pub struct CredentialCipher {
    current: [u8; 32],
    previous: Option<[u8; 32]>,
}

impl CredentialCipher {
    /// Build a cipher from the hex-encoded key slots
    pub fn from_config(config: &EncryptionConfig) -> SecurityResult<Self> {
        let current = decode_key(&config.key_hex)?;
        let previous = config
            .previous_key_hex
            .as_deref()
            .map(decode_key)
            .transpose()?;
        Ok(Self { current, previous })
    }

    /// Encrypt a plaintext string under the current key
    pub fn encrypt(&self, plaintext: &str) -> SecurityResult<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.current));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut combined = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| SecurityError::EncryptionFailed(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext; the wire format keeps
        // them as separate segments
        let tag = combined.split_off(combined.len() - TAG_LEN);
        Ok(format!(
            "{VERSION}|{}|{}|{}",
            BASE64.encode(nonce),
            BASE64.encode(&tag),
            BASE64.encode(&combined),
        ))
    }

    /// Decrypt a `v1|iv|tag|ct` string, trying current then previous key
    pub fn decrypt(&self, ciphertext: &str) -> SecurityResult<String> {
        let (nonce, tag, ct) = parse_segments(ciphertext)?;

        match decrypt_with(&self.current, &nonce, &tag, &ct) {
            Ok(plaintext) => Ok(plaintext),
            Err(current_err) => match &self.previous {
                Some(previous) => decrypt_with(previous, &nonce, &tag, &ct)
                    .map_err(|_| current_err),
                None => Err(current_err),
            },
        }
    }

    /// Re-encrypt a ciphertext under the current key.
    ///
    /// Used by the rotation tool after swapping the key slots; a value
    /// already encrypted under the current key round-trips unchanged in
    /// plaintext.
    pub fn rotate(&self, ciphertext: &str) -> SecurityResult<String> {
        let plaintext = self.decrypt(ciphertext)?;
        self.encrypt(&plaintext)
    }

    /// Encrypt a serializable credential object
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> SecurityResult<String> {
        let plaintext = serde_json::to_string(value)?;
        self.encrypt(&plaintext)
    }

    /// Decrypt into a typed credential object
    pub fn decrypt_json<T: DeserializeOwned>(&self, ciphertext: &str) -> SecurityResult<T> {
        let plaintext = self.decrypt(ciphertext)?;
        Ok(serde_json::from_str(&plaintext)?)
    }
}

fn decode_key(hex_key: &str) -> SecurityResult<[u8; 32]> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| SecurityError::InvalidKey(format!("not valid hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| SecurityError::InvalidKey("expected 32 bytes".to_string()))
}

fn parse_segments(ciphertext: &str) -> SecurityResult<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let mut parts = ciphertext.split('|');
    let version = parts
        .next()
        .ok_or_else(|| SecurityError::MalformedCiphertext("empty".to_string()))?;
    if version != VERSION {
        return Err(SecurityError::MalformedCiphertext(format!(
            "unsupported version: {version}"
        )));
    }

    let mut decode = |segment: &'static str| -> SecurityResult<Vec<u8>> {
        let value = parts
            .next()
            .ok_or_else(|| SecurityError::MalformedCiphertext(format!("missing {segment}")))?;
        BASE64
            .decode(value)
            .map_err(|e| SecurityError::MalformedCiphertext(format!("{segment}: {e}")))
    };

    let nonce = decode("iv")?;
    let tag = decode("tag")?;
    let ct = decode("ct")?;
    if nonce.len() != 12 {
        return Err(SecurityError::MalformedCiphertext(format!(
            "iv must be 12 bytes, got {}",
            nonce.len()
        )));
    }
    if tag.len() != TAG_LEN {
        return Err(SecurityError::MalformedCiphertext(format!(
            "tag must be {TAG_LEN} bytes, got {}",
            tag.len()
        )));
    }
    Ok((nonce, tag, ct))
}

fn decrypt_with(key: &[u8; 32], nonce: &[u8], tag: &[u8], ct: &[u8]) -> SecurityResult<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut combined = ct.to_vec();
    combined.extend_from_slice(tag);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), combined.as_slice())
        .map_err(|e| SecurityError::DecryptionFailed(e.to_string()))?;
    String::from_utf8(plaintext)
        .map_err(|e| SecurityError::DecryptionFailed(format!("not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(key: &str, previous: Option<&str>) -> EncryptionConfig {
        EncryptionConfig {
            key_hex: key.to_string(),
            previous_key_hex: previous.map(str::to_string),
        }
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = CredentialCipher::from_config(&config(&"11".repeat(32), None)).unwrap();
        let ciphertext = cipher.encrypt("sk_live_secret").unwrap();
        assert!(ciphertext.starts_with("v1|"));
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), "sk_live_secret");
    }

    #[test]
    fn decrypt_falls_back_to_previous_key() {
        let old_key = "22".repeat(32);
        let new_key = "33".repeat(32);

        let old_cipher = CredentialCipher::from_config(&config(&old_key, None)).unwrap();
        let ciphertext = old_cipher.encrypt("subdomain:acme").unwrap();

        let rotated = CredentialCipher::from_config(&config(&new_key, Some(&old_key))).unwrap();
        assert_eq!(rotated.decrypt(&ciphertext).unwrap(), "subdomain:acme");
    }

    #[test]
    fn rotate_re_encrypts_under_current_key() {
        let old_key = "44".repeat(32);
        let new_key = "55".repeat(32);

        let old_cipher = CredentialCipher::from_config(&config(&old_key, None)).unwrap();
        let ciphertext = old_cipher.encrypt("api-key").unwrap();

        let rotated = CredentialCipher::from_config(&config(&new_key, Some(&old_key))).unwrap();
        let new_ciphertext = rotated.rotate(&ciphertext).unwrap();

        // the re-encrypted value no longer needs the previous slot
        let current_only = CredentialCipher::from_config(&config(&new_key, None)).unwrap();
        assert_eq!(current_only.decrypt(&new_ciphertext).unwrap(), "api-key");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let cipher = CredentialCipher::from_config(&config(&"66".repeat(32), None)).unwrap();
        let ciphertext = cipher.encrypt("secret").unwrap();

        let other = CredentialCipher::from_config(&config(&"77".repeat(32), None)).unwrap();
        assert!(matches!(
            other.decrypt(&ciphertext),
            Err(SecurityError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn malformed_ciphertext_is_rejected() {
        let cipher = CredentialCipher::from_config(&config(&"88".repeat(32), None)).unwrap();
        assert!(cipher.decrypt("v2|a|b|c").is_err());
        assert!(cipher.decrypt("v1|notbase64").is_err());
        assert!(cipher.decrypt("").is_err());
    }

    #[test]
    fn json_credentials_round_trip() {
        let cipher = CredentialCipher::from_config(&config(&"99".repeat(32), None)).unwrap();
        let creds = json!({"api_key": "sk_test_1", "subdomain": "acme"});
        let ciphertext = cipher.encrypt_json(&creds).unwrap();
        let decrypted: serde_json::Value = cipher.decrypt_json(&ciphertext).unwrap();
        assert_eq!(decrypted, creds);
    }
}
