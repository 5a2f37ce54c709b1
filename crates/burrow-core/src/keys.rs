//! Tunnel key management
//!
//! Keys are X25519 values exchanged as standard base64 text, the encoding
//! the tunnel engine reads from its configuration files. Every function here
//! is pure and stateless, so callers may use them concurrently without
//! synchronisation.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::KeyError;

/// Length of a raw key in bytes
pub const KEY_LEN: usize = 32;

/// A base64-encoded X25519 key pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    /// Private half; never leaves the host that generated it
    pub private_key: String,
    /// Public half, shared with the peer
    pub public_key: String,
}

impl KeyPair {
    /// Generate a fresh key pair
    pub fn generate() -> Self {
        let (private_key, public_key) = generate_key_pair();
        Self {
            private_key,
            public_key,
        }
    }

    /// Rebuild a key pair from an existing private key
    pub fn from_private(private_key: &str) -> Result<Self, KeyError> {
        let public_key = derive_public(private_key)?;
        Ok(Self {
            private_key: private_key.trim().to_string(),
            public_key,
        })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"[REDACTED]")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Generate a new `(private, public)` key pair, both base64 encoded
pub fn generate_key_pair() -> (String, String) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);

    (STANDARD.encode(secret.to_bytes()), STANDARD.encode(public.as_bytes()))
}

/// Derive the public key matching a base64 private key
pub fn derive_public(private_key: &str) -> Result<String, KeyError> {
    let bytes = decode_key(private_key)?;
    let secret = StaticSecret::from(bytes);
    let public = PublicKey::from(&secret);
    Ok(STANDARD.encode(public.as_bytes()))
}

/// Check that a key string decodes to exactly 32 bytes
pub fn validate(key: &str) -> Result<(), KeyError> {
    decode_key(key).map(|_| ())
}

fn decode_key(key: &str) -> Result<[u8; KEY_LEN], KeyError> {
    let bytes = STANDARD
        .decode(key.trim())
        .map_err(|e| KeyError::InvalidKey(format!("not valid base64: {}", e)))?;

    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        KeyError::InvalidKey(format!(
            "decodes to {} bytes, expected {}",
            bytes.len(),
            KEY_LEN
        ))
    })
}

/// Short, log-safe prefix of a public key
pub fn short_key(public_key: &str) -> &str {
    public_key.get(..8).unwrap_or(public_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_are_44_chars() {
        let (private_key, public_key) = generate_key_pair();
        assert_eq!(private_key.len(), 44);
        assert_eq!(public_key.len(), 44);
    }

    #[test]
    fn test_derive_public_matches_generated() {
        for _ in 0..16 {
            let (private_key, public_key) = generate_key_pair();
            assert_eq!(derive_public(&private_key).unwrap(), public_key);
        }
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let (a, _) = generate_key_pair();
        let (b, _) = generate_key_pair();
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_rejects_wrong_length() {
        // 31 bytes of zeros
        let short = STANDARD.encode([0u8; 31]);
        assert!(matches!(validate(&short), Err(KeyError::InvalidKey(_))));

        let long = STANDARD.encode([0u8; 33]);
        assert!(matches!(validate(&long), Err(KeyError::InvalidKey(_))));
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(validate("not a key!").is_err());
        assert!(validate("").is_err());
    }

    #[test]
    fn test_derive_public_rejects_invalid_private() {
        assert!(matches!(
            derive_public("AAAA"),
            Err(KeyError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_validate_tolerates_trailing_newline() {
        let (private_key, _) = generate_key_pair();
        assert!(validate(&format!("{}\n", private_key)).is_ok());
    }

    #[test]
    fn test_key_pair_debug_redacts_private() {
        let pair = KeyPair::generate();
        let debug = format!("{:?}", pair);
        assert!(!debug.contains(&pair.private_key));
        assert!(debug.contains(&pair.public_key));
    }

    #[test]
    fn test_short_key() {
        assert_eq!(short_key("abcdefghijk"), "abcdefgh");
        assert_eq!(short_key("abc"), "abc");
    }
}
