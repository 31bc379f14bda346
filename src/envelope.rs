//! # Encryption Envelope
//!
//! Wraps processed audio in a Fernet token (AES-128-CBC + HMAC-SHA256) under
//! a key that lives for as long as the process does.
//!
//! ## Key Lifecycle:
//! - Generated once by [`ProcessKey::generate`] at startup
//! - Held in memory only, never written anywhere, never rotated
//! - Tokens from a previous run cannot be decrypted after a restart
//!
//! Handing the key out over HTTP (`GET /api/get-key`) defeats the point of
//! encrypting at all; it exists for the demo client and can be switched off
//! with `security.expose_key`.

use fernet::Fernet;
use std::fmt;
use thiserror::Error;

/// Decryption failed: malformed token, tampered token, or a different key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("decryption failed: {reason}")]
pub struct AuthenticationError {
    reason: &'static str,
}

impl AuthenticationError {
    fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

/// Fernet key material, kept alongside its URL-safe base64 text form.
pub struct ProcessKey {
    text: String,
    cipher: Fernet,
}

impl ProcessKey {
    /// Fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let text = Fernet::generate_key();
        // generate_key always yields 32 bytes of valid key material.
        let cipher = Fernet::new(&text).unwrap_or_else(|| unreachable!("generated Fernet key is valid"));
        Self { text, cipher }
    }

    pub fn as_text(&self) -> &str {
        &self.text
    }
}

impl fmt::Debug for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProcessKey(<redacted>)")
    }
}

/// Authenticated symmetric encryption under a single [`ProcessKey`].
pub struct EncryptionEnvelope {
    key: ProcessKey,
}

impl EncryptionEnvelope {
    pub fn new(key: ProcessKey) -> Self {
        Self { key }
    }

    /// Encrypt into the token's ASCII bytes.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        self.key.cipher.encrypt(plaintext).into_bytes()
    }

    pub fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>, AuthenticationError> {
        let text = std::str::from_utf8(token).map_err(|_| AuthenticationError::new("token is not valid text"))?;
        self.key
            .cipher
            .decrypt(text.trim())
            .map_err(|_| AuthenticationError::new("invalid token or wrong key"))
    }

    pub fn key_text(&self) -> &str {
        self.key.as_text()
    }
}

impl fmt::Debug for EncryptionEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionEnvelope").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let envelope = EncryptionEnvelope::new(ProcessKey::generate());
        let plaintext = b"RIFF....WAVEfmt some audio bytes".to_vec();

        let token = envelope.encrypt(&plaintext);
        assert_ne!(token, plaintext);
        assert_eq!(envelope.decrypt(&token).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let alice = EncryptionEnvelope::new(ProcessKey::generate());
        let bob = EncryptionEnvelope::new(ProcessKey::generate());

        let token = alice.encrypt(b"secret voice");
        assert!(bob.decrypt(&token).is_err());
    }

    #[test]
    fn test_malformed_tokens_fail_authentication() {
        let envelope = EncryptionEnvelope::new(ProcessKey::generate());

        assert!(envelope.decrypt(b"not a token").is_err());
        assert!(envelope.decrypt(&[0xff, 0xfe, 0x00]).is_err());
        assert!(envelope.decrypt(b"").is_err());

        let mut token = envelope.encrypt(b"payload");
        let last = token.len() - 5;
        token[last] = if token[last] == b'A' { b'B' } else { b'A' };
        assert!(envelope.decrypt(&token).is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let envelope = EncryptionEnvelope::new(ProcessKey::generate());
        let rendered = format!("{:?}", envelope);
        assert!(!rendered.contains(envelope.key_text()));
        assert!(rendered.contains("redacted"));
    }
}
