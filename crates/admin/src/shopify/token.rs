//! Encryption of stored Admin API access tokens.
//!
//! Stored format: `v1:<base64 nonce>:<base64 ciphertext+tag>` (AES-256-GCM,
//! 96-bit random nonce).

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::warn;

use crate::config::ShopifyGatewayConfig;

const FORMAT_VERSION: &str = "v1";
const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

/// Errors that can occur while encrypting or decrypting a stored token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenCipherError {
    /// The key is not 32 bytes of base64.
    #[error("invalid token encryption key: {0}")]
    InvalidKey(String),

    /// The stored value is not in the cipher format.
    #[error("stored token is not in a recognized cipher format")]
    UnrecognizedFormat,

    /// The stored value is in the cipher format but no key is configured.
    #[error("stored token is encrypted but no encryption key is configured")]
    MissingKey,

    /// A base64 segment of the stored value is malformed.
    #[error("stored token is malformed: {0}")]
    Decode(String),

    /// Authentication failed (wrong key or tampered cipher text).
    #[error("stored token could not be decrypted")]
    Decrypt,
}

/// AES-256-GCM cipher for access tokens.
///
/// Implements `Debug` manually to keep the key out of logs.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl TokenCipher {
    /// Create a cipher from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns `TokenCipherError::InvalidKey` if the key is not valid base64
    /// or does not decode to 32 bytes.
    pub fn from_base64_key(key: &SecretString) -> Result<Self, TokenCipherError> {
        let bytes = BASE64
            .decode(key.expose_secret().trim())
            .map_err(|e| TokenCipherError::InvalidKey(e.to_string()))?;
        Self::from_key_bytes(&bytes)
    }

    /// Create a cipher from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns `TokenCipherError::InvalidKey` unless `bytes` is 32 bytes long.
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self, TokenCipherError> {
        if bytes.len() != KEY_LENGTH {
            return Err(TokenCipherError::InvalidKey(format!(
                "expected {KEY_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Generate a fresh random key, base64-encoded.
    #[must_use]
    pub fn generate_key() -> SecretString {
        let key = Aes256Gcm::generate_key(OsRng);
        SecretString::from(BASE64.encode(key))
    }

    /// Whether a stored value looks like output of [`TokenCipher::encrypt`].
    #[must_use]
    pub fn is_cipher_format(stored: &str) -> bool {
        let mut parts = stored.split(':');
        parts.next() == Some(FORMAT_VERSION)
            && parts.next().is_some_and(|p| !p.is_empty())
            && parts.next().is_some_and(|p| !p.is_empty())
            && parts.next().is_none()
    }

    /// Encrypt a plaintext token into the stored format.
    ///
    /// # Errors
    ///
    /// Returns `TokenCipherError::Decrypt` if the AEAD rejects the input
    /// (only possible for absurdly large plaintexts).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, TokenCipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| TokenCipherError::Decrypt)?;

        Ok(format!(
            "{FORMAT_VERSION}:{}:{}",
            BASE64.encode(nonce),
            BASE64.encode(ciphertext)
        ))
    }

    /// Decrypt a stored value.
    ///
    /// # Errors
    ///
    /// - `UnrecognizedFormat` if `stored` is not in the cipher format
    /// - `Decode` if a segment is not valid base64 or the nonce has the wrong size
    /// - `Decrypt` if authentication fails
    pub fn decrypt(&self, stored: &str) -> Result<SecretString, TokenCipherError> {
        if !Self::is_cipher_format(stored) {
            return Err(TokenCipherError::UnrecognizedFormat);
        }

        let mut parts = stored.splitn(3, ':').skip(1);
        let (Some(nonce_b64), Some(ciphertext_b64)) = (parts.next(), parts.next()) else {
            return Err(TokenCipherError::UnrecognizedFormat);
        };

        let nonce_bytes = BASE64
            .decode(nonce_b64)
            .map_err(|e| TokenCipherError::Decode(e.to_string()))?;
        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(TokenCipherError::Decode(format!(
                "nonce must be {NONCE_LENGTH} bytes, got {}",
                nonce_bytes.len()
            )));
        }
        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|e| TokenCipherError::Decode(e.to_string()))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| TokenCipherError::Decrypt)?;

        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|_| TokenCipherError::Decrypt)
    }
}

/// Turns a stored token into a usable one.
///
/// Encrypted values are always decrypted (and rejected if that fails).
/// Values that are not in the cipher format are rejected unless the
/// plaintext migration flag is set, in which case they are passed through
/// with a warning.
#[derive(Debug, Clone)]
pub struct TokenDecoder {
    cipher: Option<TokenCipher>,
    allow_plaintext: bool,
}

impl TokenDecoder {
    /// Create a decoder.
    #[must_use]
    pub const fn new(cipher: Option<TokenCipher>, allow_plaintext: bool) -> Self {
        Self {
            cipher,
            allow_plaintext,
        }
    }

    /// Build a decoder from gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns `TokenCipherError::InvalidKey` if the configured key is unusable.
    pub fn from_config(config: &ShopifyGatewayConfig) -> Result<Self, TokenCipherError> {
        let cipher = config
            .token_key
            .as_ref()
            .map(TokenCipher::from_base64_key)
            .transpose()?;
        Ok(Self::new(cipher, config.allow_plaintext_tokens))
    }

    /// Decode a stored token.
    ///
    /// # Errors
    ///
    /// See [`TokenCipherError`]; `UnrecognizedFormat` is returned for
    /// plaintext values when the migration flag is off.
    pub fn decode(&self, stored: &str) -> Result<SecretString, TokenCipherError> {
        if TokenCipher::is_cipher_format(stored) {
            let cipher = self.cipher.as_ref().ok_or(TokenCipherError::MissingKey)?;
            return cipher.decrypt(stored);
        }

        if self.allow_plaintext && !stored.is_empty() {
            warn!("Using unencrypted stored access token; re-encrypt it with `pulse-cli token encrypt`");
            return Ok(SecretString::from(stored.to_string()));
        }

        Err(TokenCipherError::UnrecognizedFormat)
    }
}
