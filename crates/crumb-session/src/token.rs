//! Token framing and encryption.
//!
//! Wire format: `base64(nonce || seal(control + "," + data))` where both
//! segments are already base64 (see [`crate::codec`]). The nonce is random
//! per token, so encrypting the same session twice gives different tokens.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use ring::aead::{self, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, SessionError};

/// Separator between the control and data segments.
pub const DELIMITER: char = ',';

/// Symmetric AEAD algorithms a token can be sealed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl CipherAlgorithm {
    /// Resolve a configured algorithm name against the key that will be used.
    ///
    /// `AES` picks the GCM variant matching the key length (16 or 32 bytes).
    /// Explicit names must agree with the key length.
    pub fn resolve(name: &str, key_len: usize) -> Result<Self> {
        let algorithm = match name.trim().to_ascii_uppercase().as_str() {
            "AES" | "AES-GCM" => match key_len {
                16 => CipherAlgorithm::Aes128Gcm,
                32 => CipherAlgorithm::Aes256Gcm,
                other => {
                    return Err(SessionError::SecurityConfig(format!(
                        "AES keys must be 16 or 32 bytes, got {}",
                        other
                    )));
                }
            },
            "AES-128-GCM" | "AES128-GCM" => CipherAlgorithm::Aes128Gcm,
            "AES-256-GCM" | "AES256-GCM" => CipherAlgorithm::Aes256Gcm,
            "CHACHA20-POLY1305" | "CHACHA20" => CipherAlgorithm::ChaCha20Poly1305,
            _ => {
                return Err(SessionError::SecurityConfig(format!(
                    "unsupported encryption algorithm '{}'",
                    name
                )));
            }
        };

        if algorithm.key_len() != key_len {
            return Err(SessionError::SecurityConfig(format!(
                "{} requires a {}-byte key, got {}",
                algorithm.name(),
                algorithm.key_len(),
                key_len
            )));
        }

        Ok(algorithm)
    }

    /// Required key length in bytes.
    pub fn key_len(self) -> usize {
        self.aead().key_len()
    }

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            CipherAlgorithm::Aes128Gcm => "AES-128-GCM",
            CipherAlgorithm::Aes256Gcm => "AES-256-GCM",
            CipherAlgorithm::ChaCha20Poly1305 => "CHACHA20-POLY1305",
        }
    }

    fn aead(self) -> &'static aead::Algorithm {
        match self {
            CipherAlgorithm::Aes128Gcm => &aead::AES_128_GCM,
            CipherAlgorithm::Aes256Gcm => &aead::AES_256_GCM,
            CipherAlgorithm::ChaCha20Poly1305 => &aead::CHACHA20_POLY1305,
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Generate a random key suitable for `algorithm`.
pub fn generate_key(algorithm: CipherAlgorithm) -> Result<Vec<u8>> {
    let mut key = vec![0u8; algorithm.key_len()];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| SessionError::SecurityConfig("system random source unavailable".to_string()))?;
    Ok(key)
}

/// Keyed cipher used to seal and open tokens.
pub struct TokenCipher {
    algorithm: CipherAlgorithm,
    key: LessSafeKey,
    rng: SystemRandom,
}

impl TokenCipher {
    /// Build a cipher from a configured algorithm name and raw key bytes.
    pub fn new(algorithm: &str, key: &[u8]) -> Result<Self> {
        let algorithm = CipherAlgorithm::resolve(algorithm, key.len())?;
        let unbound = UnboundKey::new(algorithm.aead(), key).map_err(|_| {
            SessionError::SecurityConfig(format!("key rejected by {}", algorithm.name()))
        })?;

        Ok(Self {
            algorithm,
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// The resolved algorithm.
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| SessionError::SecurityConfig("system random source unavailable".to_string()))?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| {
                SessionError::SecurityConfig(format!("encryption with {} failed", self.algorithm))
            })?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let decryption_error = || SessionError::Decryption {
            algorithm: self.algorithm.name().to_string(),
        };

        if sealed.len() < NONCE_LEN + self.algorithm.aead().tag_len() {
            return Err(decryption_error());
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| decryption_error())?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| decryption_error())?;
        Ok(plaintext.to_vec())
    }
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCipher")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// The two serialized segments carried by a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSegments {
    /// Encoded control map (id, timestamps, timeout).
    pub control: String,
    /// Encoded attribute map.
    pub data: String,
}

impl TokenSegments {
    pub fn new(control: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            control: control.into(),
            data: data.into(),
        }
    }
}

/// Join, encrypt and encode two segments into a token.
pub fn encode(segments: &TokenSegments, cipher: &TokenCipher) -> Result<String> {
    let mut plaintext = String::with_capacity(segments.control.len() + segments.data.len() + 1);
    plaintext.push_str(&segments.control);
    plaintext.push(DELIMITER);
    plaintext.push_str(&segments.data);

    let sealed = cipher.seal(plaintext.as_bytes())?;
    Ok(STANDARD.encode(sealed))
}

/// Decode, decrypt and split a token produced by [`encode`].
pub fn decode(token: &str, cipher: &TokenCipher) -> Result<TokenSegments> {
    let sealed = STANDARD
        .decode(token.trim())
        .map_err(|e| SessionError::Decoding(format!("token is not valid base64: {}", e)))?;

    let plaintext = cipher.open(&sealed)?;
    let text = String::from_utf8(plaintext)
        .map_err(|_| SessionError::Decoding("decrypted token is not UTF-8".to_string()))?;

    let mut parts = text.split(DELIMITER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(control), Some(data), None) => Ok(TokenSegments::new(control, data)),
        _ => Err(SessionError::Decoding(format!(
            "expected 2 token sections, found {}",
            text.split(DELIMITER).count()
        ))),
    }
}
