//! Encoding applied to prompts and messages before they reach the database.
//!
//! Blob layout for [`AesGcmCodec`]: base64(nonce[12] || ciphertext || tag[16]).

use std::num::NonZeroU32;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::assistant::error::CodecError;

const KDF_ITERATIONS: u32 = 100_000;
const KDF_SALT: &[u8] = b"askbot-content-codec";

/// Reversible transform for stored text.
pub trait ContentCodec: Send + Sync {
    fn encode(&self, plaintext: &str) -> Result<String, CodecError>;
    fn decode(&self, blob: &str) -> Result<String, CodecError>;
}

/// Stores text as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCodec;

impl ContentCodec for PlainCodec {
    fn encode(&self, plaintext: &str) -> Result<String, CodecError> {
        Ok(plaintext.to_string())
    }

    fn decode(&self, blob: &str) -> Result<String, CodecError> {
        Ok(blob.to_string())
    }
}

/// AES-256-GCM with a key derived from a passphrase.
pub struct AesGcmCodec {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl AesGcmCodec {
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CodecError> {
        let mut key_bytes = [0u8; 32];
        let iterations = NonZeroU32::new(KDF_ITERATIONS).ok_or(CodecError::Encrypt)?;
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            KDF_SALT,
            passphrase.as_bytes(),
            &mut key_bytes,
        );
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| CodecError::Encrypt)?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }
}

impl ContentCodec for AesGcmCodec {
    fn encode(&self, plaintext: &str) -> Result<String, CodecError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| CodecError::Encrypt)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CodecError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + in_out.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&in_out);
        Ok(STANDARD.encode(blob))
    }

    fn decode(&self, blob: &str) -> Result<String, CodecError> {
        let raw = STANDARD.decode(blob)?;
        if raw.len() < NONCE_LEN {
            return Err(CodecError::Decrypt);
        }
        let (nonce_part, sealed) = raw.split_at(NONCE_LEN);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce_part);

        let mut in_out = sealed.to_vec();
        let plain = self
            .key
            .open_in_place(Nonce::assume_unique_for_key(nonce_bytes), Aad::empty(), &mut in_out)
            .map_err(|_| CodecError::Decrypt)?;
        String::from_utf8(plain.to_vec()).map_err(|_| CodecError::Utf8)
    }
}
