//! Authenticated-encryption envelopes for preference values and blob contents.
//!
//! Envelope layout is `nonce || ciphertext || tag`; nothing above this module looks inside.

use aes_gcm::{
    aead::{generic_array::typenum::Unsigned, AeadCore, AeadInPlace, KeyInit, OsRng},
    Aes128Gcm, Aes256Gcm,
};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use keel_core::{Algorithm, StoreConfig, StoreError};

use crate::{keyset::DataKey, memory::SecretBuffer};

/// Poly1305 and GCM tags are both 128-bit.
const TAG_LEN: usize = 16;

/// Stateless wrapper over the AEAD primitives, carrying the engine-wide policies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EnvelopeEngine {
    use_associated_data: bool,
    secure_memory: bool,
}

impl EnvelopeEngine {
    pub(crate) fn new(config: &StoreConfig) -> Self {
        Self {
            use_associated_data: config.use_associated_data(),
            secure_memory: config.secure_memory(),
        }
    }

    pub(crate) fn secure_memory(&self) -> bool {
        self.secure_memory
    }

    /// Associated data for an entry: its logical name, or nothing when binding is disabled.
    pub(crate) fn associated_data<'a>(&self, logical_name: &'a str) -> Option<&'a [u8]> {
        self.use_associated_data.then_some(logical_name.as_bytes())
    }

    pub(crate) fn encrypt(
        &self,
        key: &DataKey,
        plaintext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, StoreError> {
        let aad = associated_data.unwrap_or_default();
        match key.algorithm() {
            Algorithm::Aes256Gcm => {
                seal::<Aes256Gcm>(key.bytes(), plaintext, aad, self.secure_memory)
            }
            Algorithm::Aes128Gcm => {
                seal::<Aes128Gcm>(key.bytes(), plaintext, aad, self.secure_memory)
            }
            Algorithm::ChaCha20Poly1305 => {
                seal::<ChaCha20Poly1305>(key.bytes(), plaintext, aad, self.secure_memory)
            }
            Algorithm::XChaCha20Poly1305 => {
                seal::<XChaCha20Poly1305>(key.bytes(), plaintext, aad, self.secure_memory)
            }
        }
    }

    /// Decrypt an envelope. `entry` only labels the error.
    pub(crate) fn decrypt(
        &self,
        key: &DataKey,
        envelope: &[u8],
        associated_data: Option<&[u8]>,
        entry: &str,
    ) -> Result<Vec<u8>, StoreError> {
        let aad = associated_data.unwrap_or_default();
        let opened = match key.algorithm() {
            Algorithm::Aes256Gcm => {
                open::<Aes256Gcm>(key.bytes(), envelope, aad, self.secure_memory)
            }
            Algorithm::Aes128Gcm => {
                open::<Aes128Gcm>(key.bytes(), envelope, aad, self.secure_memory)
            }
            Algorithm::ChaCha20Poly1305 => {
                open::<ChaCha20Poly1305>(key.bytes(), envelope, aad, self.secure_memory)
            }
            Algorithm::XChaCha20Poly1305 => {
                open::<XChaCha20Poly1305>(key.bytes(), envelope, aad, self.secure_memory)
            }
        };
        opened.map_err(|reason| StoreError::Decryption {
            entry: entry.to_string(),
            reason,
        })
    }
}

fn seal<C>(key: &[u8], plaintext: &[u8], aad: &[u8], wipe: bool) -> Result<Vec<u8>, StoreError>
where
    C: AeadInPlace + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|e| StoreError::Encryption {
        reason: format!("cipher init failed: {e}"),
    })?;
    let nonce = C::generate_nonce(&mut OsRng);
    let nonce_len = <C as AeadCore>::NonceSize::USIZE;

    let capacity = nonce_len + plaintext.len() + TAG_LEN;
    let mut buffer = SecretBuffer::new(Vec::with_capacity(capacity), wipe);
    buffer.extend_from_slice(&nonce);
    buffer.extend_from_slice(plaintext);

    let tag = cipher
        .encrypt_in_place_detached(&nonce, aad, &mut buffer[nonce_len..])
        .map_err(|e| StoreError::Encryption {
            reason: format!("seal failed: {e}"),
        })?;
    buffer.extend_from_slice(&tag);
    Ok(buffer.into_inner())
}

fn open<C>(key: &[u8], envelope: &[u8], aad: &[u8], wipe: bool) -> Result<Vec<u8>, String>
where
    C: AeadInPlace + KeyInit,
{
    let nonce_len = <C as AeadCore>::NonceSize::USIZE;
    if envelope.len() < nonce_len + TAG_LEN {
        return Err(format!("envelope too short: {} bytes", envelope.len()));
    }
    let cipher = C::new_from_slice(key).map_err(|e| format!("cipher init failed: {e}"))?;

    let (nonce, rest) = envelope.split_at(nonce_len);
    let (sealed, tag) = rest.split_at(rest.len() - TAG_LEN);
    let mut buffer = SecretBuffer::new(sealed.to_vec(), wipe);
    cipher
        .decrypt_in_place_detached(
            aes_gcm::aead::Nonce::<C>::from_slice(nonce),
            aad,
            &mut buffer,
            aes_gcm::aead::Tag::<C>::from_slice(tag),
        )
        .map_err(|_| "authentication failed".to_string())?;
    Ok(buffer.into_inner())
}
