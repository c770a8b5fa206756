//! Physical names for logical preference keys and blob names.
//!
//! Encrypted names use AES-256-SIV: lookups need the same token for the same name, so the
//! encryption is deterministic. Each class of name is bound to its own domain label, so a
//! preference-key token never decrypts as a blob name and vice versa.

use std::sync::Arc;

use aes_siv::{
    aead::{Aead, KeyInit, Payload},
    Aes256SivAead, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use keel_core::StoreError;

use crate::keyset::NameKey;

const PREF_KEY_DOMAIN: &[u8] = b"keel.pref-key";
const BLOB_NAME_DOMAIN: &[u8] = b"keel.blob-name";

#[derive(Debug, Clone)]
enum Mode {
    /// Logical name used as is.
    Identity,
    /// URL-safe base64 of the name; keeps arbitrary names filesystem safe.
    Encoded,
    Encrypted(Arc<NameKey>),
}

/// Transforms logical names into storage names and back.
#[derive(Debug, Clone)]
pub(crate) struct NameCodec {
    mode: Mode,
    domain: &'static [u8],
}

impl NameCodec {
    /// Codec for preference-map keys: encrypted, or the key itself.
    pub(crate) fn for_pref_keys(key: Option<Arc<NameKey>>) -> Self {
        Self {
            mode: key.map_or(Mode::Identity, Mode::Encrypted),
            domain: PREF_KEY_DOMAIN,
        }
    }

    /// Codec for blob filenames: encrypted, or base64url-encoded.
    pub(crate) fn for_blob_names(key: Option<Arc<NameKey>>) -> Self {
        Self {
            mode: key.map_or(Mode::Encoded, Mode::Encrypted),
            domain: BLOB_NAME_DOMAIN,
        }
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        matches!(self.mode, Mode::Encrypted(_))
    }

    pub(crate) fn encrypt_name(&self, name: &str) -> Result<String, StoreError> {
        match &self.mode {
            Mode::Identity => Ok(name.to_string()),
            Mode::Encoded => Ok(URL_SAFE_NO_PAD.encode(name)),
            Mode::Encrypted(key) => {
                let sealed = siv_cipher(key)?
                    .encrypt(
                        &Nonce::default(),
                        Payload {
                            msg: name.as_bytes(),
                            aad: self.domain,
                        },
                    )
                    .map_err(|e| StoreError::Encryption {
                        reason: format!("name encryption failed: {e}"),
                    })?;
                Ok(URL_SAFE_NO_PAD.encode(sealed))
            }
        }
    }

    pub(crate) fn decrypt_name(&self, token: &str) -> Result<String, StoreError> {
        let bytes = match &self.mode {
            Mode::Identity => return Ok(token.to_string()),
            Mode::Encoded => URL_SAFE_NO_PAD
                .decode(token)
                .map_err(|e| name_err(token, e.to_string()))?,
            Mode::Encrypted(key) => {
                let sealed = URL_SAFE_NO_PAD
                    .decode(token)
                    .map_err(|e| name_err(token, e.to_string()))?;
                siv_cipher(key)?
                    .decrypt(
                        &Nonce::default(),
                        Payload {
                            msg: &sealed,
                            aad: self.domain,
                        },
                    )
                    .map_err(|_| name_err(token, "authentication failed".to_string()))?
            }
        };
        String::from_utf8(bytes).map_err(|e| name_err(token, e.to_string()))
    }
}

fn siv_cipher(key: &NameKey) -> Result<Aes256SivAead, StoreError> {
    Aes256SivAead::new_from_slice(key.bytes()).map_err(|e| StoreError::Initialization {
        reason: format!("name cipher init failed: {e}"),
    })
}

fn name_err(token: &str, reason: String) -> StoreError {
    StoreError::Decryption {
        entry: token.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Arc<NameKey> {
        Arc::new(NameKey::generate())
    }

    #[test]
    fn encrypted_names_are_deterministic_and_reversible() {
        let codec = NameCodec::for_blob_names(Some(key()));
        let first = codec.encrypt_name("cert.pem").expect("encrypt");
        let second = codec.encrypt_name("cert.pem").expect("encrypt");
        assert_eq!(first, second);
        assert!(!first.contains("cert"));
        assert!(first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(codec.decrypt_name(&first).expect("decrypt"), "cert.pem");
    }

    #[test]
    fn domains_do_not_cross() {
        let shared = key();
        let prefs = NameCodec::for_pref_keys(Some(shared.clone()));
        let blobs = NameCodec::for_blob_names(Some(shared));
        let token = prefs.encrypt_name("token").expect("encrypt");
        assert_ne!(token, blobs.encrypt_name("token").expect("encrypt"));
        assert!(blobs.decrypt_name(&token).is_err());
    }

    #[test]
    fn plain_modes() {
        let prefs = NameCodec::for_pref_keys(None);
        assert_eq!(prefs.encrypt_name("a/b").unwrap(), "a/b");
        assert!(!prefs.is_encrypted());

        let blobs = NameCodec::for_blob_names(None);
        let token = blobs.encrypt_name("../escape").unwrap();
        assert!(!token.contains('/'));
        assert_eq!(blobs.decrypt_name(&token).unwrap(), "../escape");
    }

    #[test]
    fn garbage_tokens_fail_to_decrypt() {
        let codec = NameCodec::for_pref_keys(Some(key()));
        assert!(codec.decrypt_name("not-a-token").is_err());
        assert!(codec.decrypt_name("!!!").is_err());
        assert!(NameCodec::for_blob_names(None).decrypt_name("%%").is_err());
    }
}
