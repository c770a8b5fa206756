use thiserror::Error;

/// Discriminant for [`StoreError`], for callers that branch on the failure class
/// without caring about the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Initialization,
    HardwareRequired,
    Encryption,
    Decryption,
    Serialization,
    Storage,
}

/// Errors produced by the encrypted stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Configuration failed validation at build time.
    #[error("invalid configuration: {reason}")]
    Configuration { reason: String },
    /// Key hierarchy or cipher setup failed; the engine is not usable.
    #[error("initialization failed: {reason}")]
    Initialization { reason: String },
    /// Hardware-backed key protection was demanded but the custodian cannot provide it.
    #[error("hardware-backed key protection required but unavailable for {alias}")]
    HardwareRequired { alias: String },
    /// Write-path AEAD failure.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },
    /// Read-path AEAD or authentication failure.
    #[error("decryption failed for {entry}: {reason}")]
    Decryption { entry: String, reason: String },
    /// Object encode/decode failure.
    #[error("serialization failed for {entry}: {reason}")]
    Serialization { entry: String, reason: String },
    /// Underlying persistence failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Configuration { .. } => ErrorKind::Configuration,
            StoreError::Initialization { .. } => ErrorKind::Initialization,
            StoreError::HardwareRequired { .. } => ErrorKind::HardwareRequired,
            StoreError::Encryption { .. } => ErrorKind::Encryption,
            StoreError::Decryption { .. } => ErrorKind::Decryption,
            StoreError::Serialization { .. } => ErrorKind::Serialization,
            StoreError::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Whether the decryption-failure policy applies to this error.
    pub fn is_recoverable_read(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Decryption | ErrorKind::Serialization
        )
    }

    pub fn storage<E: ToString>(err: E) -> Self {
        StoreError::Storage {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = StoreError::Decryption {
            entry: "k".into(),
            reason: "tag mismatch".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Decryption);
        assert!(err.is_recoverable_read());

        let err = StoreError::storage("disk full");
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!err.is_recoverable_read());
        assert_eq!(err.to_string(), "storage failure: disk full");
    }
}
