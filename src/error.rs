//! Crate-wide error taxonomy.
//!
//! Individual modules define their own `thiserror` enums for the failure
//! modes specific to them (see `crypto::Error`, `acme::problem::Problem`,
//! `trust::Error`); this type is the union used at component boundaries
//! (`Ca`, `PkiApp`, `StekProvider`, the database pool) where callers need a
//! single thing to match on and log.

use thiserror::Error;

/// Error taxonomy from spec §7, carried through every component boundary.
#[derive(Debug, Error)]
pub enum PkiError {
    /// The requested storage key does not exist. Load-or-generate paths treat
    /// this as a signal to generate, not a failure.
    #[error("storage key not found: {0}")]
    NotExist(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("CA material is corrupted: {0}")]
    CorruptedCa(String),

    #[error("certificate public key does not match signer")]
    MismatchedKey,

    #[error("identifier rejected by policy: {0}")]
    PolicyRejected(String),

    #[error("trust store unavailable: {0}")]
    TrustStoreUnavailable(String),

    #[error("operation aborted")]
    Aborted,

    #[error(transparent)]
    Crypto(#[from] crate::crypto::Error),
}

impl PkiError {
    pub fn is_not_exist(&self) -> bool {
        matches!(self, PkiError::NotExist(_))
    }
}

pub type Result<T> = std::result::Result<T, PkiError>;
