//! use smallca::error::PkiError;

use thiserror::Error;

/// Represents errors that can occur while issuing certificates.
///
/// Every variant names the stage of an issuance that failed. None of them are
/// retried: each one ends the issuance it occurred in.
#[derive(Debug, Error)]
pub enum PkiError {
    /// The random source or the key primitive failed, or the key parameters were rejected.
    #[error("Key generation failed: {0}")]
    KeyGenerationFailure(String),

    /// A required template field is missing or invalid.
    #[error("Invalid certificate template: {0}")]
    TemplateError(String),

    /// The signing primitive rejected the template or the key.
    #[error("Signing failed: {0}")]
    SigningFailure(String),

    /// An issued certificate does not validate against its CA.
    #[error("Verification failed: {0}")]
    VerificationFailure(String),

    /// Stored certificate or key material could not be decoded.
    #[error("Failed to parse {0}")]
    ParseFailure(String),

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// Reading key material or writing issued material failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PkiError>;

impl From<der::Error> for PkiError {
    /// Converts a `der::Error` into a `PkiError`.
    fn from(err: der::Error) -> Self {
        PkiError::ParseFailure(format!("DER data: {err}"))
    }
}

impl From<pem::PemError> for PkiError {
    fn from(err: pem::PemError) -> Self {
        PkiError::ParseFailure(format!("PEM block: {err}"))
    }
}
