//! Error taxonomy for custody and recovery operations
//!
//! Every failure a caller must react to differently gets its own variant:
//! a wrong second-factor code is retried by the user, an under-quorum
//! submission needs more trustees, a tampered share needs support.

/// Errors surfaced by the library
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("second-factor code rejected")]
    MfaInvalid,
    #[error("no active key for wallet '{0}'")]
    WalletNotFound(String),
    #[error("threshold {threshold} is invalid for {total} shares")]
    ThresholdExceedsShares { threshold: usize, total: usize },
    #[error("{required} shares required, {provided} provided")]
    ThresholdNotMet { required: usize, provided: usize },
    #[error("payload failed authentication")]
    AuthenticationFailure,
    #[error("malformed share: {0}")]
    ShareFormatError(String),
    #[error("symmetric key misconfigured: {0}")]
    KeyMisconfigured(String),
    #[error("secret is not below the field prime")]
    SecretOutOfRange,
    #[error("recovery share '{0}' not found")]
    ShareNotFound(String),
    #[error("invalid trustee list: {0}")]
    InvalidTrustees(String),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T, E = RecoveryError> = std::result::Result<T, E>;
