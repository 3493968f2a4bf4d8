use thiserror::Error;

/// Errors returned by x402 operations.
///
/// Client-facing rejections are not errors: they are reported as
/// [`VerificationResult::Rejected`](crate::VerificationResult::Rejected).
#[derive(Debug, Error)]
pub enum X402Error {
    #[error("signature error: {0}")]
    SignatureError(String),

    #[error("invalid payment: {0}")]
    InvalidPayment(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// No price entry, bad price string, or another static misconfiguration.
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("settlement store error: {0}")]
    StoreError(String),

    #[error("http error: {0}")]
    HttpError(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for X402Error {
    fn from(e: rusqlite::Error) -> Self {
        X402Error::StoreError(e.to_string())
    }
}
