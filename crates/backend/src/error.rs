use common::OfferId;
use thiserror::Error;

/// Errors that can occur when calling a remote collaborator.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote side answered with an error.
    #[error("Backend rejected request (status {status}): {message}")]
    Remote { status: u16, message: String },

    /// The remote side answered with something we could not decode.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The backend holds no active lock for this buyer and offer.
    #[error("No active reservation for offer {0}")]
    NoActiveLock(OfferId),

    /// The offer does not exist.
    #[error("Offer not found: {0}")]
    OfferNotFound(OfferId),

    /// The change feed dropped notifications because the consumer fell behind.
    #[error("Change feed lagged, {0} notifications dropped")]
    FeedLagged(u64),

    /// The change feed is gone.
    #[error("Change feed closed")]
    FeedClosed,

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackendError {
    /// Returns true if the backend reports that the reservation is gone.
    pub fn is_lock_missing(&self) -> bool {
        matches!(self, BackendError::NoActiveLock(_))
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;
