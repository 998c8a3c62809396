//! Checkout error types.

use common::OfferId;
use thiserror::Error;

use crate::state::CheckoutState;

/// Errors surfaced by a checkout attempt.
///
/// The `Display` text is what the buyer sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    /// The presenter is in the wrong state for the requested transition.
    #[error("Invalid checkout state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: String,
        actual: CheckoutState,
    },

    /// An attempt is already outstanding.
    #[error("A checkout is already in progress for offer {0}")]
    AlreadyInProgress(OfferId),

    /// The last known stock view shows nothing to buy.
    #[error("This item is no longer available")]
    NotAvailable(OfferId),

    /// The stock lock was denied or could not be requested.
    #[error("Stock could not be secured")]
    StockNotSecured(OfferId),

    /// The payment intent could not be created.
    #[error("Checkout could not be started: {0}")]
    IntentFailed(String),

    /// The backend no longer holds the reservation.
    #[error("Your reservation expired, please try again")]
    ReservationExpired(OfferId),

    /// The payment step reported an error.
    #[error("{0}")]
    PaymentFailed(String),

    /// The attempt was cancelled while a remote call was in flight.
    #[error("The checkout was cancelled")]
    Cancelled,
}
