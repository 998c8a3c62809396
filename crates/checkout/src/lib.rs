//! Live-offer checkout for one buyer.
//!
//! A purchase follows these steps:
//! 1. Acquire the stock lock for one unit
//! 2. Create the checkout intent bound to that lock
//! 3. Collect payment against the intent's client secret
//!
//! If the attempt is abandoned after step 1 the lock is released, including
//! when the buyer cancels while step 1 or 2 is still in flight.

pub mod error;
pub mod flow;
pub mod intent;
pub mod presenter;
pub mod reservation;
pub mod state;

pub use error::CheckoutError;
pub use flow::CheckoutFlow;
pub use intent::IntentIssuer;
pub use presenter::{AttemptId, CheckoutPresenter};
pub use reservation::ReservationClient;
pub use state::{CheckoutOutcome, CheckoutState};
