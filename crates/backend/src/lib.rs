//! Collaborators the checkout talks to but does not own.
//!
//! - [`StockBackend`]: offer listing and the remote stock-lock procedures
//! - [`PaymentBackend`]: payment-intent creation
//! - [`ChangeFeed`]: realtime row-level offer changes for one live event
//!
//! [`InMemoryOfferBackend`] implements all three for tests and local runs,
//! [`PostgresOfferBackend`] and [`PgChangeFeed`] talk to the hosted database,
//! and [`HttpPaymentBackend`] invokes the payment edge function.

pub mod error;
pub mod feed;
pub mod http;
pub mod memory;
pub mod payment;
pub mod postgres;
pub mod stock;

pub use error::{BackendError, Result};
pub use feed::{ChangeFeed, OfferChangeStream};
pub use http::HttpPaymentBackend;
pub use memory::InMemoryOfferBackend;
pub use payment::PaymentBackend;
pub use postgres::{PgChangeFeed, PostgresOfferBackend};
pub use stock::StockBackend;
