//! Checkout state machine states.

use serde::{Deserialize, Serialize};

/// The state of a checkout presenter.
///
/// State transitions:
/// ```text
/// Idle ──► Reserving ──► Collecting ──► Succeeded
///  ▲           │              │
///  └───────────┴──────────────┘  denied / failed / cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CheckoutState {
    /// No active intent.
    #[default]
    Idle,

    /// The stock lock and intent requests are in flight.
    Reserving,

    /// One intent outstanding; the payment form collects against its secret.
    Collecting,

    /// Payment went through (terminal for the attempt).
    Succeeded,
}

impl CheckoutState {
    /// Returns true if a new purchase attempt may start.
    pub fn can_begin(&self) -> bool {
        matches!(self, CheckoutState::Idle | CheckoutState::Succeeded)
    }

    /// Returns true while an attempt is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(self, CheckoutState::Reserving | CheckoutState::Collecting)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Idle => "Idle",
            CheckoutState::Reserving => "Reserving",
            CheckoutState::Collecting => "Collecting",
            CheckoutState::Succeeded => "Succeeded",
        }
    }
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the last attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckoutOutcome {
    /// Payment collected.
    Succeeded,
    /// The stock lock was not granted.
    Denied,
    /// Intent creation or payment collection failed.
    Failed,
    /// The buyer aborted.
    Cancelled,
}

impl CheckoutOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutOutcome::Succeeded => "Succeeded",
            CheckoutOutcome::Denied => "Denied",
            CheckoutOutcome::Failed => "Failed",
            CheckoutOutcome::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for CheckoutOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
