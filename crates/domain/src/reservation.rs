//! Client-local reservation attempts.

use chrono::{DateTime, Utc};
use common::OfferId;
use serde::{Deserialize, Serialize};

/// Resolution of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReservationOutcome {
    /// The lock request is in flight.
    #[default]
    Pending,
    /// The remote lock reserved one unit.
    Granted,
    /// The remote lock refused (sold out, contention, closed offer or transport failure).
    Denied,
    /// The lock was granted but the backend no longer holds it.
    Expired,
}

impl ReservationOutcome {
    /// Returns the outcome name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationOutcome::Pending => "Pending",
            ReservationOutcome::Granted => "Granted",
            ReservationOutcome::Denied => "Denied",
            ReservationOutcome::Expired => "Expired",
        }
    }
}

impl std::fmt::Display for ReservationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One purchase click's attempt to reserve a unit.
///
/// Never persisted. Discarded when the checkout flow ends, so a denied or
/// abandoned attempt leaves nothing behind on the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationAttempt {
    pub offer_id: OfferId,
    pub requested_at: DateTime<Utc>,
    pub outcome: ReservationOutcome,
}

impl ReservationAttempt {
    /// Starts a pending attempt for `offer_id`.
    pub fn pending(offer_id: OfferId) -> Self {
        Self {
            offer_id,
            requested_at: Utc::now(),
            outcome: ReservationOutcome::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome == ReservationOutcome::Pending
    }

    pub fn is_granted(&self) -> bool {
        self.outcome == ReservationOutcome::Granted
    }

    /// Resolves a pending attempt. Returns false if it was already resolved.
    pub fn resolve(&mut self, outcome: ReservationOutcome) -> bool {
        if !self.is_pending() || outcome == ReservationOutcome::Pending {
            return false;
        }
        self.outcome = outcome;
        true
    }

    /// Marks a granted attempt as expired. Returns false unless it was granted.
    pub fn expire(&mut self) -> bool {
        if !self.is_granted() {
            return false;
        }
        self.outcome = ReservationOutcome::Expired;
        true
    }
}
