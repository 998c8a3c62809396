//! Buyer-facing checkout state machine.
//!
//! The presenter performs no I/O. [`crate::CheckoutFlow`] drives it with the
//! results of the lock and intent calls, and the payment step reports back
//! through [`CheckoutPresenter::payment_succeeded`],
//! [`CheckoutPresenter::payment_failed`] or [`CheckoutPresenter::cancel`].
//!
//! Each attempt gets an [`AttemptId`]. Results of remote calls are applied
//! against that id, so a result that arrives after the buyer cancelled (or
//! started over) is refused with [`CheckoutError::Cancelled`].

use common::OfferId;
use domain::{CheckoutIntent, LiveOffer, ReservationAttempt, ReservationOutcome};

use crate::error::CheckoutError;
use crate::state::{CheckoutOutcome, CheckoutState};

/// Identifies one purchase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(u64);

/// Holds at most one active intent for one buyer.
#[derive(Debug, Default)]
pub struct CheckoutPresenter {
    state: CheckoutState,
    attempt: Option<ReservationAttempt>,
    current: Option<AttemptId>,
    attempts_started: u64,
    intent: Option<CheckoutIntent>,
    last_outcome: Option<CheckoutOutcome>,
    error: Option<String>,
}

impl CheckoutPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CheckoutState {
        self.state
    }

    /// The active intent while collecting payment.
    pub fn intent(&self) -> Option<&CheckoutIntent> {
        self.intent.as_ref()
    }

    /// The secret the payment form collects against.
    pub fn client_secret(&self) -> Option<&str> {
        self.intent.as_ref().map(|i| i.client_secret.as_str())
    }

    pub fn attempt(&self) -> Option<&ReservationAttempt> {
        self.attempt.as_ref()
    }

    /// The offer of the outstanding attempt, if any.
    pub fn offer_id(&self) -> Option<OfferId> {
        self.attempt
            .as_ref()
            .map(|a| a.offer_id)
            .or_else(|| self.intent.as_ref().map(|i| i.offer_id))
    }

    pub fn last_outcome(&self) -> Option<CheckoutOutcome> {
        self.last_outcome
    }

    /// Message to show the buyer after a denial or failure.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns true if a purchase of `offer` may start now.
    pub fn can_purchase(&self, offer: &LiveOffer) -> bool {
        self.state.can_begin() && offer.is_purchasable()
    }

    /// Starts an attempt for `offer`.
    ///
    /// Refused while another attempt is outstanding, and when the last known
    /// view of `offer` shows nothing to buy.
    pub fn begin(&mut self, offer: &LiveOffer) -> Result<AttemptId, CheckoutError> {
        if self.state.is_busy() {
            let current = self.offer_id().unwrap_or(offer.id);
            return Err(CheckoutError::AlreadyInProgress(current));
        }
        if !offer.is_purchasable() {
            return Err(CheckoutError::NotAvailable(offer.id));
        }

        self.attempts_started += 1;
        let id = AttemptId(self.attempts_started);
        self.state = CheckoutState::Reserving;
        self.attempt = Some(ReservationAttempt::pending(offer.id));
        self.current = Some(id);
        self.intent = None;
        self.last_outcome = None;
        self.error = None;
        Ok(id)
    }

    /// The attempt still outstanding, if any.
    pub fn current_attempt(&self) -> Option<AttemptId> {
        self.current
    }

    /// The lock was refused. The attempt ends and nothing else is requested.
    pub fn lock_denied(&mut self, id: AttemptId) -> Result<(), CheckoutError> {
        self.ensure_current(id)?;
        let attempt = self.pending_attempt()?;
        let offer_id = attempt.offer_id;
        attempt.resolve(ReservationOutcome::Denied);
        self.finish(
            CheckoutOutcome::Denied,
            Some(CheckoutError::StockNotSecured(offer_id).to_string()),
        );
        Ok(())
    }

    /// The lock was granted; an intent may now be requested.
    ///
    /// Refused with [`CheckoutError::Cancelled`] when the attempt is gone;
    /// the caller then owns a lock nobody will use and should release it.
    pub fn lock_granted(&mut self, id: AttemptId) -> Result<(), CheckoutError> {
        self.ensure_current(id)?;
        self.pending_attempt()?.resolve(ReservationOutcome::Granted);
        Ok(())
    }

    /// Accepts the intent issued for the granted lock and starts collecting.
    pub fn intent_issued(
        &mut self,
        id: AttemptId,
        intent: CheckoutIntent,
    ) -> Result<(), CheckoutError> {
        self.ensure_current(id)?;
        let granted = self
            .attempt
            .as_ref()
            .filter(|a| a.is_granted())
            .map(|a| a.offer_id);
        let Some(offer_id) = granted.filter(|_| self.state == CheckoutState::Reserving) else {
            return Err(self.invalid("Reserving with a granted lock"));
        };
        if intent.offer_id != offer_id {
            return Err(CheckoutError::IntentFailed(
                "intent was issued for a different offer".to_string(),
            ));
        }

        self.intent = Some(intent);
        self.state = CheckoutState::Collecting;
        Ok(())
    }

    /// Intent creation failed after the lock request.
    ///
    /// Returns the offer whose lock the caller should release, if one is
    /// still held. A cancelled attempt has nothing left to settle.
    pub fn intent_failed(
        &mut self,
        id: AttemptId,
        error: &CheckoutError,
    ) -> Result<Option<OfferId>, CheckoutError> {
        self.ensure_current(id)?;
        if self.state != CheckoutState::Reserving {
            return Err(self.invalid("Reserving"));
        }
        let held = self.attempt.as_mut().and_then(|attempt| {
            if matches!(error, CheckoutError::ReservationExpired(_)) {
                attempt.expire();
            }
            attempt.is_granted().then_some(attempt.offer_id)
        });
        self.finish(CheckoutOutcome::Failed, Some(error.to_string()));
        Ok(held)
    }

    /// The payment went through. The lock is consumed by the sale.
    pub fn payment_succeeded(&mut self) -> Result<(), CheckoutError> {
        if self.state != CheckoutState::Collecting {
            return Err(self.invalid("Collecting"));
        }
        self.state = CheckoutState::Succeeded;
        self.attempt = None;
        self.current = None;
        self.intent = None;
        self.last_outcome = Some(CheckoutOutcome::Succeeded);
        self.error = None;
        Ok(())
    }

    /// The payment step failed. `message` is kept verbatim for the buyer.
    ///
    /// Returns the offer whose lock the caller should release.
    pub fn payment_failed(&mut self, message: impl Into<String>) -> Option<OfferId> {
        if self.state != CheckoutState::Collecting {
            return None;
        }
        let offer_id = self.offer_id();
        self.finish(CheckoutOutcome::Failed, Some(message.into()));
        offer_id
    }

    /// The buyer dismissed the checkout.
    ///
    /// Returns the offer whose lock the caller should release.
    pub fn cancel(&mut self) -> Option<OfferId> {
        let held = match self.state {
            CheckoutState::Collecting => self.offer_id(),
            CheckoutState::Reserving => self
                .attempt
                .as_ref()
                .filter(|a| a.is_granted())
                .map(|a| a.offer_id),
            CheckoutState::Idle | CheckoutState::Succeeded => return None,
        };
        self.finish(CheckoutOutcome::Cancelled, None);
        held
    }

    fn ensure_current(&self, id: AttemptId) -> Result<(), CheckoutError> {
        if self.current == Some(id) {
            Ok(())
        } else {
            Err(CheckoutError::Cancelled)
        }
    }

    fn pending_attempt(&mut self) -> Result<&mut ReservationAttempt, CheckoutError> {
        let actual = self.state;
        match self.attempt.as_mut() {
            Some(attempt) if actual == CheckoutState::Reserving && attempt.is_pending() => {
                Ok(attempt)
            }
            _ => Err(CheckoutError::InvalidState {
                expected: "Reserving with a pending lock".to_string(),
                actual,
            }),
        }
    }

    fn invalid(&self, expected: &str) -> CheckoutError {
        CheckoutError::InvalidState {
            expected: expected.to_string(),
            actual: self.state,
        }
    }

    fn finish(&mut self, outcome: CheckoutOutcome, message: Option<String>) {
        self.state = CheckoutState::Idle;
        self.attempt = None;
        self.current = None;
        self.intent = None;
        self.last_outcome = Some(outcome);
        self.error = message;
    }
}
