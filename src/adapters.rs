//! External interfaces (spec.md §6, §9). The processor client and the
//! notification sink are passed in as trait objects, not imported
//! statically — this is what makes the core testable without any external
//! process (§9: "ambient cross-component calls → explicit interfaces").

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Authorization {
    pub external_ref: String,
    pub authorisation_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecipientDetails {
    pub provider_id: Uuid,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("processor request timed out")]
    Timeout,
    #[error("processor rejected request: {0}")]
    Rejected(String),
    #[error("processor network error: {0}")]
    Network(String),
}

/// Thin façade over the external payment processor's authorize / verify /
/// recipient / transfer APIs (spec.md §2 row I, §6). A production
/// implementation is a `reqwest`-based adapter behind this trait; no
/// concrete processor is named in the spec, so only the interface and a
/// deterministic test double live in this crate.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn authorize(
        &self,
        amount: Money,
        currency: &str,
        booking_id: Uuid,
    ) -> Result<Authorization, ProcessorError>;

    async fn verify(&self, external_ref: &str) -> Result<ProcessorStatus, ProcessorError>;

    async fn create_recipient(
        &self,
        recipient: &RecipientDetails,
    ) -> Result<String, ProcessorError>;

    async fn transfer(
        &self,
        recipient_code: &str,
        amount: Money,
        reference: &str,
    ) -> Result<String, ProcessorError>;
}

/// Fan-out destination for booking/payment/payout lifecycle events to the
/// notifications and real-time-socket subsystems that live outside this
/// core. Per spec.md §7's propagation policy, side-channel failures must
/// never fail the primary transaction, so `notify` has no error return —
/// a failing sink logs and moves on.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: NotificationEvent);
}

#[derive(Debug, Clone)]
pub enum NotificationEvent {
    PaymentEscrowed { payment_id: Uuid, booking_id: Uuid },
    PaymentReleased { payment_id: Uuid, booking_id: Uuid },
    PaymentFailed { payment_id: Uuid, reason: String },
    PayoutApproved { payout_id: Uuid },
    PayoutCompleted { payout_id: Uuid },
    PayoutRejected { payout_id: Uuid, reason: String },
}

/// Logs and discards — the default sink when no real notification service
/// is wired in (tests, or a deployment that hasn't configured one yet).
pub struct NullNotificationSink;

#[async_trait]
impl NotificationSink for NullNotificationSink {
    async fn notify(&self, event: NotificationEvent) {
        tracing::debug!(?event, "notification sink not configured, dropping event");
    }
}

/// Deterministic in-memory processor for tests (spec.md §9's testability
/// requirement). Every method consults caller-programmed outcomes rather
/// than performing any I/O.
pub struct FakeProcessor {
    authorize_outcome: Mutex<Option<Result<Authorization, ProcessorError>>>,
    verify_outcome: Mutex<Option<ProcessorStatus>>,
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self {
            authorize_outcome: Mutex::new(None),
            verify_outcome: Mutex::new(None),
        }
    }

    pub fn will_authorize(&self, external_ref: &str) {
        *self.authorize_outcome.lock().unwrap() = Some(Ok(Authorization {
            external_ref: external_ref.to_string(),
            authorisation_url: Some(format!("https://processor.test/pay/{external_ref}")),
        }));
    }

    pub fn will_fail_authorize(&self, reason: &str) {
        *self.authorize_outcome.lock().unwrap() =
            Some(Err(ProcessorError::Rejected(reason.to_string())));
    }

    pub fn will_report(&self, status: ProcessorStatus) {
        *self.verify_outcome.lock().unwrap() = Some(status);
    }
}

impl Default for FakeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn authorize(
        &self,
        _amount: Money,
        _currency: &str,
        booking_id: Uuid,
    ) -> Result<Authorization, ProcessorError> {
        self.authorize_outcome
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| {
                Ok(Authorization {
                    external_ref: format!("ref-{booking_id}"),
                    authorisation_url: Some(format!("https://processor.test/pay/{booking_id}")),
                })
            })
    }

    async fn verify(&self, _external_ref: &str) -> Result<ProcessorStatus, ProcessorError> {
        Ok(self
            .verify_outcome
            .lock()
            .unwrap()
            .unwrap_or(ProcessorStatus::Pending))
    }

    async fn create_recipient(
        &self,
        recipient: &RecipientDetails,
    ) -> Result<String, ProcessorError> {
        Ok(format!("recipient-{}", recipient.provider_id))
    }

    async fn transfer(
        &self,
        recipient_code: &str,
        _amount: Money,
        reference: &str,
    ) -> Result<String, ProcessorError> {
        Ok(format!("transfer-{recipient_code}-{reference}"))
    }
}
