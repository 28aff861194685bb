use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;

// ---------------------------------------------------------------------------
// Payment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Escrow,
    Released,
    Failed,
    Refunded,
    CashPaid,
    CashReceived,
}

impl PaymentStatus {
    /// Terminal states per spec.md §4.2 (marked with `†`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Released
                | PaymentStatus::Failed
                | PaymentStatus::Refunded
                | PaymentStatus::CashReceived
        )
    }

    /// States in which the amount/platformFee/escrowAmount invariant applies.
    pub fn is_credited(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Escrow | PaymentStatus::Released | PaymentStatus::CashReceived
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    Cash,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: Money,
    pub currency: String,
    pub platform_fee: Money,
    pub escrow_amount: Money,
    pub payment_method: PaymentMethod,
    pub external_ref: Option<String>,
    pub transaction_id: Option<String>,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// spec.md §8: amount = platformFee + escrowAmount once credited.
    pub fn satisfies_amount_invariant(&self) -> bool {
        if !self.status.is_credited() {
            return true;
        }
        self.platform_fee.checked_add(self.escrow_amount) == Some(self.amount)
    }
}

// ---------------------------------------------------------------------------
// Booking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Requested,
    Confirmed,
    PendingExecution,
    Delivered,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub status: BookingStatus,
    pub scheduled_at: DateTime<Utc>,
    pub total_amount: Money,
}

// ---------------------------------------------------------------------------
// Payout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    PendingApproval,
    Approved,
    Processing,
    Completed,
    Rejected,
    Failed,
}

impl PayoutStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PayoutStatus::Completed | PayoutStatus::Rejected | PayoutStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutMethod {
    Auto,
    Manual,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub provider_id: Uuid,
    pub amount: Money,
    pub method: PayoutMethod,
    pub status: PayoutStatus,
    pub bank_code: Option<String>,
    pub account_number: Option<String>,
    pub account_name: Option<String>,
    pub recipient_code: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
    pub executed_at: Option<DateTime<Utc>>,
    pub executed_by: Option<Uuid>,
    pub external_ref: Option<String>,
    pub csv_batch_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// PayoutBatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Open,
    Exported,
    Executed,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PayoutBatch {
    pub id: Uuid,
    pub batch_number: String,
    pub status: BatchStatus,
    pub total_amount: Money,
    pub payout_count: i32,
    pub exported_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub executed_by: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// LedgerEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    ProviderBalance,
    PlatformRevenue,
    BankAccount,
    Settlement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Payment,
    Payout,
    Adjustment,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_type: AccountType,
    pub account_id: String,
    pub entry_type: EntryType,
    pub amount: Money,
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Label for the platform revenue account (spec.md §3: accountId = "PLATFORM").
pub const PLATFORM_ACCOUNT: &str = "PLATFORM";

// ---------------------------------------------------------------------------
// WebhookEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub event_type: String,
    pub external_ref: String,
    pub payload: serde_json::Value,
    pub signature: String,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// SettlementBatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Open,
    Reconciled,
    Discrepant,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct SettlementBatch {
    pub batch_date: chrono::NaiveDate,
    pub expected_amount: Money,
    pub status: SettlementStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn amount_invariant_holds_only_when_credited() {
        let mut p = sample_payment();
        p.status = PaymentStatus::Pending;
        p.platform_fee = Money::ZERO;
        p.escrow_amount = Money::ZERO;
        assert!(p.satisfies_amount_invariant());

        p.status = PaymentStatus::Escrow;
        assert!(!p.satisfies_amount_invariant());

        p.platform_fee = Money::new(dec!(20.00));
        p.escrow_amount = Money::new(dec!(180.00));
        p.amount = Money::new(dec!(200.00));
        assert!(p.satisfies_amount_invariant());
    }

    fn sample_payment() -> Payment {
        Payment {
            id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            amount: Money::new(dec!(200.00)),
            currency: "ZAR".into(),
            platform_fee: Money::new(dec!(20.00)),
            escrow_amount: Money::new(dec!(180.00)),
            payment_method: PaymentMethod::Card,
            external_ref: None,
            transaction_id: None,
            status: PaymentStatus::Pending,
            paid_at: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
