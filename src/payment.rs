//! Payment state machine (spec.md §4.2) plus booking coupling (component B).
//! Booking coupling is inlined here rather than split into its own service:
//! §4.2 requires the booking to advance "atomically" with the payment write,
//! and a separate component with its own transaction would reopen exactly
//! the race the spec rules out.

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::adapters::PaymentProcessor;
use crate::db;
use crate::error::AppError;
use crate::ledger::{Ledger, NewLedgerEntry};
use crate::model::{
    AccountType, Booking, BookingStatus, EntryType, Payment, PaymentMethod, PaymentStatus,
    ReferenceType, PLATFORM_ACCOUNT,
};
use crate::money::Money;

pub struct CreateIntentResult {
    pub payment_id: Uuid,
    pub authorisation_url: Option<String>,
}

/// Computes `platformFee = round(amount * feeRate, 2)` and
/// `escrowAmount = amount - platformFee` (spec.md §4.2).
pub fn split_amount(amount: Money, fee_rate: Decimal) -> (Money, Money) {
    let fee = amount.mul_rate(fee_rate);
    let escrow = amount - fee;
    (fee, escrow)
}

/// `CreateIntent(bookingId, method)` (spec.md §4.2).
///
/// Preconditions: the booking exists and has no non-terminal payment — the
/// latter is enforced by the partial unique index on `payments(booking_id)`
/// (SPEC_FULL.md §3.1), so a concurrent double-create collides on insert
/// rather than racing in application code. Idempotent on `bookingId` when
/// the existing payment is non-terminal: we re-read and return it instead
/// of erroring.
pub async fn create_intent(
    pool: &PgPool,
    processor: &dyn PaymentProcessor,
    booking_id: Uuid,
    method: PaymentMethod,
    fee_rate: Decimal,
) -> Result<CreateIntentResult, AppError> {
    let booking: Booking = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
        .bind(booking_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("booking".into()))?;

    if let Some(existing) = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE booking_id = $1 AND status NOT IN ('FAILED','REFUNDED')",
    )
    .bind(booking_id)
    .fetch_optional(pool)
    .await?
    {
        return Ok(CreateIntentResult {
            payment_id: existing.id,
            authorisation_url: None,
        });
    }

    if !booking.total_amount.is_positive() {
        return Err(AppError::Validation(
            "booking amount must be at least 1 minor unit".into(),
        ));
    }

    let (platform_fee, escrow_amount) = split_amount(booking.total_amount, fee_rate);
    let payment_id = Uuid::new_v4();

    let (external_ref, authorisation_url, status) = match method {
        PaymentMethod::Card => {
            // A processor failure must leave no Payment row committed
            // (spec.md §4.2 failure semantics) — we call before the insert.
            let auth = processor
                .authorize(booking.total_amount, "ZAR", booking_id)
                .await
                .map_err(|e| AppError::Transient(e.to_string()))?;
            (
                Some(auth.external_ref),
                auth.authorisation_url,
                PaymentStatus::Pending,
            )
        }
        PaymentMethod::Cash => (None, None, PaymentStatus::Pending),
    };

    sqlx::query(
        r#"
        INSERT INTO payments
            (id, booking_id, amount, currency, platform_fee, escrow_amount,
             payment_method, external_ref, status, created_at, updated_at)
        VALUES ($1, $2, $3, 'ZAR', $4, $5, $6, $7, $8, now(), now())
        "#,
    )
    .bind(payment_id)
    .bind(booking_id)
    .bind(booking.total_amount.as_decimal())
    .bind(platform_fee.as_decimal())
    .bind(escrow_amount.as_decimal())
    .bind(method)
    .bind(&external_ref)
    .bind(status)
    .execute(pool)
    .await?;

    tracing::info!(%payment_id, %booking_id, ?method, "payment intent created");

    Ok(CreateIntentResult {
        payment_id,
        authorisation_url,
    })
}

/// Advances `PENDING -> ESCROW` and writes the matching ledger credits,
/// inside `tx`. Called by the webhook dispatcher (spec.md §4.4) and the
/// reconciler (§4.6) — both share this one code path so the accounting
/// effect can never diverge between the two callers.
///
/// Returns `Ok(false)` if the optimistic `WHERE status = 'PENDING'` update
/// affected zero rows: the caller must treat that as already-processed,
/// not as an error (spec.md §5).
pub async fn escrow_payment(
    tx: &mut db::PgTx<'_>,
    payment_id: Uuid,
    reference_id: Uuid,
    bank_account_id: &str,
) -> Result<bool, AppError> {
    let updated = sqlx::query(
        "UPDATE payments SET status = 'ESCROW', paid_at = now(), updated_at = now() \
         WHERE id = $1 AND status = 'PENDING'",
    )
    .bind(payment_id)
    .execute(&mut **tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Ok(false);
    }

    let payment: Payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1")
        .bind(payment_id)
        .fetch_one(&mut **tx)
        .await?;

    let booking: Booking = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
        .bind(payment.booking_id)
        .fetch_one(&mut **tx)
        .await?;

    Ledger::record(
        tx,
        &[
            NewLedgerEntry {
                account_type: AccountType::ProviderBalance,
                account_id: booking.provider_id.to_string(),
                entry_type: EntryType::Credit,
                amount: payment.escrow_amount,
                reference_type: ReferenceType::Payment,
                reference_id,
                description: format!("escrow credit for payment {payment_id}"),
            },
            NewLedgerEntry {
                account_type: AccountType::PlatformRevenue,
                account_id: PLATFORM_ACCOUNT.into(),
                entry_type: EntryType::Credit,
                amount: payment.platform_fee,
                reference_type: ReferenceType::Payment,
                reference_id,
                description: format!("platform fee for payment {payment_id}"),
            },
            // The processor settles the full charged amount into the
            // platform's own bank account; this is what backs the later
            // payout debit from BANK_MAIN (payout.rs::approve's liquidity
            // check).
            NewLedgerEntry {
                account_type: AccountType::BankAccount,
                account_id: bank_account_id.into(),
                entry_type: EntryType::Credit,
                amount: payment.amount,
                reference_type: ReferenceType::Payment,
                reference_id,
                description: format!("processor settlement for payment {payment_id}"),
            },
        ],
    )
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    if booking.status == BookingStatus::Confirmed {
        sqlx::query("UPDATE bookings SET status = 'PENDING_EXECUTION' WHERE id = $1")
            .bind(booking.id)
            .execute(&mut **tx)
            .await?;
    }

    let report = Ledger::verify_invariant(tx, ReferenceType::Payment, reference_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    tracing::debug!(%payment_id, credits = %report.total_credits, "escrow ledger entries posted");

    Ok(true)
}

/// `MarkCashPaid(paymentId, claimedAmount)` (spec.md §4.2).
pub async fn mark_cash_paid(
    pool: &PgPool,
    payment_id: Uuid,
    claimed_amount: Money,
    caller_client_id: Uuid,
) -> Result<(), AppError> {
    let payment: Payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1")
        .bind(payment_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("payment".into()))?;

    let booking: Booking = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
        .bind(payment.booking_id)
        .fetch_one(pool)
        .await?;

    if booking.client_id != caller_client_id {
        return Err(AppError::Forbidden);
    }
    if payment.payment_method != PaymentMethod::Cash {
        return Err(AppError::Validation("payment is not a cash payment".into()));
    }
    if payment.status != PaymentStatus::Pending {
        return Err(AppError::StateConflict(format!(
            "cannot claim cash payment in status {:?}",
            payment.status
        )));
    }
    if amount_mismatch(claimed_amount, payment.amount) {
        return Err(AppError::Validation(
            "claimed amount does not match payment amount".into(),
        ));
    }

    let updated = sqlx::query(
        "UPDATE payments SET status = 'CASH_PAID', updated_at = now() WHERE id = $1 AND status = 'PENDING'",
    )
    .bind(payment_id)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        // Already claimed by a concurrent request — treat as success (spec.md §5).
        return Ok(());
    }
    tracing::info!(%payment_id, "client claimed cash payment");
    Ok(())
}

/// `ConfirmCashReceived(paymentId, confirmedAmount)` (spec.md §4.2). Runs
/// under the same serializable-transaction discipline as the card escrow
/// path and posts the same credit pattern, matched by a settlement-account
/// debit per the Open Question resolution in DESIGN.md (cash never touches
/// BANK_MAIN).
pub async fn confirm_cash_received(
    pool: &PgPool,
    payment_id: Uuid,
    confirmed_amount: Money,
    caller_provider_id: Uuid,
) -> Result<(), AppError> {
    let mut tx = db::begin_serializable(pool).await?;

    let payment: Payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("payment".into()))?;

    let booking: Booking = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
        .bind(payment.booking_id)
        .fetch_one(&mut *tx)
        .await?;

    if booking.provider_id != caller_provider_id {
        return Err(AppError::Forbidden);
    }
    if payment.status != PaymentStatus::CashPaid {
        return Err(AppError::StateConflict(format!(
            "cannot confirm cash payment in status {:?}",
            payment.status
        )));
    }
    if amount_mismatch(confirmed_amount, payment.amount) {
        return Err(AppError::Validation(
            "confirmed amount does not match payment amount".into(),
        ));
    }

    let updated = sqlx::query(
        "UPDATE payments SET status = 'CASH_RECEIVED', updated_at = now() \
         WHERE id = $1 AND status = 'CASH_PAID'",
    )
    .bind(payment_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.commit().await?;
        return Ok(());
    }

    Ledger::record(
        &mut tx,
        &[
            NewLedgerEntry {
                account_type: AccountType::ProviderBalance,
                account_id: booking.provider_id.to_string(),
                entry_type: EntryType::Credit,
                amount: payment.escrow_amount,
                reference_type: ReferenceType::Payment,
                reference_id: payment_id,
                description: format!("cash settlement credit for payment {payment_id}"),
            },
            NewLedgerEntry {
                account_type: AccountType::PlatformRevenue,
                account_id: PLATFORM_ACCOUNT.into(),
                entry_type: EntryType::Credit,
                amount: payment.platform_fee,
                reference_type: ReferenceType::Payment,
                reference_id: payment_id,
                description: format!("cash platform fee for payment {payment_id}"),
            },
            NewLedgerEntry {
                account_type: AccountType::Settlement,
                account_id: PLATFORM_ACCOUNT.into(),
                entry_type: EntryType::Debit,
                amount: payment.amount,
                reference_type: ReferenceType::Payment,
                reference_id: payment_id,
                description: format!("cash settlement offset for payment {payment_id}"),
            },
        ],
    )
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    sqlx::query("UPDATE bookings SET status = 'COMPLETED' WHERE id = $1")
        .bind(booking.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(%payment_id, booking_id = %booking.id, "cash payment confirmed received");
    Ok(())
}

/// Amount mismatch > 1 cent rejects (spec.md §4.2).
fn amount_mismatch(claimed: Money, actual: Money) -> bool {
    let diff = if claimed > actual {
        claimed - actual
    } else {
        actual - claimed
    };
    diff > Money::from_minor_units(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn split_amount_matches_spec_example() {
        let (fee, escrow) = split_amount(Money::new(dec!(123.45)), dec!(0.10));
        assert_eq!(fee, Money::new(dec!(12.35)));
        assert_eq!(escrow, Money::new(dec!(111.10)));
    }

    #[test]
    fn amount_mismatch_tolerates_one_cent() {
        let a = Money::from_minor_units(10000);
        let b = Money::from_minor_units(10001);
        assert!(!amount_mismatch(a, b));
        let c = Money::from_minor_units(10002);
        assert!(amount_mismatch(a, c));
    }
}
