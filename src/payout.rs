//! Payout engine (spec.md §4.3). `approve` is the spec's most
//! safety-critical operation: every balance and liquidity check it performs
//! must be re-derived inside the same serializable transaction as the
//! status write it guards (spec.md §9's "check-inside-transaction" rule).

use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::error::AppError;
use crate::ledger::{Ledger, NewLedgerEntry};
use crate::model::{
    AccountType, Booking, EntryType, Payment, PaymentStatus, Payout, PayoutMethod, PayoutStatus,
    ReferenceType,
};

/// Label for the platform's own bank account in the ledger (spec.md §3,
/// configured via `BANK_MAIN_ACCOUNT_ID`).
pub const BANK_MAIN: &str = "BANK_MAIN";

/// `RequestPayout(paymentId)` (spec.md §4.3). Fails `ALREADY_EXISTS` if a
/// non-terminal payout already exists for this payment — backstopped by the
/// unique index on `payouts(payment_id)`.
pub async fn request_payout(
    pool: &PgPool,
    payment_id: Uuid,
    method: PayoutMethod,
) -> Result<Uuid, AppError> {
    let payment: Payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1")
        .bind(payment_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("payment".into()))?;

    if payment.status != PaymentStatus::Escrow {
        return Err(AppError::StateConflict(
            "payout can only be requested while payment is in escrow".into(),
        ));
    }

    let booking: Booking = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
        .bind(payment.booking_id)
        .fetch_one(pool)
        .await?;

    if let Some(existing) =
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM payouts WHERE payment_id = $1")
            .bind(payment_id)
            .fetch_optional(pool)
            .await?
    {
        let _ = existing;
        return Err(AppError::StateConflict(
            "a payout already exists for this payment".into(),
        ));
    }

    let payout_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO payouts
            (id, payment_id, provider_id, amount, method, status, requested_at)
        VALUES ($1, $2, $3, $4, $5, 'PENDING_APPROVAL', now())
        "#,
    )
    .bind(payout_id)
    .bind(payment_id)
    .bind(booking.provider_id)
    .bind(payment.escrow_amount.as_decimal())
    .bind(method)
    .execute(pool)
    .await?;

    tracing::info!(%payout_id, %payment_id, "payout requested");
    Ok(payout_id)
}

/// `Approve(payoutId, adminId)` (spec.md §4.3): row-lock, re-derive
/// provider balance and bank liquidity inside this transaction, then the
/// atomic status write. Concurrent approvals of the same payout fail with
/// `STATE_CONFLICT` (the `WHERE status = 'PENDING_APPROVAL'` guard);
/// concurrent approvals against the same provider's balance serialize on
/// Postgres's own lock order, and the loser sees `INVARIANT` /
/// `INSUFFICIENT_BALANCE` rather than corrupting the balance.
pub async fn approve(
    pool: &PgPool,
    payout_id: Uuid,
    admin_id: Uuid,
    bank_account_id: &str,
) -> Result<(), AppError> {
    let mut tx = db::begin_serializable(pool).await?;

    let payout: Payout = sqlx::query_as("SELECT * FROM payouts WHERE id = $1 FOR UPDATE")
        .bind(payout_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("payout".into()))?;

    if payout.status != PayoutStatus::PendingApproval {
        return Err(AppError::StateConflict(format!(
            "payout is {:?}, not PENDING_APPROVAL",
            payout.status
        )));
    }

    let balance = Ledger::balance(
        &mut tx,
        AccountType::ProviderBalance,
        &payout.provider_id.to_string(),
    )
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;
    if balance < payout.amount {
        return Err(AppError::Invariant(format!(
            "provider balance {balance} insufficient for payout {}",
            payout.amount
        )));
    }

    // BANK_MAIN is credited by card settlements (payment::escrow_payment)
    // and debited by completed payouts, so its running balance is the
    // platform's actual cash position: reject the approval rather than
    // drive it negative.
    let bank_balance = Ledger::balance(&mut tx, AccountType::BankAccount, bank_account_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if bank_balance < payout.amount {
        return Err(AppError::Invariant(format!(
            "bank liquidity {bank_balance} insufficient for payout {}",
            payout.amount
        )));
    }

    let updated = sqlx::query(
        "UPDATE payouts SET status = 'APPROVED', approved_at = now(), approved_by = $2 \
         WHERE id = $1 AND status = 'PENDING_APPROVAL'",
    )
    .bind(payout_id)
    .bind(admin_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::StateConflict(
            "payout was approved or changed by a concurrent request".into(),
        ));
    }

    tx.commit().await?;
    tracing::info!(%payout_id, %admin_id, "payout approved");
    Ok(())
}

/// `Approve(payoutId, adminId)` reject path.
pub async fn reject(pool: &PgPool, payout_id: Uuid, reason: &str) -> Result<(), AppError> {
    let updated = sqlx::query(
        "UPDATE payouts SET status = 'REJECTED' WHERE id = $1 AND status = 'PENDING_APPROVAL'",
    )
    .bind(payout_id)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::StateConflict(
            "payout is not PENDING_APPROVAL".into(),
        ));
    }
    tracing::info!(%payout_id, reason, "payout rejected");
    Ok(())
}

/// `Execute(payoutId)` (AUTO) and `MarkPaid(payoutId, externalTransferRef)`
/// (MANUAL) share this bookkeeping (spec.md §4.3): debit BANK_MAIN, advance
/// payment to RELEASED and booking to COMPLETED, payout to COMPLETED.
/// Idempotent on `payoutId` via the optimistic `WHERE status = 'APPROVED'`
/// guard. Takes the caller's own transaction rather than opening one, so
/// `batch_export::execute_batch` can drive every payout in a batch plus the
/// batch's own status write inside one serializable transaction (spec.md
/// §4.5).
pub(crate) async fn complete_payout_in_tx(
    tx: &mut db::PgTx<'_>,
    payout_id: Uuid,
    executed_by: Uuid,
    external_ref: Option<&str>,
    bank_account_id: &str,
) -> Result<(), AppError> {
    let payout: Payout = sqlx::query_as("SELECT * FROM payouts WHERE id = $1 FOR UPDATE")
        .bind(payout_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("payout".into()))?;

    if payout.status == PayoutStatus::Completed {
        return Ok(());
    }
    if payout.status != PayoutStatus::Approved && payout.status != PayoutStatus::Processing {
        return Err(AppError::StateConflict(format!(
            "payout is {:?}, cannot complete",
            payout.status
        )));
    }

    let updated = sqlx::query(
        "UPDATE payouts SET status = 'COMPLETED', executed_at = now(), executed_by = $2, \
         external_ref = $3 WHERE id = $1 AND status IN ('APPROVED', 'PROCESSING')",
    )
    .bind(payout_id)
    .bind(executed_by)
    .bind(external_ref)
    .execute(&mut **tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Ok(());
    }

    Ledger::record(
        tx,
        &[NewLedgerEntry {
            account_type: AccountType::BankAccount,
            account_id: bank_account_id.into(),
            entry_type: EntryType::Debit,
            amount: payout.amount,
            reference_type: ReferenceType::Payout,
            reference_id: payout_id,
            description: format!("bank debit for payout {payout_id}"),
        }],
    )
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    sqlx::query("UPDATE payments SET status = 'RELEASED', updated_at = now() WHERE id = $1")
        .bind(payout.payment_id)
        .execute(&mut **tx)
        .await?;

    let booking_id: Uuid =
        sqlx::query_scalar("SELECT booking_id FROM payments WHERE id = $1")
            .bind(payout.payment_id)
            .fetch_one(&mut **tx)
            .await?;
    sqlx::query("UPDATE bookings SET status = 'COMPLETED' WHERE id = $1")
        .bind(booking_id)
        .execute(&mut **tx)
        .await?;

    tracing::info!(%payout_id, "payout completed");
    Ok(())
}

pub async fn execute(
    pool: &PgPool,
    payout_id: Uuid,
    executed_by: Uuid,
    bank_account_id: &str,
) -> Result<(), AppError> {
    let mut tx = db::begin_serializable(pool).await?;
    complete_payout_in_tx(&mut tx, payout_id, executed_by, None, bank_account_id).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn mark_paid(
    pool: &PgPool,
    payout_id: Uuid,
    executed_by: Uuid,
    external_transfer_ref: &str,
    bank_account_id: &str,
) -> Result<(), AppError> {
    let mut tx = db::begin_serializable(pool).await?;
    complete_payout_in_tx(
        &mut tx,
        payout_id,
        executed_by,
        Some(external_transfer_ref),
        bank_account_id,
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_main_label_matches_spec_default() {
        assert_eq!(BANK_MAIN, "BANK_MAIN");
    }
}
