//! Payout batch export (spec.md §4.5): groups `APPROVED` MANUAL payouts into
//! a numbered CSV batch, then marks the batch (and its payouts) executed
//! once the operator confirms the bank run went through.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::error::AppError;
use crate::model::{BatchStatus, Payout};
use crate::money::Money;

pub struct ExportedBatch {
    pub batch_id: Uuid,
    pub batch_number: String,
    pub csv: String,
    pub payout_count: usize,
    pub total_amount: Money,
}

/// `ExportBatch()` (spec.md §4.5): collects every `APPROVED` MANUAL payout,
/// assigns them the next sequence number for today, and renders the CSV.
/// The sequence comes from a row-locked per-day counter rather than
/// wall-clock ordering, so two concurrent exports on the same day can never
/// produce the same batch number (spec.md §9).
pub async fn export_batch(pool: &PgPool) -> Result<Option<ExportedBatch>, AppError> {
    let mut tx = db::begin_serializable(pool).await?;

    let payouts: Vec<Payout> = sqlx::query_as(
        "SELECT * FROM payouts WHERE status = 'APPROVED' AND method = 'MANUAL' \
         ORDER BY approved_at FOR UPDATE",
    )
    .fetch_all(&mut *tx)
    .await?;

    if payouts.is_empty() {
        tx.commit().await?;
        return Ok(None);
    }

    let today = Utc::now().date_naive();
    let date_tag = today.format("%Y%m%d").to_string();

    let seq: i32 = sqlx::query_scalar(
        "INSERT INTO batch_counters (batch_date, next_seq) VALUES ($1, 2) \
         ON CONFLICT (batch_date) DO UPDATE SET next_seq = batch_counters.next_seq + 1 \
         RETURNING next_seq - 1",
    )
    .bind(today)
    .fetch_one(&mut *tx)
    .await?;

    let batch_number = format!("BATCH_{date_tag}_{seq:04}");
    let batch_id = Uuid::new_v4();

    let total_amount = payouts
        .iter()
        .fold(Money::ZERO, |acc, p| acc + p.amount);

    sqlx::query(
        "INSERT INTO payout_batches \
            (id, batch_number, status, total_amount, payout_count, exported_at) \
         VALUES ($1, $2, 'EXPORTED', $3, $4, now())",
    )
    .bind(batch_id)
    .bind(&batch_number)
    .bind(total_amount.as_decimal())
    .bind(payouts.len() as i32)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE payouts SET status = 'PROCESSING', csv_batch_id = $1 WHERE id = ANY($2)")
        .bind(batch_id)
        .bind(payouts.iter().map(|p| p.id).collect::<Vec<_>>())
        .execute(&mut *tx)
        .await?;

    let csv = write_csv(&payouts)?;

    tx.commit().await?;
    tracing::info!(%batch_id, %batch_number, count = payouts.len(), "payout batch exported");

    Ok(Some(ExportedBatch {
        batch_id,
        batch_number,
        csv,
        payout_count: payouts.len(),
        total_amount,
    }))
}

/// Renders the bank-file CSV (spec.md §4.5): one row per payout with the
/// exact header the bank's batch-upload format expects.
pub fn write_csv(payouts: &[Payout]) -> Result<String, AppError> {
    let mut out = String::from("Account Name,Account Number,Bank Code,Amount,Reference,Description\n");
    for p in payouts {
        let account_name = p.account_name.as_deref().unwrap_or("");
        let account_number = p.account_number.as_deref().unwrap_or("");
        let bank_code = p.bank_code.as_deref().unwrap_or("");
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_escape(account_name),
            csv_escape(account_number),
            csv_escape(bank_code),
            p.amount,
            format!("PAYOUT_{}", p.id),
            csv_escape(&format!("Payout {}", p.id)),
        ));
    }
    Ok(out)
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// `ExecuteBatch(batchId)` (spec.md §4.5): marks the batch and every payout
/// in it `COMPLETED` once the operator confirms the bank run succeeded. The
/// status check, every payout's completion bookkeeping, and the final batch
/// stamp all happen inside one serializable transaction — the accounting
/// invariant is verified at commit, so a mid-batch failure leaves the batch
/// exactly as it was (`EXPORTED`, no payout touched), never half-executed.
/// Delegates the per-payout bookkeeping (ledger debit, payment release,
/// booking completion) to `payout::complete_payout_in_tx` so a batch
/// execution and a single manual mark-paid can never diverge in accounting
/// effect.
pub async fn execute_batch(
    pool: &PgPool,
    batch_id: Uuid,
    executed_by: Uuid,
    bank_account_id: &str,
) -> Result<(), AppError> {
    let mut tx = db::begin_serializable(pool).await?;

    let batch_status: Option<BatchStatus> =
        sqlx::query_scalar("SELECT status FROM payout_batches WHERE id = $1 FOR UPDATE")
            .bind(batch_id)
            .fetch_optional(&mut *tx)
            .await?;

    match batch_status {
        None => return Err(AppError::NotFound("payout batch".into())),
        Some(BatchStatus::Executed) => {
            tx.commit().await?;
            return Ok(());
        }
        Some(BatchStatus::Open) => {
            return Err(AppError::StateConflict(
                "batch has not been exported yet".into(),
            ))
        }
        Some(BatchStatus::Exported) => {}
    }

    let payout_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM payouts WHERE csv_batch_id = $1 AND status != 'COMPLETED'",
    )
    .bind(batch_id)
    .fetch_all(&mut *tx)
    .await?;

    let batch_ref = batch_id.to_string();
    for payout_id in payout_ids {
        crate::payout::complete_payout_in_tx(
            &mut tx,
            payout_id,
            executed_by,
            Some(&batch_ref),
            bank_account_id,
        )
        .await?;
    }

    sqlx::query(
        "UPDATE payout_batches SET status = 'EXECUTED', executed_at = now(), executed_by = $2 \
         WHERE id = $1",
    )
    .bind(batch_id)
    .bind(executed_by)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(%batch_id, "payout batch executed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_header_matches_bank_format() {
        let csv = write_csv(&[]).unwrap();
        assert_eq!(
            csv,
            "Account Name,Account Number,Bank Code,Amount,Reference,Description\n"
        );
    }

    #[test]
    fn escapes_commas_in_free_text_fields() {
        assert_eq!(csv_escape("Smith, John"), "\"Smith, John\"");
        assert_eq!(csv_escape("plain"), "plain");
    }
}
