//! Reconciler (spec.md §4.6): two periodic background jobs that repair
//! drift between this core and the external processor — a stuck webhook
//! delivery, or a payment whose status never advanced because the webhook
//! never arrived at all. Both jobs call the exact same transition functions
//! the live webhook/payment paths call, so a reconciler-driven fix can never
//! produce a different accounting outcome than the live path would have.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::adapters::{PaymentProcessor, ProcessorStatus};
use crate::db;
use crate::payment;
use crate::webhook;

pub struct ReconcilerConfig {
    pub interval: Duration,
    pub webhook_replay_threshold: chrono::Duration,
    pub max_webhook_retries: i32,
    pub bank_account_id: String,
}

/// Spawns both jobs on `tokio::spawn` loops, matching the teacher's
/// `spawn_eviction_task`/`spawn_timeout_loop` pattern of a `loop { tick().await; sleep().await }`
/// background worker owned by the process, not by any one request.
pub fn spawn(pool: PgPool, processor: Arc<dyn PaymentProcessor>, config: ReconcilerConfig) {
    let webhook_pool = pool.clone();
    let webhook_threshold = config.webhook_replay_threshold;
    let webhook_retries = config.max_webhook_retries;
    let interval = config.interval;
    let bank_account_id = config.bank_account_id;
    let poll_bank_account_id = bank_account_id.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) = replay_stuck_webhooks(
                &webhook_pool,
                webhook_threshold,
                webhook_retries,
                &bank_account_id,
            )
            .await
            {
                tracing::warn!(error = %e, "webhook replay pass failed");
            }
            tokio::time::sleep(interval).await;
        }
    });

    tokio::spawn(async move {
        loop {
            if let Err(e) =
                poll_pending_payments(&pool, processor.as_ref(), &poll_bank_account_id).await
            {
                tracing::warn!(error = %e, "payment poll pass failed");
            }
            tokio::time::sleep(interval).await;
        }
    });
}

/// Job 1 (spec.md §4.6): re-dispatches any webhook event older than the
/// replay threshold that is still unprocessed, up to `max_retries` attempts.
/// Uses the same `dispatch_charge_success` the live ingest path calls, so a
/// replay has the exact idempotent effect a second live delivery would have.
async fn replay_stuck_webhooks(
    pool: &PgPool,
    threshold: chrono::Duration,
    max_retries: i32,
    bank_account_id: &str,
) -> Result<(), sqlx::Error> {
    let cutoff = Utc::now() - threshold;
    let stuck: Vec<(Uuid, String, String)> = sqlx::query_as(
        "SELECT id, event_type, external_ref FROM webhook_events \
         WHERE processed = false AND received_at < $1 AND retry_count < $2",
    )
    .bind(cutoff)
    .bind(max_retries)
    .fetch_all(pool)
    .await?;

    for (event_id, event_type, external_ref) in stuck {
        let result = match event_type.as_str() {
            "charge.success" => webhook::dispatch_charge_success(
                pool,
                event_id,
                &external_ref,
                bank_account_id,
            )
            .await
            .map_err(|e| e.to_string()),
            _ => Ok(()),
        };

        match result {
            Ok(()) => {
                sqlx::query(
                    "UPDATE webhook_events SET processed = true, processed_at = now() \
                     WHERE id = $1",
                )
                .bind(event_id)
                .execute(pool)
                .await?;
                tracing::info!(%event_id, %external_ref, "replayed stuck webhook");
            }
            Err(reason) => {
                sqlx::query(
                    "UPDATE webhook_events SET retry_count = retry_count + 1, error = $2 \
                     WHERE id = $1",
                )
                .bind(event_id)
                .bind(&reason)
                .execute(pool)
                .await?;
                tracing::warn!(%event_id, %reason, "webhook replay attempt failed");
            }
        }
    }
    Ok(())
}

/// Job 2 (spec.md §4.6): for any `PENDING` card payment with no webhook
/// delivery yet, polls the processor directly and advances the payment if
/// the processor already reports a terminal outcome. Catches the case where
/// a webhook delivery was lost entirely rather than merely delayed.
async fn poll_pending_payments(
    pool: &PgPool,
    processor: &dyn PaymentProcessor,
    bank_account_id: &str,
) -> Result<(), sqlx::Error> {
    let stale_cutoff = Utc::now() - chrono::Duration::minutes(5);
    let pending: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT id, external_ref FROM payments \
         WHERE status = 'PENDING' AND payment_method = 'CARD' \
           AND external_ref IS NOT NULL AND created_at < $1",
    )
    .bind(stale_cutoff)
    .fetch_all(pool)
    .await?;

    for (payment_id, external_ref) in pending {
        let status = match processor.verify(&external_ref).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%payment_id, error = %e, "processor poll failed");
                continue;
            }
        };

        match status {
            ProcessorStatus::Succeeded => {
                let mut tx = db::begin_serializable(pool).await?;
                let event_id = Uuid::new_v4();
                if let Err(e) = sqlx::query(
                    r#"
                    INSERT INTO webhook_events
                        (id, event_type, external_ref, payload, signature, received_at, processed, processed_at, retry_count)
                    VALUES ($1, 'charge.success', $2, $3, 'reconciler-synthetic', now(), true, now(), 0)
                    ON CONFLICT (event_type, external_ref) DO NOTHING
                    "#,
                )
                .bind(event_id)
                .bind(&external_ref)
                .bind(serde_json::json!({ "source": "reconciler", "payment_id": payment_id }))
                .execute(&mut *tx)
                .await
                {
                    tracing::warn!(%payment_id, error = %e, "reconciler audit-event insert failed");
                    continue;
                }
                if let Err(e) =
                    payment::escrow_payment(&mut tx, payment_id, payment_id, bank_account_id).await
                {
                    tracing::warn!(%payment_id, error = %e, "reconciler escrow failed");
                    continue;
                }
                tx.commit().await?;
                tracing::info!(%payment_id, "reconciler advanced payment via processor poll");
            }
            ProcessorStatus::Failed => {
                sqlx::query(
                    "UPDATE payments SET status = 'FAILED', \
                     error_message = 'processor poll reported failure', updated_at = now() \
                     WHERE id = $1 AND status = 'PENDING'",
                )
                .bind(payment_id)
                .execute(pool)
                .await?;
            }
            ProcessorStatus::Pending => {}
        }
    }
    Ok(())
}
