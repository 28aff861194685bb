//! Webhook ingest (spec.md §4.4): signature verification, durable dedup via
//! `WebhookEvent`'s unique index, and dispatch into the payment state
//! machine. Accepts and returns 200 even for duplicates or unknown event
//! kinds — only malformed/unsigned requests are rejected.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::db;
use crate::error::AppError;
use crate::payment;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    UnknownEventType,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    pub external_ref: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Verifies `signature_hex` as HMAC-SHA512(raw_body) keyed by `secret`,
/// comparing in constant time — the same `subtle::ConstantTimeEq` pattern
/// the teacher uses for API-key comparison (SPEC_FULL.md §4.4).
pub fn verify_signature(secret: &[u8], raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected_sig) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret) else {
        return false;
    };
    mac.update(raw_body);
    let computed = mac.finalize().into_bytes();
    computed.as_slice().ct_eq(&expected_sig).into()
}

/// Full ingest pipeline: verify, parse, dedup-insert, dispatch, mark
/// processed. Returns an HTTP-facing outcome; callers always answer 200
/// unless `verify_signature` failed upstream (handled by the route before
/// calling this).
pub async fn ingest(
    pool: &PgPool,
    raw_body: &[u8],
    payload: &WebhookEnvelope,
    signature_hex: &str,
    bank_account_id: &str,
) -> Result<WebhookOutcome, AppError> {
    let event_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO webhook_events
            (id, event_type, external_ref, payload, signature, received_at, processed, retry_count)
        VALUES ($1, $2, $3, $4, $5, now(), false, 0)
        ON CONFLICT (event_type, external_ref) DO NOTHING
        "#,
    )
    .bind(event_id)
    .bind(&payload.event)
    .bind(&payload.external_ref)
    .bind(serde_json::from_slice::<serde_json::Value>(raw_body).unwrap_or(serde_json::Value::Null))
    .bind(signature_hex)
    .execute(pool)
    .await?;

    if inserted.rows_affected() == 0 {
        // Duplicate delivery of an event we've already recorded — spec.md
        // §4.4 step 3: return success idempotently and do nothing further.
        return Ok(WebhookOutcome::Duplicate);
    }

    match payload.event.as_str() {
        "charge.success" => {
            dispatch_charge_success(pool, event_id, &payload.external_ref, bank_account_id)
                .await?;
            Ok(WebhookOutcome::Processed)
        }
        "charge.failed" => {
            dispatch_charge_failed(pool, event_id, &payload.external_ref).await?;
            Ok(WebhookOutcome::Processed)
        }
        _ => {
            // Unknown kind: row stays recorded but unprocessed=false is fine,
            // mark it processed so the reconciler doesn't keep retrying it.
            sqlx::query(
                "UPDATE webhook_events SET processed = true, processed_at = now() WHERE id = $1",
            )
            .bind(event_id)
            .execute(pool)
            .await?;
            Ok(WebhookOutcome::UnknownEventType)
        }
    }
}

/// spec.md §4.4 steps 4-5, shared with the reconciler's replay path.
pub async fn dispatch_charge_success(
    pool: &PgPool,
    event_id: Uuid,
    external_ref: &str,
    bank_account_id: &str,
) -> Result<(), AppError> {
    let mut tx = db::begin_serializable(pool).await?;

    let payment_id: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM payments WHERE external_ref = $1")
            .bind(external_ref)
            .fetch_optional(&mut *tx)
            .await?;

    let Some(payment_id) = payment_id else {
        tx.commit().await?;
        tracing::warn!(external_ref, "charge.success for unknown payment ref");
        return Ok(());
    };

    payment::escrow_payment(&mut tx, payment_id, payment_id, bank_account_id).await?;

    sqlx::query(
        "UPDATE webhook_events SET processed = true, processed_at = now() WHERE id = $1",
    )
    .bind(event_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

async fn dispatch_charge_failed(
    pool: &PgPool,
    event_id: Uuid,
    external_ref: &str,
) -> Result<(), AppError> {
    let mut tx = db::begin_serializable(pool).await?;

    sqlx::query(
        "UPDATE payments SET status = 'FAILED', error_message = 'processor reported failure', \
         updated_at = now() WHERE external_ref = $1 AND status = 'PENDING'",
    )
    .bind(external_ref)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE webhook_events SET processed = true, processed_at = now() WHERE id = $1",
    )
    .bind(event_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        let secret = b"webhook-secret";
        let body = br#"{"event":"charge.success","external_ref":"R1"}"#;
        let mut mac = HmacSha512::new_from_slice(secret).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, body, &sig));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let secret = b"webhook-secret";
        let body = br#"{"event":"charge.success","external_ref":"R1"}"#;
        let mut mac = HmacSha512::new_from_slice(secret).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let tampered = br#"{"event":"charge.success","external_ref":"R2"}"#;
        assert!(!verify_signature(secret, tampered, &sig));
    }

    #[test]
    fn garbage_signature_hex_fails_closed() {
        assert!(!verify_signature(b"secret", b"body", "not-hex!!"));
    }
}
