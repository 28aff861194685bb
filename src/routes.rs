use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::adapters::{NotificationSink, PaymentProcessor};
use crate::auth::{AdminId, CallerId};
use crate::batch_export;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::model::PaymentMethod;
use crate::money::Money;
use crate::payment;
use crate::payout;
use crate::webhook::{self, WebhookEnvelope};

// ---------------------------------------------------------------------------
// App state (shared via Axum's State extractor)
// ---------------------------------------------------------------------------

pub struct AppState {
    pub pool: PgPool,
    pub processor: Arc<dyn PaymentProcessor>,
    pub notifications: Arc<dyn NotificationSink>,
    pub config: AppConfig,
}

// ---------------------------------------------------------------------------
// JSON request/response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub booking_id: Uuid,
    pub method: PaymentMethod,
}

#[derive(Debug, Deserialize)]
pub struct CashClaimRequest {
    pub amount: Money,
}

#[derive(Debug, Deserialize)]
pub struct CashConfirmRequest {
    pub amount: Money,
}

#[derive(Debug, Deserialize)]
pub struct RequestPayoutRequest {
    pub payment_id: Uuid,
    #[serde(default)]
    pub method: Option<crate::model::PayoutMethod>,
}

#[derive(Debug, Deserialize)]
pub struct RejectPayoutRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkPaidRequest {
    pub external_transfer_ref: String,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "escrow-core",
    }))
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

pub async fn create_intent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateIntentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let result = payment::create_intent(
        &state.pool,
        state.processor.as_ref(),
        body.booking_id,
        body.method,
        state.config.platform_fee_rate,
    )
    .await?;

    Ok(Json(json!({
        "payment_id": result.payment_id,
        "authorisation_url": result.authorisation_url,
    })))
}

pub async fn cash_claim(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<Uuid>,
    CallerId(caller): CallerId,
    Json(body): Json<CashClaimRequest>,
) -> Result<impl IntoResponse, AppError> {
    payment::mark_cash_paid(&state.pool, payment_id, body.amount, caller).await?;
    Ok(Json(json!({ "status": "cash_paid" })))
}

pub async fn cash_confirm(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<Uuid>,
    CallerId(caller): CallerId,
    Json(body): Json<CashConfirmRequest>,
) -> Result<impl IntoResponse, AppError> {
    payment::confirm_cash_received(&state.pool, payment_id, body.amount, caller).await?;
    Ok(Json(json!({ "status": "cash_received" })))
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

pub async fn processor_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    raw_body: axum::body::Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get("X-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    if !webhook::verify_signature(
        state.config.processor_secret_key.as_bytes(),
        &raw_body,
        signature,
    ) {
        return Err(AppError::Unauthorized);
    }

    let payload: WebhookEnvelope = serde_json::from_slice(&raw_body)
        .map_err(|e| AppError::Validation(format!("malformed webhook body: {e}")))?;

    let outcome = webhook::ingest(
        &state.pool,
        &raw_body,
        &payload,
        signature,
        &state.config.bank_main_account_id,
    )
    .await?;

    Ok(Json(json!({ "outcome": format!("{outcome:?}") })))
}

// ---------------------------------------------------------------------------
// Payouts
// ---------------------------------------------------------------------------

pub async fn request_payout(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequestPayoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let method = body.method.unwrap_or(state.config.payout_method_default);
    let payout_id = payout::request_payout(&state.pool, body.payment_id, method).await?;
    Ok(Json(json!({ "payout_id": payout_id })))
}

pub async fn approve_payout(
    State(state): State<Arc<AppState>>,
    Path(payout_id): Path<Uuid>,
    AdminId(admin_token): AdminId,
) -> Result<impl IntoResponse, AppError> {
    let admin_id = admin_uuid_from_token(&admin_token);
    payout::approve(
        &state.pool,
        payout_id,
        admin_id,
        &state.config.bank_main_account_id,
    )
    .await?;
    state
        .notifications
        .notify(crate::adapters::NotificationEvent::PayoutApproved { payout_id })
        .await;
    Ok(Json(json!({ "status": "approved" })))
}

pub async fn reject_payout(
    State(state): State<Arc<AppState>>,
    Path(payout_id): Path<Uuid>,
    _admin: AdminId,
    Json(body): Json<RejectPayoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    payout::reject(&state.pool, payout_id, &body.reason).await?;
    state
        .notifications
        .notify(crate::adapters::NotificationEvent::PayoutRejected {
            payout_id,
            reason: body.reason,
        })
        .await;
    Ok(Json(json!({ "status": "rejected" })))
}

pub async fn execute_payout(
    State(state): State<Arc<AppState>>,
    Path(payout_id): Path<Uuid>,
    AdminId(admin_token): AdminId,
) -> Result<impl IntoResponse, AppError> {
    let admin_id = admin_uuid_from_token(&admin_token);
    payout::execute(
        &state.pool,
        payout_id,
        admin_id,
        &state.config.bank_main_account_id,
    )
    .await?;
    state
        .notifications
        .notify(crate::adapters::NotificationEvent::PayoutCompleted { payout_id })
        .await;
    Ok(Json(json!({ "status": "completed" })))
}

pub async fn mark_paid_payout(
    State(state): State<Arc<AppState>>,
    Path(payout_id): Path<Uuid>,
    AdminId(admin_token): AdminId,
    Json(body): Json<MarkPaidRequest>,
) -> Result<impl IntoResponse, AppError> {
    let admin_id = admin_uuid_from_token(&admin_token);
    payout::mark_paid(
        &state.pool,
        payout_id,
        admin_id,
        &body.external_transfer_ref,
        &state.config.bank_main_account_id,
    )
    .await?;
    state
        .notifications
        .notify(crate::adapters::NotificationEvent::PayoutCompleted { payout_id })
        .await;
    Ok(Json(json!({ "status": "completed" })))
}

// ---------------------------------------------------------------------------
// Payout batches
// ---------------------------------------------------------------------------

pub async fn export_batch(
    State(state): State<Arc<AppState>>,
    _admin: AdminId,
) -> Result<impl IntoResponse, AppError> {
    match batch_export::export_batch(&state.pool).await? {
        Some(batch) => Ok(Json(json!({
            "batch_id": batch.batch_id,
            "batch_number": batch.batch_number,
            "payout_count": batch.payout_count,
            "total_amount": batch.total_amount.to_string(),
            "csv": batch.csv,
        }))),
        None => Ok(Json(json!({ "batch": serde_json::Value::Null }))),
    }
}

pub async fn execute_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<Uuid>,
    AdminId(admin_token): AdminId,
) -> Result<impl IntoResponse, AppError> {
    let admin_id = admin_uuid_from_token(&admin_token);
    batch_export::execute_batch(
        &state.pool,
        batch_id,
        admin_id,
        &state.config.bank_main_account_id,
    )
    .await?;
    Ok(Json(json!({ "status": "executed" })))
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

pub async fn payout_receipt(
    State(state): State<Arc<AppState>>,
    Path(payout_id): Path<Uuid>,
    _admin: AdminId,
) -> Result<impl IntoResponse, AppError> {
    let payout: crate::model::Payout = sqlx::query_as("SELECT * FROM payouts WHERE id = $1")
        .bind(payout_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("payout".into()))?;

    Ok(Json(json!({
        "payout_id": payout.id,
        "status": payout.status,
        "amount": payout.amount.to_string(),
        "method": payout.method,
        "external_ref": payout.external_ref,
        "executed_at": payout.executed_at,
    })))
}

/// Admin identity is carried only as an opaque bearer token (SPEC_FULL.md
/// §ambient auth does not mint a separate admin-user table); a stable UUID
/// derived from the token is stored as `approved_by`/`executed_by` so the
/// audit trail is still attributable to a distinct admin value.
fn admin_uuid_from_token(token: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, token.as_bytes())
}
