//! End-to-end scenarios against a real (ephemeral, per-test) Postgres
//! database via `#[sqlx::test]` — migrations from `./migrations` are
//! applied automatically before each test body runs.

use chrono::Utc;
use escrow_core::adapters::FakeProcessor;
use escrow_core::model::{BookingStatus, PaymentMethod, PaymentStatus, PayoutMethod, PayoutStatus};
use escrow_core::money::Money;
use escrow_core::{db, payment, payout, webhook};
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

async fn seed_booking(pool: &PgPool, total_amount: Money) -> (Uuid, Uuid, Uuid) {
    let booking_id = Uuid::new_v4();
    let client_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO bookings (id, client_id, provider_id, status, scheduled_at, total_amount) \
         VALUES ($1, $2, $3, 'CONFIRMED', $4, $5)",
    )
    .bind(booking_id)
    .bind(client_id)
    .bind(provider_id)
    .bind(Utc::now())
    .bind(total_amount.as_decimal())
    .execute(pool)
    .await
    .unwrap();
    (booking_id, client_id, provider_id)
}

#[sqlx::test]
async fn card_payment_happy_path_escrows_and_credits_provider(pool: PgPool) {
    let (booking_id, _client, provider_id) = seed_booking(&pool, Money::new(dec!(123.45))).await;
    let processor = FakeProcessor::new();
    processor.will_authorize("ext-ref-1");

    let intent = payment::create_intent(
        &pool,
        &processor,
        booking_id,
        PaymentMethod::Card,
        dec!(0.10),
    )
    .await
    .unwrap();

    let mut tx = db::begin_serializable(&pool).await.unwrap();
    let escrowed =
        payment::escrow_payment(&mut tx, intent.payment_id, intent.payment_id, payout::BANK_MAIN)
            .await
            .unwrap();
    tx.commit().await.unwrap();
    assert!(escrowed);

    let status: PaymentStatus =
        sqlx::query_scalar("SELECT status FROM payments WHERE id = $1")
            .bind(intent.payment_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, PaymentStatus::Escrow);

    let mut tx = db::begin_serializable(&pool).await.unwrap();
    let balance = escrow_core::ledger::Ledger::balance(
        &mut tx,
        escrow_core::model::AccountType::ProviderBalance,
        &provider_id.to_string(),
    )
    .await
    .unwrap();
    assert_eq!(balance, Money::new(dec!(111.10)));

    let booking_status: BookingStatus =
        sqlx::query_scalar("SELECT status FROM bookings WHERE id = $1")
            .bind(booking_id)
            .fetch_one(&mut *tx)
            .await
            .unwrap();
    assert_eq!(booking_status, BookingStatus::PendingExecution);
}

#[sqlx::test]
async fn duplicate_webhook_delivery_is_a_no_op_second_time(pool: PgPool) {
    let (booking_id, _client, _provider) = seed_booking(&pool, Money::new(dec!(50.00))).await;
    let processor = FakeProcessor::new();
    processor.will_authorize("dup-ref");
    let intent = payment::create_intent(&pool, &processor, booking_id, PaymentMethod::Card, dec!(0.10))
        .await
        .unwrap();

    let body = format!(
        r#"{{"event":"charge.success","external_ref":"{}"}}"#,
        intent.payment_id
    );
    sqlx::query("UPDATE payments SET external_ref = $1 WHERE id = $2")
        .bind(intent.payment_id.to_string())
        .bind(intent.payment_id)
        .execute(&pool)
        .await
        .unwrap();

    let payload: webhook::WebhookEnvelope = serde_json::from_str(&body).unwrap();
    let sig = "irrelevant-for-ingest-test";

    let first = webhook::ingest(&pool, body.as_bytes(), &payload, sig, payout::BANK_MAIN)
        .await
        .unwrap();
    assert_eq!(first, webhook::WebhookOutcome::Processed);

    let second = webhook::ingest(&pool, body.as_bytes(), &payload, sig, payout::BANK_MAIN)
        .await
        .unwrap();
    assert_eq!(second, webhook::WebhookOutcome::Duplicate);

    let events: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM webhook_events WHERE external_ref = $1",
    )
    .bind(intent.payment_id.to_string())
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(events, 1);
}

#[sqlx::test]
async fn payout_approve_rejects_when_provider_balance_is_insufficient(pool: PgPool) {
    let (booking_id, _client, provider_id) = seed_booking(&pool, Money::new(dec!(10.00))).await;
    let processor = FakeProcessor::new();
    processor.will_authorize("low-balance-ref");
    let intent = payment::create_intent(&pool, &processor, booking_id, PaymentMethod::Card, dec!(0.10))
        .await
        .unwrap();

    let payout_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO payouts (id, payment_id, provider_id, amount, method, status, requested_at) \
         VALUES ($1, $2, $3, $4, 'AUTO', 'PENDING_APPROVAL', now())",
    )
    .bind(payout_id)
    .bind(intent.payment_id)
    .bind(provider_id)
    .bind(Money::new(dec!(9999.00)).as_decimal())
    .execute(&pool)
    .await
    .unwrap();

    let result = payout::approve(&pool, payout_id, Uuid::new_v4(), payout::BANK_MAIN).await;
    assert!(result.is_err());

    let status: PayoutStatus = sqlx::query_scalar("SELECT status FROM payouts WHERE id = $1")
        .bind(payout_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, PayoutStatus::PendingApproval);
}

#[sqlx::test]
async fn request_payout_rejects_duplicate_for_same_payment(pool: PgPool) {
    let (booking_id, _client, _provider) = seed_booking(&pool, Money::new(dec!(75.00))).await;
    let processor = FakeProcessor::new();
    processor.will_authorize("dup-payout-ref");
    let intent = payment::create_intent(&pool, &processor, booking_id, PaymentMethod::Card, dec!(0.10))
        .await
        .unwrap();

    let mut tx = db::begin_serializable(&pool).await.unwrap();
    payment::escrow_payment(&mut tx, intent.payment_id, intent.payment_id, payout::BANK_MAIN)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    payout::request_payout(&pool, intent.payment_id, PayoutMethod::Auto)
        .await
        .unwrap();

    let second = payout::request_payout(&pool, intent.payment_id, PayoutMethod::Auto).await;
    assert!(second.is_err());
}
