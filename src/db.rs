use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

pub type PgTx<'a> = Transaction<'a, Postgres>;

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Opens a new transaction and raises its isolation level to `SERIALIZABLE`,
/// per spec.md §5: "every transaction that writes to ledger or advances
/// payment/payout state" runs at this level. Callers loop on
/// `is_serialization_failure` to retry the whole operation from scratch —
/// Postgres aborts serializable transactions that conflict with a concurrent
/// one rather than silently reordering them.
pub async fn begin_serializable(pool: &PgPool) -> Result<PgTx<'_>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Postgres SQLSTATE for a serialization failure under `SERIALIZABLE`
/// isolation (`40001`). This is an implementation detail a database-agnostic
/// spec can't name; see DESIGN.md for why the retry lives here.
pub fn is_serialization_failure(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("40001"))
}

/// Retries `attempt` once if it fails with a serialization conflict. Each
/// call to `attempt` must open and fully drive its own transaction via
/// [`begin_serializable`] — retrying re-runs the whole read-modify-write,
/// not just the commit.
pub async fn retry_on_conflict<T, Fut>(
    mut attempt: impl FnMut() -> Fut,
) -> Result<T, sqlx::Error>
where
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match attempt().await {
        Err(e) if is_serialization_failure(&e) => attempt().await,
        other => other,
    }
}
