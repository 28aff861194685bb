use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use escrow_core::adapters::{FakeProcessor, NullNotificationSink};
use escrow_core::config::AppConfig;
use escrow_core::db;
use escrow_core::reconciler::{self, ReconcilerConfig};
use escrow_core::routes::{self, AppState};

#[tokio::main]
async fn main() {
    // Initialize tracing (env-filter: RUST_LOG=escrow_core=debug,info)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "escrow_core=info,tower_http=info".into()),
        )
        .init();

    // Load and validate config
    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[escrow-core] configuration error: {e}");
            std::process::exit(1);
        }
    };

    // CORS: require explicit origins in release builds
    if config.allowed_origins.is_empty() {
        if cfg!(debug_assertions) {
            warn!("ALLOWED_ORIGINS not set — using permissive CORS (dev mode only)");
        } else {
            eprintln!("[escrow-core] FATAL: ALLOWED_ORIGINS must be set in production builds");
            std::process::exit(1);
        }
    }

    info!(
        host = %config.host,
        port = config.port,
        fee_rate = %config.platform_fee_rate,
        origins = config.allowed_origins.len(),
        "starting escrow-core"
    );

    let pool = match db::connect(&config.database_url, config.database_max_connections).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[escrow-core] database connection failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = db::run_migrations(&pool).await {
        eprintln!("[escrow-core] migration failed: {e}");
        std::process::exit(1);
    }
    info!("database migrations applied");

    // TODO: swap FakeProcessor for a reqwest-based PaymentProcessor once a
    // concrete processor integration is selected.
    let processor = Arc::new(FakeProcessor::new());
    let notifications = Arc::new(NullNotificationSink);

    reconciler::spawn(
        pool.clone(),
        processor.clone(),
        ReconcilerConfig {
            interval: Duration::from_secs(config.reconciler_interval_secs),
            webhook_replay_threshold: chrono::Duration::seconds(config.webhook_replay_threshold_secs),
            max_webhook_retries: config.max_webhook_retries,
            bank_account_id: config.bank_main_account_id.clone(),
        },
    );

    // Build CORS layer
    let cors = if config.allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                "X-Signature".parse().unwrap(),
            ])
    };

    let state = Arc::new(AppState {
        pool,
        processor,
        notifications,
        config: config.clone(),
    });

    let app = Router::new()
        .route("/health", axum::routing::get(routes::health))
        .route("/payments/intents", axum::routing::post(routes::create_intent))
        .route(
            "/payments/{id}/cash-claim",
            axum::routing::post(routes::cash_claim),
        )
        .route(
            "/payments/{id}/cash-confirm",
            axum::routing::post(routes::cash_confirm),
        )
        .route(
            "/webhooks/processor",
            axum::routing::post(routes::processor_webhook),
        )
        .route("/payouts", axum::routing::post(routes::request_payout))
        .route(
            "/payouts/{id}/approve",
            axum::routing::post(routes::approve_payout),
        )
        .route(
            "/payouts/{id}/reject",
            axum::routing::post(routes::reject_payout),
        )
        .route(
            "/payouts/{id}/execute",
            axum::routing::post(routes::execute_payout),
        )
        .route(
            "/payouts/{id}/mark-paid",
            axum::routing::post(routes::mark_paid_payout),
        )
        .route(
            "/payouts/{id}/receipt",
            axum::routing::get(routes::payout_receipt),
        )
        .route(
            "/payouts/batches/export",
            axum::routing::post(routes::export_batch),
        )
        .route(
            "/payouts/batches/{id}/execute",
            axum::routing::post(routes::execute_batch),
        )
        .layer(RequestBodyLimitLayer::new(256 * 1024)) // 256KB
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            "Referrer-Policy".parse::<header::HeaderName>().unwrap(),
            HeaderValue::from_static("no-referrer"),
        ))
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("invalid listen address");

    info!(addr = %addr, "escrow-core listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    info!("escrow-core shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
