use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use dotenv::dotenv;
use skuul_fees::api;
use skuul_fees::config::AppConfig;
use skuul_fees::database::memory::{InMemoryInvoiceBook, InMemoryPaymentStore, InMemoryUserDirectory};
use skuul_fees::database::repository::{InvoiceBook, PaymentStore, UserDirectory};
use skuul_fees::health::{HealthChecker, HealthState, HealthStatus};
use skuul_fees::logging::init_tracing;
use skuul_fees::middleware::error::{error_detail_middleware, ErrorDetailPolicy};
use skuul_fees::middleware::logging::{request_logging_middleware, UuidRequestId};
use skuul_fees::payments::provider::MpesaGateway;
use skuul_fees::payments::providers::DarajaClient;
use skuul_fees::services::clock::{Clock, SystemClock};
use skuul_fees::services::fee_payments::FeePaymentService;
use skuul_fees::services::ledger::PaymentLedger;
use skuul_fees::services::notification::{ChannelRegistry, ReceiptNotifier};
use skuul_fees::services::payment_plans::PlanRegistry;
use skuul_fees::services::receipt::HtmlReceiptRenderer;
use skuul_fees::services::reconciler::CallbackReconciler;
use skuul_fees::workers::status_poller::PollingScheduler;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

struct Stores {
    payments: Arc<dyn PaymentStore>,
    invoices: Arc<dyn InvoiceBook>,
    users: Arc<dyn UserDirectory>,
    #[cfg(feature = "database")]
    pool: Option<sqlx::PgPool>,
}

async fn init_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    #[cfg(feature = "database")]
    if let Some(database) = &config.database {
        use skuul_fees::database::invoice_repository::PgInvoiceBook;
        use skuul_fees::database::payment_repository::PgPaymentStore;
        use skuul_fees::database::user_repository::PgUserDirectory;
        use skuul_fees::database::{init_pool_from_config, run_migrations};

        info!("Initializing database connection pool...");
        let pool = init_pool_from_config(database).await?;
        run_migrations(&pool).await?;
        info!(
            max_connections = pool.options().get_max_connections(),
            "Database connection pool initialized"
        );

        return Ok(Stores {
            payments: Arc::new(PgPaymentStore::new(pool.clone())),
            invoices: Arc::new(PgInvoiceBook::new(pool.clone())),
            users: Arc::new(PgUserDirectory::new(pool.clone())),
            pool: Some(pool),
        });
    }

    if config.database.is_some() {
        warn!("Built without the database feature; DATABASE_URL is ignored");
    }
    info!("Using in-memory stores (SKIP_EXTERNALS=true)");
    Ok(Stores {
        payments: Arc::new(InMemoryPaymentStore::new()),
        invoices: Arc::new(InMemoryInvoiceBook::new()),
        users: Arc::new(InMemoryUserDirectory::new()),
        #[cfg(feature = "database")]
        pool: None,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mpesa = ?config.mpesa,
        channels = ?config.notifications.channels,
        polling = config.polling.enabled,
        "Starting skuul-fees service"
    );

    let stores = init_stores(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let gateway: Arc<dyn MpesaGateway> = Arc::new(DarajaClient::new(config.mpesa.clone())?);

    let channels =
        ChannelRegistry::from_config(&config.notifications, &config.receipts.school_name)?;
    let notifier = Arc::new(ReceiptNotifier::new(
        stores.payments.clone(),
        stores.invoices.clone(),
        stores.users.clone(),
        Arc::new(HtmlReceiptRenderer::new(
            config.receipts.directory.clone(),
            config.receipts.school_name.clone(),
        )),
        channels,
        clock.clone(),
    ));

    let ledger = Arc::new(
        PaymentLedger::new(
            stores.payments.clone(),
            stores.invoices.clone(),
            PlanRegistry::with_settlement_log(),
            clock.clone(),
        )
        .with_notifier(notifier),
    );
    let reconciler = Arc::new(CallbackReconciler::new(ledger.clone(), clock.clone()));

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let poller = Arc::new(
        PollingScheduler::new(gateway.clone(), reconciler.clone(), config.polling.clone())
            .with_shutdown(worker_shutdown_rx),
    );

    let service = Arc::new(
        FeePaymentService::new(ledger, reconciler, gateway.clone(), stores.invoices.clone())
            .with_poller(poller),
    );

    #[allow(unused_mut)]
    let mut health_checker = HealthChecker::new(gateway);
    #[cfg(feature = "database")]
    if let Some(pool) = stores.pool.clone() {
        health_checker = health_checker.with_database(pool);
    }

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .with_state(health_checker)
        .merge(api::mpesa::routes(Arc::new(api::mpesa::MpesaState { service })))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(axum::middleware::from_fn_with_state(
                    ErrorDetailPolicy::new(config.server.debug),
                    error_detail_middleware,
                ))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    info!("Server shutdown complete");

    Ok(())
}

async fn root() -> &'static str {
    "Skuul fee payments API"
}

async fn health(
    State(checker): State<HealthChecker>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let status = checker.check_health().await;
    if status.status == HealthState::Unhealthy {
        error!("Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(status)))
    } else {
        Ok(Json(status))
    }
}

async fn liveness() -> &'static str {
    "OK"
}
