use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fulfillment::catalog::ObjectKeyMap;
use fulfillment::config::Config;
use fulfillment::db::{AppState, create_pool, init_db, queries};
use fulfillment::email::{EmailService, spawn_order_confirmation};
use fulfillment::entitlement::EntitlementVerifier;
use fulfillment::fulfillment::{PaymentOutcome, retry_fulfillment};
use fulfillment::handlers;
use fulfillment::models::{CreateClassSession, Product, ProductType};
use fulfillment::payments::StripeVerifier;

#[derive(Parser, Debug)]
#[command(name = "fulfillment")]
#[command(about = "Payment-confirmation ingestion, order fulfillment and gated downloads")]
struct Cli {
    /// Seed the catalog with dev products and class sessions (dev mode only)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,

    /// List orders whose fulfillment is still pending, then exit
    #[arg(long)]
    list_pending: bool,

    /// Re-run fulfillment for a pending order (by checkout session id), then exit
    #[arg(long, value_name = "SESSION_ID")]
    retry_fulfillment: Option<String>,
}

/// Seeds the catalog for local testing.
/// Only runs in dev mode and when the catalog is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let count = queries::count_products(&conn).expect("Failed to count products");
    if count > 0 {
        tracing::info!("Catalog already has products, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV CATALOG");
    tracing::info!("============================================");

    let products = [
        ("SONORAN_ECHOES_DIGITAL", "Sonoran Echoes - Digital Album", 1200, ProductType::Digital),
        ("BLACK_CANYON_GUIDE", "Black Canyon Paddleboarding Guide", 500, ProductType::Digital),
        ("LEES_FERRY_GUIDE", "Lees Ferry Adventure Guide", 500, ProductType::Digital),
        ("GIFT_CERT_40", "Gift Certificate - $40", 4000, ProductType::Gift),
        ("GIFT_CERT_75", "Gift Certificate - $75", 7500, ProductType::Gift),
        ("PADDLE_TEE", "Desert Paddleboards Tee", 2800, ProductType::Merch),
        ("SOUNDBATH_PUBLIC", "Floating Soundbath - Public Pool", 3500, ProductType::Class),
        ("SOUNDBATH_RESORT", "Floating Soundbath - Resort Class", 6500, ProductType::Class),
    ];

    for (key, name, price_cents, product_type) in products {
        queries::create_product(
            &conn,
            &Product {
                product_key: key.to_string(),
                name: name.to_string(),
                price_cents,
                currency: "usd".to_string(),
                product_type,
            },
        )
        .expect("Failed to create dev product");
        tracing::info!("Product: {} ({}, {} cents)", key, product_type.as_ref(), price_cents);
    }

    // One session per class, tomorrow, 90 minutes
    let start = queries::now() + 24 * 60 * 60;
    for (key, seats) in [("SOUNDBATH_PUBLIC", 10), ("SOUNDBATH_RESORT", 6)] {
        let session = queries::create_class_session(
            &conn,
            &CreateClassSession {
                product_key: key.to_string(),
                start_time: start,
                end_time: start + 90 * 60,
                seats_total: seats,
            },
        )
        .expect("Failed to create dev class session");
        tracing::info!(
            "Class session: {} (id: {}, {} seats)",
            key,
            session.id,
            session.seats_total
        );
    }

    tracing::info!("============================================");
}

fn list_pending(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection");
    let orders = queries::list_pending_orders(&conn).expect("Failed to list pending orders");
    if orders.is_empty() {
        println!("No pending orders");
        return;
    }
    for order in orders {
        println!(
            "{}  {}  {}  error={}",
            order.session_id,
            order.product_key,
            order.created_at,
            order.fulfillment_error.as_deref().unwrap_or("-")
        );
    }
}

/// Operator retry path for orders left pending by a failed branch.
async fn run_retry(state: &AppState, session_id: &str) -> bool {
    let mut conn = state.db.get().expect("Failed to get db connection");
    let outcome = match retry_fulfillment(&mut conn, &state.object_keys, session_id) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Retry failed for {}: {}", session_id, e);
            return false;
        }
    };
    drop(conn);

    match outcome {
        PaymentOutcome::Fulfilled {
            order, purchases, ..
        } => {
            println!("Order {} fulfilled", order.session_id);
            // Wait for the send here; the process exits right after
            let _ = spawn_order_confirmation(state.notifier.clone(), order, purchases).await;
            true
        }
        PaymentOutcome::Duplicate { order } => {
            println!("Order {} was already fulfilled", order.session_id);
            true
        }
        PaymentOutcome::Pending { order, error } => {
            eprintln!("Order {} still pending: {} ({})", order.session_id, error, error.kind());
            false
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fulfillment=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    if config.resend_api_key.is_none() {
        tracing::warn!("RESEND_API_KEY not set: confirmation emails will be logged only");
    }
    if config.download_worker_url.is_none() {
        tracing::warn!("DOWNLOAD_WORKER_URL not set: browser download links will fail");
    }

    let state = AppState {
        db: db_pool,
        signature_verifier: Arc::new(StripeVerifier::new(config.stripe_webhook_secret.clone())),
        entitlements: Arc::new(EntitlementVerifier::new(config.download_worker_secret.clone())),
        object_keys: Arc::new(ObjectKeyMap::digital_files()),
        notifier: Arc::new(EmailService::new(
            config.resend_api_key.clone(),
            config.email_from.clone(),
            config.public_base_url.clone(),
        )),
        download_worker_url: config.download_worker_url.clone(),
    };

    if cli.list_pending {
        list_pending(&state);
        return;
    }

    if let Some(ref session_id) = cli.retry_fulfillment {
        let ok = run_retry(&state, session_id).await;
        std::process::exit(if ok { 0 } else { 1 });
    }

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set FULFILLMENT_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Fulfillment server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        let db_path = &config.database_path;
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        // Also remove WAL and SHM files if they exist
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
