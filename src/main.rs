use dotenvy::dotenv;
use ernit_core::{
    api::{AppState, app_router},
    config::{self, HINT_API_KEY_ENV, database},
    core::{
        engine::GoalEngine,
        events::EventBus,
        hints::{HintCache, HintGenerator, HttpHintGenerator, StaticHintGenerator},
        notify::{DbNotifier, Notifier},
        payment::PaymentProcessor,
        timer::SessionTimers,
    },
    errors::Result,
};
use std::{env, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const TICK_PERIOD: Duration = Duration::from_secs(1);

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load the application configuration
    let app_config = config::load_default_config()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;

    // 4. Initialize the database
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db).await?;
    info!("Database initialized successfully.");

    // 5. Wire the side channels
    let generator: Arc<dyn HintGenerator> = match &app_config.hints.generator_url {
        Some(url) => Arc::new(HttpHintGenerator::new(
            url,
            env::var(HINT_API_KEY_ENV).ok(),
            Duration::from_secs(app_config.hints.request_timeout_seconds),
        )?),
        None => {
            warn!("No hint generator configured, serving the fallback hint");
            Arc::new(StaticHintGenerator::new(app_config.hints.fallback_text.clone()))
        }
    };
    let notifier: Arc<dyn Notifier> = Arc::new(DbNotifier::new(db.clone()));
    let events = EventBus::new(app_config.server.event_capacity);

    let timers = SessionTimers::new();
    let running = timers.hydrate(&db, chrono::Utc::now()).await?;
    info!(running, "Session timers hydrated");
    let ticker = timers.spawn_ticker(TICK_PERIOD);

    let engine = GoalEngine::new(
        db.clone(),
        app_config.progression,
        HintCache::new(db.clone(), generator, &app_config.hints),
        Arc::clone(&notifier),
        events,
        timers,
    );

    // The webhook secret is loaded directly before use, never stored in AppConfig
    let secret = config::webhook_secret().inspect_err(|e| error!("{}", e))?;
    let payments = PaymentProcessor::new(db, notifier, secret, app_config.payments);

    // 6. Serve
    let router = app_router(Arc::new(AppState { engine, payments }));
    let listener = tokio::net::TcpListener::bind(&app_config.server.bind_address).await?;
    info!("Listening on {}", app_config.server.bind_address);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ticker.abort();
    Ok(())
}
