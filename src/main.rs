use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    http::{HeaderName, StatusCode},
};
use tower::{BoxError, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use convention_registration_service::{
    create_router,
    services::{
        clock::SystemClock,
        database::create_csv_store,
        storage::JsonFileStore,
    },
    models::common::CLIENT_ID_HEADER,
    AppConfig, AppState, RemoteStore, StoreBackend, SupabaseAuth, SupabaseClient,
};

// Error handler
async fn handle_error(error: BoxError) -> (StatusCode, String) {
    if error.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            "Request took too long".to_string(),
        )
    } else if error.is::<tower::load_shed::error::Overloaded>() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service is overloaded, try again later".to_string(),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unhandled internal error: {}", error),
        )
    }
}

#[tokio::main]
async fn main() {
    // Load .env if present
    dotenv::dotenv().ok();

    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env().expect("Invalid configuration");

    if config.is_production {
        info!("Running in PRODUCTION mode - restricting available endpoints");
    } else {
        info!("Running in DEVELOPMENT mode - all endpoints will be available");
    }

    // Initialize the registration store
    let store: Arc<dyn RemoteStore> = match &config.backend {
        StoreBackend::Supabase {
            url,
            publishable_key,
            table,
        } => {
            let auth = SupabaseAuth::new(publishable_key.as_str());
            if auth.is_legacy_jwt() {
                warn!("SUPABASE_PUBLISHABLE_KEY looks like a legacy anon JWT");
            }
            info!("Using hosted table '{}' at {} (key {})", table, url, auth.masked_key());

            let client = SupabaseClient::new(url, auth, table, config.remote_timeout)
                .expect("Failed to build database client");
            Arc::new(client)
        }
        StoreBackend::Csv { path } => {
            info!("Running in simulation mode: registrations will be stored in CSV only");
            create_csv_store(path.as_deref()).expect("Failed to initialize CSV store")
        }
    };

    // Reachability is only reported; the service still starts
    match store.ping().await {
        Ok(()) => info!("Registration store is reachable"),
        Err(e) => warn!("Registration store is not reachable yet: {}", e),
    }

    let limits = JsonFileStore::new(&config.rate_limit_store_path)
        .expect("Failed to initialize rate limit store");
    info!(
        "Rate limit: {} attempts per {:?}, state in {}",
        config.rate_limit.max_attempts, config.rate_limit.window, config.rate_limit_store_path
    );

    // Create shared application state
    let app_state = Arc::new(AppState::new(
        store,
        Arc::new(limits),
        Arc::new(SystemClock),
        config.rate_limit.clone(),
        config.form_settings(),
    ));

    // Expired windows of clients that never came back are swept periodically
    let sweeper_state = Arc::clone(&app_state);
    let sweep_every = config.rate_limit.window.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            match sweeper_state.purge_expired_limits() {
                Ok(0) => {}
                Ok(removed) => debug!("Purged {} expired rate limit windows", removed),
                Err(e) => warn!("Failed to purge expired rate limit windows: {}", e),
            }
        }
    });

    // Create router with appropriate routes based on environment
    let app = create_router(app_state, config.is_production).layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_error))
            .load_shed()
            .concurrency_limit(64)
            .timeout(Duration::from_secs(30))
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_headers(Any)
                    .allow_methods(Any)
                    .expose_headers([HeaderName::from_static(CLIENT_ID_HEADER)]),
            ),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Server listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // Set up signal handler for graceful shutdown
    let shutdown = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received interrupt signal, starting graceful shutdown");
            },
            _ = terminate => {
                info!("Received terminate signal, starting graceful shutdown");
            },
        }
    };

    // Start server with graceful shutdown
    info!("Server is ready to accept connections");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Failed to start server");

    info!("Server has been gracefully shut down");
}
