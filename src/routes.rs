use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tracing::info;

use crate::handlers::api::{
    registration_status, reset_rate_limit, submit_registration, validate_registration, AppState,
};
use crate::handlers::test::health_check;

pub fn create_router(app_state: Arc<AppState>, is_production: bool) -> Router {
    let mut router = Router::new();

    // Health check is always available
    let health_route = Router::new().route("/health", get(health_check));
    router = router.merge(health_route);

    // Registration endpoints are always available
    let registration_routes = Router::new()
        .route("/registrations", post(submit_registration))
        .route("/registrations/status", get(registration_status));
    router = router.merge(registration_routes);

    // Only add developer tooling if not in production mode
    if !is_production {
        let dev_routes = Router::new()
            .route("/registrations/validate", post(validate_registration))
            .route("/registrations/rate-limit", delete(reset_rate_limit));

        router = router.merge(dev_routes);

        info!("Developer routes enabled - server running in development mode");
    } else {
        info!("Running in production mode - only registration and health endpoints exposed");
    }

    router.with_state(app_state)
}
