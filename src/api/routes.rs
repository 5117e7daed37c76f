use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::auth::require_api_key;

use super::handlers::{generate, health_check, report, AppState};

pub fn create_api_router(state: Arc<AppState>) -> Router {
    // generate authenticates from its body; report optionally takes the X-API-Key header
    let mut report_routes = Router::new().route("/shorturl/report", post(report));
    if state.auth.reports_protected() {
        report_routes = report_routes.route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.auth),
            require_api_key,
        ));
    }

    Router::new()
        .route("/health", get(health_check))
        .route("/shorturl/generate", post(generate))
        .with_state(Arc::clone(&state))
        .merge(report_routes.with_state(state))
}
