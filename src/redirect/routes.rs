use axum::{routing::get, Router};
use std::sync::Arc;

use super::handlers::{invalid_short_url, redirect_static_path, redirect_url, RedirectState};

/// Paths the API serves with POST. A GET on them is still a code lookup.
pub const API_PATHS: [&str; 2] = ["/shorturl/generate", "/shorturl/report"];

pub fn create_redirect_router(state: Arc<RedirectState>) -> Router {
    let router = API_PATHS.iter().fold(Router::new(), |router, path| {
        router.route(path, get(redirect_static_path))
    });

    router
        .route("/shorturl/", get(invalid_short_url))
        .route("/shorturl/{*path}", get(redirect_url))
        .with_state(state)
}
