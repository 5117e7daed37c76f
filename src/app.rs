//! Wiring shared by the server binary and the HTTP tests

use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::allocator::Allocator;
use crate::analytics::{ClickRecorder, GeoLocator, RecorderSettings};
use crate::api::{create_api_router, AppState};
use crate::auth::AuthService;
use crate::config::Config;
use crate::redirect::{create_redirect_router, RedirectState, Redirector};
use crate::storage::{CachedStorage, Storage};

/// Long-lived components built once at start-up
pub struct Services {
    pub storage: Arc<dyn Storage>,
    pub allocator: Arc<Allocator>,
    pub redirector: Arc<Redirector>,
    pub recorder: ClickRecorder,
    pub auth: Arc<AuthService>,
}

impl Services {
    /// Wrap `storage` in the binding cache (unless disabled) and start the click recorder.
    ///
    /// Must run inside a tokio runtime.
    pub fn build(config: &Config, storage: Arc<dyn Storage>, geo: Arc<dyn GeoLocator>) -> Self {
        let storage: Arc<dyn Storage> = if config.cache.binding_ttl_secs > 0 {
            info!(
                ttl_secs = config.cache.binding_ttl_secs,
                max_entries = config.cache.max_entries,
                "Binding cache enabled"
            );
            Arc::new(CachedStorage::new(
                storage,
                config.cache.max_entries,
                config.cache.binding_ttl_secs,
            ))
        } else {
            storage
        };

        let store_timeout = config.store_timeout();
        let recorder = ClickRecorder::spawn(
            Arc::clone(&storage),
            geo,
            RecorderSettings::from_config(&config.analytics, store_timeout),
        );

        let allocator = Arc::new(Allocator::new(
            Arc::clone(&storage),
            config.allocation.clone(),
            store_timeout,
        ));
        let redirector = Arc::new(Redirector::new(
            Arc::clone(&storage),
            recorder.clone(),
            store_timeout,
        ));
        let auth = Arc::new(AuthService::new(&config.auth));

        Self {
            storage,
            allocator,
            redirector,
            recorder,
            auth,
        }
    }

    /// Drain pending clicks, then close the pool
    pub async fn shutdown(&self) {
        self.recorder.shutdown().await;
        self.storage.close().await;
    }
}

/// The complete HTTP surface
pub fn build_router(config: &Config, services: &Services) -> Router {
    let api_state = Arc::new(AppState {
        allocator: Arc::clone(&services.allocator),
        auth: Arc::clone(&services.auth),
        storage: Arc::clone(&services.storage),
        store_timeout: config.store_timeout(),
    });
    let redirect_state = Arc::new(RedirectState {
        redirector: Arc::clone(&services.redirector),
        analytics_config: config.analytics.clone(),
    });

    create_api_router(api_state)
        .merge(create_redirect_router(redirect_state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
