use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::analytics::{ClickRecorder, Visit};
use crate::models::Binding;
use crate::storage::{with_timeout, Storage, StorageError};

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Never bound, expired and disabled all look the same to the visitor
    #[error("short URL not found or expired")]
    NotFound,
    #[error("binding lookup failed: {0}")]
    Store(#[from] StorageError),
}

/// Resolves codes to destinations and hands visits to the click recorder
pub struct Redirector {
    storage: Arc<dyn Storage>,
    recorder: ClickRecorder,
    store_timeout: Duration,
}

impl Redirector {
    pub fn new(storage: Arc<dyn Storage>, recorder: ClickRecorder, store_timeout: Duration) -> Self {
        Self {
            storage,
            recorder,
            store_timeout,
        }
    }

    /// The newest active binding for `code`
    pub async fn resolve(&self, code: &str) -> Result<Binding, ResolveError> {
        self.resolve_at(code, chrono::Utc::now().timestamp()).await
    }

    pub async fn resolve_at(&self, code: &str, now: i64) -> Result<Binding, ResolveError> {
        with_timeout(self.store_timeout, self.storage.find_active_binding(code, now))
            .await?
            .ok_or(ResolveError::NotFound)
    }

    /// Queue one click for `binding`. Never blocks and never fails.
    pub fn track(&self, binding: &Binding, client_ip: IpAddr, device: String) {
        self.recorder.record(Visit {
            binding_id: binding.id,
            code: binding.code.clone(),
            client_ip,
            device,
            visited_at: chrono::Utc::now().timestamp(),
        });
    }
}
