//! Code allocation
//!
//! Claims codes from the pool (or takes a caller-chosen one) and binds each to
//! a destination. A pool claim is at-most-once: a code whose binding write
//! fails stays taken and is simply missing from the result.

pub mod error;
pub mod request;

pub use error::AllocationError;
pub use request::{ClaimMode, ClaimRequest};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{AllocationConfig, CustomCodePolicy};
use crate::models::{build_short_url, NewBinding};
use crate::storage::{with_timeout, Storage, StorageError};

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Result of a claim that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Binding id to fully qualified short URL
    Allocated(BTreeMap<i64, String>),
    /// The pool had nothing available; no bindings were written
    EmptyPool,
}

pub struct Allocator {
    storage: Arc<dyn Storage>,
    config: AllocationConfig,
    store_timeout: Duration,
}

impl Allocator {
    pub fn new(storage: Arc<dyn Storage>, config: AllocationConfig, store_timeout: Duration) -> Self {
        Self {
            storage,
            config,
            store_timeout,
        }
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    pub async fn claim(&self, request: ClaimRequest) -> Result<ClaimOutcome, AllocationError> {
        let destination = request.validate(self.config.max_claim_count)?;

        let now = chrono::Utc::now().timestamp();
        let template = self.binding_template(&request, destination.as_str(), now);

        match request.mode {
            ClaimMode::Custom => self.claim_custom(&request, template, now).await,
            ClaimMode::Unique | ClaimMode::Generic => {
                self.claim_from_pool(&request, template).await
            }
        }
    }

    fn binding_template(&self, request: &ClaimRequest, destination: &str, now: i64) -> NewBinding {
        let domain = match request.domain.as_deref().map(str::trim) {
            Some(domain) if !domain.is_empty() => domain.to_string(),
            _ => self.config.default_domain.clone(),
        };

        NewBinding {
            long_url: destination.to_string(),
            code: String::new(),
            expires_at: now.saturating_add(i64::from(request.expiry_days) * SECS_PER_DAY),
            domain,
            sender_id: request.sender_id.trim().to_string(),
            created_by: request.owner.clone(),
            campaign_name: request.campaign.clone(),
        }
    }

    async fn claim_custom(
        &self,
        request: &ClaimRequest,
        mut binding: NewBinding,
        now: i64,
    ) -> Result<ClaimOutcome, AllocationError> {
        binding.code = request.custom_code.clone().unwrap_or_default();

        let written = match self.config.custom_code_policy {
            CustomCodePolicy::Allow => {
                with_timeout(self.store_timeout, self.storage.insert_binding(&binding)).await
            }
            CustomCodePolicy::Reject => {
                with_timeout(
                    self.store_timeout,
                    self.storage.insert_binding_exclusive(&binding, now),
                )
                .await
            }
        };

        let row = match written {
            Ok(row) => row,
            Err(StorageError::Conflict) => {
                return Err(AllocationError::validation("Shortcode already in use"))
            }
            Err(e) => {
                warn!(short_code = %binding.code, error = %e, "Failed to write custom binding");
                return Err(AllocationError::BindingWrite(e));
            }
        };

        info!(short_code = %row.code, binding_id = row.id, "Custom code bound");

        let mut allocated = BTreeMap::new();
        allocated.insert(row.id, row.short_url());
        Ok(ClaimOutcome::Allocated(allocated))
    }

    async fn claim_from_pool(
        &self,
        request: &ClaimRequest,
        template: NewBinding,
    ) -> Result<ClaimOutcome, AllocationError> {
        let entries = with_timeout(self.store_timeout, self.storage.claim_codes(request.count))
            .await
            .map_err(|e| {
                warn!(mode = %request.mode, error = %e, "Pool claim failed");
                AllocationError::PoolClaim(e)
            })?;

        if entries.is_empty() {
            info!(mode = %request.mode, requested = request.count, "Code pool is empty");
            return Ok(ClaimOutcome::EmptyPool);
        }

        let claimed = entries.len();
        let mut allocated = BTreeMap::new();
        let mut last_error = None;

        for entry in entries {
            let binding = NewBinding {
                code: entry.code,
                ..template.clone()
            };

            match with_timeout(self.store_timeout, self.storage.insert_binding(&binding)).await {
                Ok(row) => {
                    allocated.insert(
                        row.id,
                        build_short_url(&row.domain, &row.sender_id, &row.code),
                    );
                }
                Err(e) => {
                    // The code stays taken; it is never handed out twice.
                    warn!(short_code = %binding.code, error = %e, "Binding write failed, code is consumed");
                    last_error = Some(e);
                }
            }
        }

        info!(
            mode = %request.mode,
            requested = request.count,
            claimed,
            bound = allocated.len(),
            "Codes allocated"
        );

        match (allocated.is_empty(), last_error) {
            (true, Some(e)) => Err(AllocationError::BindingWrite(e)),
            _ => Ok(ClaimOutcome::Allocated(allocated)),
        }
    }
}
