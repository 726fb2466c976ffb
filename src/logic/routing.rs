//! Decides which physical store each entity access targets.
//!
//! `None` means "the branch-scoped store", i.e. whatever branch the request's
//! session has checked out. `Some(StoreId)` means the fixed global store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::VcError;
use crate::logic::registry::VersioningRegistry;
use crate::model::{EntityType, RequestContext};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(pub String);

impl StoreId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct RoutingPolicy {
    registry: Arc<VersioningRegistry>,
    global_store: StoreId,
    default_branch: String,
    enabled: AtomicBool,
}

impl RoutingPolicy {
    pub fn new(
        registry: Arc<VersioningRegistry>,
        global_store: StoreId,
        default_branch: impl Into<String>,
        enabled: bool,
    ) -> Self {
        Self {
            registry,
            global_store,
            default_branch: default_branch.into(),
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn registry(&self) -> &VersioningRegistry {
        &self.registry
    }

    pub fn global_store(&self) -> &StoreId {
        &self.global_store
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Called before schema migrations run; every decision becomes `None`.
    pub fn disable_before_migration(&self) {
        log::info!("branch-aware routing disabled for schema migration");
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn enable_after_migration(&self) {
        log::info!("branch-aware routing re-enabled");
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Disable routing until the returned guard is dropped.
    pub fn suspend_for_migration(&self) -> MigrationGuard<'_> {
        self.disable_before_migration();
        MigrationGuard { policy: self }
    }

    pub fn store_for_read(&self, entity: &EntityType) -> Option<StoreId> {
        if !self.is_enabled() || self.registry.is_versioned(entity) {
            return None;
        }
        Some(self.global_store.clone())
    }

    pub fn store_for_write(
        &self,
        entity: &EntityType,
        ctx: &RequestContext,
    ) -> Result<Option<StoreId>, VcError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        if entity.is_control_model() {
            return Ok(Some(self.global_store.clone()));
        }
        if self.registry.is_versioned(entity) {
            return Ok(None);
        }
        let branch = ctx.active_branch();
        if branch != self.default_branch {
            log::warn!(
                "blocked write of non-versioned model {} on branch '{}'",
                entity,
                branch
            );
            return Err(VcError::PolicyViolation {
                entity: entity.to_string(),
                branch: branch.to_string(),
                required: self.default_branch.clone(),
            });
        }
        Ok(Some(self.global_store.clone()))
    }
}

/// Keeps routing disabled for its lifetime.
#[must_use = "routing is re-enabled as soon as the guard is dropped"]
pub struct MigrationGuard<'a> {
    policy: &'a RoutingPolicy,
}

impl Drop for MigrationGuard<'_> {
    fn drop(&mut self) {
        self.policy.enable_after_migration();
    }
}
