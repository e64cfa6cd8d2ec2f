//! Credential storage and the refresh seam
//!
//! A handle's credentials live in a [`CredentialStore`] so they can be
//! replaced at runtime. When a call fails with an auth classification, the
//! orchestrator passes the store to the service's refresher; a successful
//! refresh swaps the values in place, and the immediate retry reads the
//! fresh ones through the same handle. The seam is a trait object so each
//! provider can plug in its own token exchange without this crate knowing
//! about OAuth flows.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::validation::EnvRequirements;

/// Mutable credential map shared between a handle and its refresher
#[derive(Debug, Default)]
pub struct CredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl CredentialStore {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values: RwLock::new(values) }
    }

    /// Current value for a key
    pub fn get(&self, key: &str) -> Option<String> {
        match self.values.read() {
            Ok(guard) => guard.get(key).cloned(),
            Err(poisoned) => {
                warn!("credential store lock poisoned");
                poisoned.into_inner().get(key).cloned()
            }
        }
    }

    /// Replace the whole map with freshly derived values
    pub fn replace(&self, values: HashMap<String, String>) {
        match self.values.write() {
            Ok(mut guard) => *guard = values,
            Err(poisoned) => {
                warn!("credential store lock poisoned");
                *poisoned.into_inner() = values;
            }
        }
    }

    /// Copy of the current map
    pub fn snapshot(&self) -> HashMap<String, String> {
        match self.values.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                warn!("credential store lock poisoned");
                poisoned.into_inner().clone()
            }
        }
    }
}

/// Re-derives credentials for a service after an auth failure
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Attempt a refresh against the handle's store; `true` means the
    /// store now holds working values and the original call should be
    /// retried once immediately
    async fn refresh(&self, store: &CredentialStore) -> bool;
}

/// Refresher for services whose credentials cannot be renewed at runtime
///
/// Always reports failure, so auth errors surface to the caller without a
/// pointless retry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRefresh;

#[async_trait]
impl CredentialRefresher for NoRefresh {
    async fn refresh(&self, _store: &CredentialStore) -> bool {
        false
    }
}

/// Refresher that re-reads credentials from the process environment
///
/// Suits deployments where an external agent rotates credentials in place:
/// the refresh re-collects the required keys, and only a set that
/// validates again replaces the store contents.
#[derive(Debug, Clone)]
pub struct EnvRefresher {
    requirements: EnvRequirements,
}

impl EnvRefresher {
    pub fn new(requirements: EnvRequirements) -> Self {
        Self { requirements }
    }
}

#[async_trait]
impl CredentialRefresher for EnvRefresher {
    async fn refresh(&self, store: &CredentialStore) -> bool {
        let values = self.requirements.from_process_env();
        match self.requirements.validate(&values) {
            Ok(()) => {
                debug!("credential refresh succeeded from environment");
                store.replace(values);
                true
            }
            Err(e) => {
                warn!(error = %e, "credential refresh failed validation");
                false
            }
        }
    }
}
