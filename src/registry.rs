//! Explicit service registry
//!
//! The registry owns one [`ServiceHandle`] per service id and hands out
//! `Arc` references. It is constructed at the composition root and passed
//! to whoever needs it; there is no process-global instance. Handles are
//! built lazily with double-checked locking: concurrent first callers race
//! on a read miss, but only one constructs, and a construction failure
//! publishes nothing so a corrected configuration can succeed later.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::classify::ProviderError;
use crate::client::{ServiceHandle, ServiceSpec};
use crate::error::{InvokeError, InvokeResult};

/// Registry of per-service client handles
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    specs: Mutex<HashMap<String, ServiceSpec>>,
    handles: RwLock<HashMap<String, Arc<ServiceHandle>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the blueprint for a service
    ///
    /// Replacing a blueprint does not invalidate an already-built handle;
    /// use [`ServiceRegistry::evict`] first when a rebuild is wanted.
    pub fn register(&self, spec: ServiceSpec) {
        let service = spec.service().to_string();
        debug!(service = %service, "registering service blueprint");
        match self.specs.lock() {
            Ok(mut guard) => {
                guard.insert(service, spec);
            }
            Err(poisoned) => {
                warn!("registry spec lock poisoned");
                poisoned.into_inner().insert(service, spec);
            }
        }
    }

    /// Get the shared handle for a service, building it on first use
    ///
    /// All callers receive clones of the same `Arc`; the handle (and the
    /// limiter and breaker inside it) is shared process-wide through this
    /// registry.
    pub fn handle(&self, service: &str) -> InvokeResult<Arc<ServiceHandle>> {
        if let Some(handle) = self.read_handles(|handles| handles.get(service).cloned()) {
            return Ok(handle);
        }

        let mut handles = match self.handles.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("registry handle lock poisoned");
                poisoned.into_inner()
            }
        };

        // Another caller may have built the handle while we waited
        if let Some(handle) = handles.get(service) {
            return Ok(Arc::clone(handle));
        }

        let spec = self
            .with_spec(service, |spec| spec.clone())
            .ok_or_else(|| InvokeError::unknown_service(service))?;

        let handle = Arc::new(spec.build()?);
        debug!(service = %service, "service handle constructed");
        handles.insert(service.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Build an independent handle outside the cache
    ///
    /// The returned handle shares nothing with the registry's copy; meant
    /// for tests that need isolated limiter or breaker state.
    pub fn force_new_instance(&self, service: &str) -> InvokeResult<Arc<ServiceHandle>> {
        let spec = self
            .with_spec(service, |spec| spec.clone())
            .ok_or_else(|| InvokeError::unknown_service(service))?;
        Ok(Arc::new(spec.build()?))
    }

    /// Drop a cached handle so the next access rebuilds it
    pub fn evict(&self, service: &str) -> bool {
        match self.handles.write() {
            Ok(mut guard) => guard.remove(service).is_some(),
            Err(poisoned) => {
                warn!("registry handle lock poisoned");
                poisoned.into_inner().remove(service).is_some()
            }
        }
    }

    /// Whether a handle has been built for this service
    pub fn is_built(&self, service: &str) -> bool {
        self.read_handles(|handles| handles.contains_key(service))
    }

    /// Invoke an operation through the service's shared handle
    pub async fn invoke<T, F, Fut>(
        &self,
        service: &str,
        operation: &str,
        deadline: Duration,
        op: F,
    ) -> InvokeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let handle = self.handle(service)?;
        handle.invoke(operation, deadline, op).await
    }

    fn read_handles<R>(&self, f: impl FnOnce(&HashMap<String, Arc<ServiceHandle>>) -> R) -> R {
        match self.handles.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => {
                warn!("registry handle lock poisoned");
                f(&poisoned.into_inner())
            }
        }
    }

    fn with_spec<R>(&self, service: &str, f: impl FnOnce(&ServiceSpec) -> R) -> Option<R> {
        match self.specs.lock() {
            Ok(guard) => guard.get(service).map(f),
            Err(poisoned) => {
                warn!("registry spec lock poisoned");
                poisoned.into_inner().get(service).map(f)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::validation::EnvRequirements;

    use super::*;

    /// Validates the shared-instance property: repeated lookups return the
    /// same allocation.
    #[test]
    fn test_handle_is_shared() {
        let registry = ServiceRegistry::new();
        registry.register(ServiceSpec::new("crm"));

        let a = registry.handle("crm").unwrap();
        let b = registry.handle("crm").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    /// Validates that distinct services get distinct handles.
    #[test]
    fn test_services_are_isolated() {
        let registry = ServiceRegistry::new();
        registry.register(ServiceSpec::new("crm"));
        registry.register(ServiceSpec::new("scheduling"));

        let a = registry.handle("crm").unwrap();
        let b = registry.handle("scheduling").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.service(), "scheduling");
    }

    /// Validates the unknown-service error path.
    #[test]
    fn test_unknown_service() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            registry.handle("nope").unwrap_err(),
            InvokeError::UnknownService { .. }
        ));
    }

    /// Validates that a failed construction is not cached: after the
    /// blueprint is corrected, the next lookup succeeds.
    #[test]
    fn test_validation_failure_not_cached() {
        let registry = ServiceRegistry::new();
        registry.register(
            ServiceSpec::new("crm").requirements(EnvRequirements::new().require("CRM_API_KEY")),
        );

        let err = registry.handle("crm").unwrap_err();
        assert!(matches!(err, InvokeError::Configuration { .. }));
        assert!(!registry.is_built("crm"));

        registry.register(
            ServiceSpec::new("crm")
                .requirements(EnvRequirements::new().require("CRM_API_KEY"))
                .credential("CRM_API_KEY", "sk-123"),
        );
        let handle = registry.handle("crm").unwrap();
        assert_eq!(handle.credential("CRM_API_KEY").as_deref(), Some("sk-123"));
    }

    /// Validates force_new_instance: a fresh allocation each time, cache
    /// untouched.
    #[test]
    fn test_force_new_instance_is_independent() {
        let registry = ServiceRegistry::new();
        registry.register(ServiceSpec::new("crm"));

        let cached = registry.handle("crm").unwrap();
        let fresh = registry.force_new_instance("crm").unwrap();
        assert!(!Arc::ptr_eq(&cached, &fresh));

        let again = registry.handle("crm").unwrap();
        assert!(Arc::ptr_eq(&cached, &again), "cache must keep the original");
    }

    /// Validates eviction: the next lookup rebuilds a new allocation.
    #[test]
    fn test_evict_forces_rebuild() {
        let registry = ServiceRegistry::new();
        registry.register(ServiceSpec::new("crm"));

        let before = registry.handle("crm").unwrap();
        assert!(registry.evict("crm"));
        assert!(!registry.evict("crm"));

        let after = registry.handle("crm").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
