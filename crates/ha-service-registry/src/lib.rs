//! Service registry with async handlers
//!
//! Services are registered per domain and called with a [`ServiceCall`]. A
//! service registered through [`ServiceRegistry::register_admin`] only runs
//! when the calling context belongs to an administrator or to the system
//! itself (no user).

use dashmap::DashMap;
use ha_core::{Context, ServiceCall};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result type for service calls
pub type ServiceResult = Result<Option<serde_json::Value>, ServiceError>;

/// Future type for async service handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Service handler function type
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

/// Answers whether a user id belongs to an administrator
pub type AdminLookup = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Errors that can occur when working with services
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("user {user_id} is not allowed to call {domain}.{service}")]
    Unauthorized {
        domain: String,
        service: String,
        user_id: String,
    },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),
}

/// Information about a registered service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    /// Domain the service belongs to
    pub domain: String,
    /// Service name
    pub service: String,
    /// Only administrators (or the system) may call it
    pub admin_only: bool,
}

struct RegisteredService {
    handler: ServiceHandler,
    description: ServiceDescription,
}

/// The service registry manages all registered services
pub struct ServiceRegistry {
    /// Services indexed by "domain.service" key
    services: DashMap<String, RegisteredService>,
    admin_lookup: RwLock<Option<AdminLookup>>,
}

impl ServiceRegistry {
    /// Create a new empty service registry
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            admin_lookup: RwLock::new(None),
        }
    }

    /// Install the lookup used by admin-only services
    ///
    /// Without a lookup every user is treated as a non-admin.
    pub fn set_admin_lookup<F>(&self, lookup: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.admin_lookup.write() {
            *slot = Some(Arc::new(lookup));
        }
    }

    /// Register a new service
    #[instrument(skip(self, domain, service, handler))]
    pub fn register<F, Fut>(&self, domain: impl Into<String>, service: impl Into<String>, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        self.insert(domain.into(), service.into(), false, handler);
    }

    /// Register a service only administrators may call
    #[instrument(skip(self, domain, service, handler))]
    pub fn register_admin<F, Fut>(
        &self,
        domain: impl Into<String>,
        service: impl Into<String>,
        handler: F,
    ) where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        self.insert(domain.into(), service.into(), true, handler);
    }

    fn insert<F, Fut>(&self, domain: String, service: String, admin_only: bool, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let key = format!("{}.{}", domain, service);

        debug!(domain = %domain, service = %service, admin_only, "Registering service");

        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);

        self.services.insert(
            key,
            RegisteredService {
                handler,
                description: ServiceDescription {
                    domain,
                    service,
                    admin_only,
                },
            },
        );
    }

    fn is_admin(&self, user_id: &str) -> bool {
        self.admin_lookup
            .read()
            .ok()
            .and_then(|lookup| lookup.as_ref().map(|f| f(user_id)))
            .unwrap_or(false)
    }

    /// Call a service
    #[instrument(skip(self, service_data, context))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        service_data: serde_json::Value,
        context: Context,
    ) -> ServiceResult {
        let key = format!("{}.{}", domain, service);

        let (handler, admin_only) = {
            let registered = self.services.get(&key).ok_or_else(|| {
                warn!(domain = %domain, service = %service, "Service not found");
                ServiceError::NotFound {
                    domain: domain.to_string(),
                    service: service.to_string(),
                }
            })?;
            (registered.handler.clone(), registered.description.admin_only)
        };

        if admin_only {
            if let Some(user_id) = context.user_id.as_deref() {
                if !self.is_admin(user_id) {
                    warn!(domain = %domain, service = %service, user_id = %user_id, "Unauthorized service call");
                    return Err(ServiceError::Unauthorized {
                        domain: domain.to_string(),
                        service: service.to_string(),
                        user_id: user_id.to_string(),
                    });
                }
            }
        }

        let call = ServiceCall::new(domain, service, service_data, context);

        debug!(domain = %domain, service = %service, "Calling service");
        handler(call).await
    }

    /// Check if a service exists
    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        let key = format!("{}.{}", domain, service);
        self.services.contains_key(&key)
    }

    /// Get service description
    pub fn get_service(&self, domain: &str, service: &str) -> Option<ServiceDescription> {
        let key = format!("{}.{}", domain, service);
        self.services.get(&key).map(|s| s.description.clone())
    }

    /// Get all services for a domain
    pub fn domain_services(&self, domain: &str) -> Vec<ServiceDescription> {
        self.services
            .iter()
            .filter(|s| s.description.domain == domain)
            .map(|s| s.description.clone())
            .collect()
    }

    /// Unregister a service
    #[instrument(skip(self))]
    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        let key = format!("{}.{}", domain, service);
        let removed = self.services.remove(&key).is_some();

        if removed {
            debug!(domain = %domain, service = %service, "Unregistered service");
        }

        removed
    }

    /// Get total number of registered services
    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
