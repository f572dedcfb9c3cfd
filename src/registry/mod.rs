// Registry module - Service discovery registration contract

use crate::error::{ForemanError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Descriptor of a running service as published to a discovery backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name (unique within the application)
    pub name: String,
    /// Address scheme, e.g. `tcp`, `http`, `grpc`
    pub scheme: String,
    /// Listening address, e.g. `0.0.0.0:8080`
    pub address: String,
    /// Component kind the service belongs to
    pub kind: String,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        scheme: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            scheme: scheme.into(),
            address: address.into(),
            kind: "server".to_string(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// `scheme://address`
    pub fn label(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }
}

/// Discovery backend the orchestrator publishes running services to
///
/// Failures are never fatal to the orchestrator: they are logged and startup
/// or shutdown proceeds.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn register(&self, info: &ServiceInfo) -> Result<()>;
    async fn unregister(&self, info: &ServiceInfo) -> Result<()>;
}

#[async_trait]
impl<R: Registry + ?Sized> Registry for Arc<R> {
    async fn register(&self, info: &ServiceInfo) -> Result<()> {
        (**self).register(info).await
    }

    async fn unregister(&self, info: &ServiceInfo) -> Result<()> {
        (**self).unregister(info).await
    }
}

/// Registry that accepts everything and publishes nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistry;

#[async_trait]
impl Registry for NoopRegistry {
    async fn register(&self, _info: &ServiceInfo) -> Result<()> {
        Ok(())
    }

    async fn unregister(&self, _info: &ServiceInfo) -> Result<()> {
        Ok(())
    }
}

/// In-process registry keyed by service name
///
/// Useful for single-node deployments and for observing registration order.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    services: Mutex<HashMap<String, ServiceInfo>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a registered service by name
    pub fn get(&self, name: &str) -> Option<ServiceInfo> {
        self.lock().get(name).cloned()
    }

    /// Names of all currently registered services
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ServiceInfo>> {
        // A poisoned map is still a valid map
        self.services.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, info: &ServiceInfo) -> Result<()> {
        let mut services = self.lock();
        if let Some(existing) = services.get(&info.name) {
            if existing.address != info.address {
                return Err(ForemanError::RegistryError(format!(
                    "service {} already registered at {}",
                    info.name,
                    existing.label()
                )));
            }
        }
        services.insert(info.name.clone(), info.clone());
        Ok(())
    }

    async fn unregister(&self, info: &ServiceInfo) -> Result<()> {
        self.lock().remove(&info.name);
        Ok(())
    }
}
