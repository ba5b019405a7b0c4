//! Directory of service instances reachable through a binding.

use std::collections::BTreeMap;

use tracing::debug;

use crate::header::{InstanceId, ServiceId};
use crate::proxy::{ProxyBackend, ServiceProxy};

/// Maps `(service, instance)` to the backend serving it.
///
/// Lookups hand out [`ServiceProxy`] values bound to the instance.
#[derive(Debug)]
pub struct ServiceRegistry<B> {
    entries: BTreeMap<(ServiceId, InstanceId), B>,
}

impl<B: ProxyBackend + Clone> ServiceRegistry<B> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register the backend serving a service instance.
    ///
    /// Returns the backend previously registered for it, if any.
    pub fn offer(&mut self, service_id: ServiceId, instance_id: InstanceId, backend: B) -> Option<B> {
        debug!(service = %service_id, instance = %instance_id, "offering service instance");
        self.entries.insert((service_id, instance_id), backend)
    }

    /// Remove a service instance.
    pub fn withdraw(&mut self, service_id: ServiceId, instance_id: InstanceId) -> Option<B> {
        let removed = self.entries.remove(&(service_id, instance_id));
        if removed.is_some() {
            debug!(service = %service_id, instance = %instance_id, "withdrew service instance");
        }
        removed
    }

    /// Find a proxy for a service instance.
    ///
    /// [`InstanceId::ANY`] matches the lowest registered instance.
    pub fn find(&self, service_id: ServiceId, instance_id: InstanceId) -> Option<ServiceProxy<B>> {
        let (&(service_id, instance_id), backend) = if instance_id.is_any() {
            self.entries
                .range((service_id, InstanceId(0))..=(service_id, InstanceId::ANY))
                .next()?
        } else {
            self.entries.get_key_value(&(service_id, instance_id))?
        };
        Some(ServiceProxy::new(backend.clone(), service_id, instance_id))
    }

    /// All registered instances of a service, in ascending order.
    pub fn instances(&self, service_id: ServiceId) -> Vec<InstanceId> {
        self.entries
            .range((service_id, InstanceId(0))..=(service_id, InstanceId::ANY))
            .map(|((_, instance_id), _)| *instance_id)
            .collect()
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<B: ProxyBackend + Clone> Default for ServiceRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}
