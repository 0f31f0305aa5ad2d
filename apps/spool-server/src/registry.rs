use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;

/// One `(tenant, serial)` pair from the configuration source. A serial may
/// appear under several tenants and a tenant may span several serials.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Binding {
    #[serde(alias = "restaurantId")]
    pub tenant: String,
    pub serial: String,
}

#[derive(Default)]
struct RegistryMap {
    tenants_by_serial: HashMap<String, Vec<String>>,
    serials_by_tenant: HashMap<String, Vec<String>>,
    // Insertion order of serials from the configuration source, kept for
    // stable listings.
    serial_order: Vec<String>,
}

/// Maps physical device serials to the ordered tenant lists they serve.
/// Reads happen on every printer poll; writes only on configuration
/// refresh. The round-robin cursors live in the job store, under the lock
/// that serializes selection.
pub struct DeviceRegistry {
    inner: RwLock<RegistryMap>,
}

impl DeviceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(RegistryMap::default()),
        })
    }

    /// Ordered tenant list for a serial; empty when the serial is unknown.
    pub async fn tenants_for(&self, serial: &str) -> Vec<String> {
        let guard = self.inner.read().await;
        guard
            .tenants_by_serial
            .get(serial)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn serials_for(&self, tenant: &str) -> Vec<String> {
        let guard = self.inner.read().await;
        guard
            .serials_by_tenant
            .get(tenant)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn contains_tenant(&self, tenant: &str) -> bool {
        let guard = self.inner.read().await;
        guard.serials_by_tenant.contains_key(tenant)
    }

    /// All configured serials with their tenant lists, in configuration
    /// source order.
    pub async fn snapshot(&self) -> Vec<(String, Vec<String>)> {
        let guard = self.inner.read().await;
        guard
            .serial_order
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    guard.tenants_by_serial.get(s).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Atomically swap the full mapping. Returns the number of bindings
    /// applied.
    pub async fn replace_all(&self, bindings: &[Binding]) -> usize {
        let mut next = RegistryMap::default();
        let mut applied = 0usize;
        for binding in bindings {
            if binding.tenant.is_empty() || binding.serial.is_empty() {
                continue;
            }
            if !next.tenants_by_serial.contains_key(&binding.serial) {
                next.serial_order.push(binding.serial.clone());
            }
            let tenants = next
                .tenants_by_serial
                .entry(binding.serial.clone())
                .or_default();
            if tenants.contains(&binding.tenant) {
                continue;
            }
            tenants.push(binding.tenant.clone());
            next.serials_by_tenant
                .entry(binding.tenant.clone())
                .or_default()
                .push(binding.serial.clone());
            applied += 1;
        }

        let mut guard = self.inner.write().await;
        *guard = next;
        applied
    }
}
