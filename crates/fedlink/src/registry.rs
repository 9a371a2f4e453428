use std::collections::HashMap;
use std::sync::Arc;

use fedlink_core::FederationError;

use crate::providers::IdProvider;

/// Maps (realm, driver) to a configured provider adapter.
///
/// Built explicitly at startup and then shared read-only behind an `Arc`;
/// there is no process-global registry. Registration is additive and
/// last-write-wins per key.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<(String, String), Arc<dyn IdProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, realm: &str, provider: Arc<dyn IdProvider>) {
        let key = (realm.to_string(), provider.driver().to_string());
        self.providers.insert(key, provider);
    }

    /// Pure lookup, no side effects. An unknown pair is a user-facing
    /// not-found, never a crash.
    pub fn resolve(
        &self,
        realm: &str,
        driver: &str,
    ) -> Result<Arc<dyn IdProvider>, FederationError> {
        self.providers
            .get(&(realm.to_string(), driver.to_string()))
            .cloned()
            .ok_or_else(|| FederationError::UnknownProvider {
                realm: realm.to_string(),
                driver: driver.to_string(),
            })
    }

    /// Registered driver names for a realm, sorted for stable output.
    pub fn drivers(&self, realm: &str) -> Vec<String> {
        let mut drivers: Vec<String> = self
            .providers
            .keys()
            .filter(|(r, _)| r == realm)
            .map(|(_, d)| d.clone())
            .collect();
        drivers.sort();
        drivers
    }
}
