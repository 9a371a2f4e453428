use std::sync::Arc;

use moka::sync::Cache;

use crate::engine::ReconciliationEngine;
use crate::models::LoginState;
use crate::registry::ProviderRegistry;
use crate::session::CacheSessionService;

/// Shared application state
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub engine: Arc<ReconciliationEngine>,
    pub sessions: Arc<CacheSessionService>,

    /// Pending authorization state, keyed by the opaque `state` parameter.
    /// Short TTL; a callback consumes its entry exactly once.
    pub login_states: Cache<String, LoginState>,

    /// Externally reachable base URL, callback URLs are derived from it.
    pub base_url: String,

    /// Redirect target after a successful login.
    pub post_login_url: String,
}

impl AppState {
    /// The redirect URI for a (realm, driver) pair. Must be byte-identical
    /// between the authorization request and the code exchange.
    pub fn callback_url(&self, realm: &str, driver: &str) -> String {
        callback_url(&self.base_url, realm, driver)
    }
}

/// Derive the callback route for a (realm, driver) pair from the base URL.
pub fn callback_url(base_url: &str, realm: &str, driver: &str) -> String {
    format!(
        "{}/auth/{}/{}/callback",
        base_url.trim_end_matches('/'),
        realm,
        driver,
    )
}
