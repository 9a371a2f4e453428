pub mod entra;
pub mod generic;
pub mod google;

pub use entra::EntraProvider;
pub use generic::GenericProvider;
pub use google::GoogleProvider;

use async_trait::async_trait;

use fedlink_core::mapping::UserAttributes;
use fedlink_core::{ExternalProfile, FederationError};

/// Per-instance reconciliation policy.
///
/// Defaults mirror the conservative stance: never create accounts unless
/// explicitly enabled, but keep local profile fields in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub auto_create_user: bool,
    pub auto_update_user: bool,
    pub sync_avatar: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        ReconcilePolicy {
            auto_create_user: false,
            auto_update_user: true,
            sync_avatar: true,
        }
    }
}

/// One implementation per external identity provider.
///
/// Adapters own everything provider-shaped: authorization URL construction,
/// the code-for-profile exchange, avatar access, and the attribute mapping
/// into local user fields. The engine only ever sees this trait.
#[async_trait]
pub trait IdProvider: Send + Sync {
    /// Stable driver identifier ("google", "azure", ...).
    fn driver(&self) -> &str;

    fn policy(&self) -> ReconcilePolicy;

    /// Build the OAuth authorization-request URL. Instance scopes and
    /// provider-specific parameters are merged with adapter defaults;
    /// caller-supplied scopes are never dropped.
    fn authorization_url(&self, callback_url: &str, state: &str)
        -> Result<String, FederationError>;

    /// Exchange the callback code for the provider's user profile.
    ///
    /// All network and provider-side failures come back as
    /// `ExchangeFailed`; transport errors never leak raw.
    async fn exchange_code(
        &self,
        http: &reqwest::Client,
        callback_url: &str,
        code: &str,
    ) -> Result<ExternalProfile, FederationError>;

    /// Stable dedup key for the current avatar, or None when the provider
    /// exposes no signal. May require a provider API call (Entra).
    async fn avatar_fingerprint(
        &self,
        http: &reqwest::Client,
        profile: &ExternalProfile,
    ) -> Option<String>;

    /// Best-effort avatar download. Any failure yields None; avatar
    /// problems must never block login.
    async fn fetch_avatar(
        &self,
        http: &reqwest::Client,
        profile: &ExternalProfile,
    ) -> Option<Vec<u8>>;

    /// Map the provider profile to local user attributes (default mapping
    /// plus the instance's optional override strategy).
    fn map_attributes(&self, profile: &ExternalProfile) -> UserAttributes;
}

impl std::fmt::Debug for dyn IdProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdProvider")
            .field("driver", &self.driver())
            .finish()
    }
}

/// Resolved client credentials for one adapter instance.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ProviderCredentials {
    /// Resolution order: explicit in-code setter > per-realm configuration
    /// source > `MisconfiguredProvider`. Checked before any network call.
    pub fn resolve(
        driver: &str,
        explicit_id: Option<String>,
        explicit_secret: Option<String>,
        config_id: Option<String>,
        config_secret: Option<String>,
    ) -> Result<Self, FederationError> {
        let client_id = explicit_id
            .or(config_id)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| FederationError::MisconfiguredProvider {
                driver: driver.to_string(),
                missing: "client id".to_string(),
            })?;

        let client_secret = explicit_secret
            .or(config_secret)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| FederationError::MisconfiguredProvider {
                driver: driver.to_string(),
                missing: "client secret".to_string(),
            })?;

        Ok(ProviderCredentials {
            client_id,
            client_secret,
        })
    }
}

/// Merge adapter default scopes with instance-configured extras, preserving
/// order and dropping duplicates.
pub(crate) fn merge_scopes(defaults: &[&str], extra: &[String]) -> String {
    let mut seen: Vec<&str> = Vec::new();

    for scope in defaults.iter().copied().chain(extra.iter().map(String::as_str)) {
        let scope = scope.trim();
        if !scope.is_empty() && !seen.contains(&scope) {
            seen.push(scope);
        }
    }

    seen.join(" ")
}
