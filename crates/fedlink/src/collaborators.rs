use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fedlink_core::mapping::UserAttributes;
use fedlink_core::FederationError;

/// Polymorphic reference to a local user: which pool it lives in
/// (`kind`, e.g. "users" or "admin_users") and its id within that pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub id: String,
}

impl OwnerRef {
    pub fn new(kind: &str, id: &str) -> Self {
        OwnerRef {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

/// The engine's view of a local user, whatever pool it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub owner: OwnerRef,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl LocalUser {
    /// Overwrite fields from a provider attribute mapping. Applied
    /// all-or-nothing by the engine when auto-update is enabled.
    pub fn apply_attributes(&mut self, attrs: &UserAttributes) {
        if let Some(name) = attrs.get("name") {
            self.name = Some(name.clone());
        }
        if let Some(email) = attrs.get("email") {
            self.email = Some(email.clone());
        }
    }
}

/// Local user persistence, supplied by the host.
#[async_trait]
pub trait LocalUserStore: Send + Sync {
    /// Resolve an owner reference back to a user. `None` means the link
    /// points at a user that no longer exists.
    async fn resolve(&self, owner: &OwnerRef) -> Result<Option<LocalUser>, FederationError>;

    async fn find_by_email(
        &self,
        realm: &str,
        email: &str,
    ) -> Result<Option<LocalUser>, FederationError>;

    async fn create(
        &self,
        realm: &str,
        attrs: &UserAttributes,
    ) -> Result<LocalUser, FederationError>;

    async fn save(&self, user: &LocalUser) -> Result<(), FederationError>;
}

/// Session establishment, supplied by the host.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Log the user in and return a fresh opaque session token. Each call
    /// mints a new session; any prior one for the same browser is replaced
    /// by the cookie overwrite.
    async fn login(&self, user: &LocalUser) -> Result<String, FederationError>;
}

/// Avatar blob storage, supplied by the host. Failures here are logged and
/// never block login.
#[async_trait]
pub trait AvatarStorage: Send + Sync {
    async fn store(
        &self,
        owner: &OwnerRef,
        bytes: &[u8],
        mime: &str,
    ) -> Result<(), FederationError>;
}
