use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::collaborators::OwnerRef;

/// Store-agnostic view of a federated identity link record.
///
/// The reconciliation engine mutates this in memory and hands it back to the
/// `IdentityStore` to persist; the sea-orm implementation maps it onto the
/// `federated_identities` table.
///
/// Token fields are `skip_serializing`: no externally serialized
/// representation of a link record ever carries secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub realm: String,
    pub driver: String,
    pub provider_user_id: String,

    /// Polymorphic reference to the local user; None until first resolution.
    /// Once set, reconciliation never clears it.
    pub owner: Option<OwnerRef>,

    #[serde(skip_serializing)]
    pub access_token: Option<String>,

    /// Unix timestamp (seconds).
    pub access_token_expires_at: Option<i64>,

    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,

    /// SHA-256 hex of the last-seen avatar source.
    pub avatar_hash: Option<String>,

    /// Raw provider profile payload.
    pub provider_data: Option<Value>,

    /// Unix timestamp (seconds).
    pub created_at: i64,

    /// Unix timestamp (seconds).
    pub updated_at: i64,

    /// Whether this record exists in storage yet. An in-memory record built
    /// at callback time starts out unpersisted.
    #[serde(skip)]
    pub persisted: bool,
}

impl IdentityRecord {
    /// Fresh unlinked in-memory record for a provider identity.
    pub fn new(realm: &str, driver: &str, provider_user_id: &str) -> Self {
        let now = chrono::Utc::now().timestamp();
        IdentityRecord {
            id: Uuid::now_v7().to_string(),
            realm: realm.to_string(),
            driver: driver.to_string(),
            provider_user_id: provider_user_id.to_string(),
            owner: None,
            access_token: None,
            access_token_expires_at: None,
            refresh_token: None,
            avatar_hash: None,
            provider_data: None,
            created_at: now,
            updated_at: now,
            persisted: false,
        }
    }

    /// Attach the record to a local user. A record that is already linked
    /// keeps its owner.
    pub fn link_to(&mut self, owner: OwnerRef) {
        if self.owner.is_none() {
            self.owner = Some(owner);
        }
    }

    /// Overwrite the access token and expiry; replace the refresh token only
    /// when the exchange supplied a non-empty one.
    pub fn update_tokens(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<i64>,
    ) {
        self.access_token = Some(access_token);
        self.access_token_expires_at = expires_at;

        if let Some(refresh) = refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = Some(refresh);
        }
    }

    pub fn is_token_expired(&self, now: i64) -> bool {
        matches!(self.access_token_expires_at, Some(exp) if exp < now)
    }
}
