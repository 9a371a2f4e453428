use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Persistent link between a provider identity and a local user.
///
/// The owner reference is polymorphic: `owner_kind` names the local user
/// pool ("users", "admin_users", ...) and `owner_id` the row within it.
/// Both are NULL until the first successful resolution.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "federated_identities")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Authentication realm this link belongs to (e.g. "web", "admin").
    pub realm: String,

    /// Local user pool, e.g. "users". NULL while unlinked.
    pub owner_kind: Option<String>,

    /// Local user id within the pool. NULL while unlinked.
    pub owner_id: Option<String>,

    /// Identity provider driver (e.g. "google", "azure").
    pub driver: String,

    /// Provider-scoped stable subject identifier.
    pub provider_user_id: String,

    /// Rotating provider tokens. Never serialized.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,

    /// Unix timestamp (seconds).
    pub access_token_expires_at: Option<i64>,

    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,

    /// SHA-256 hex of the last-seen avatar source, for change detection.
    #[sea_orm(column_type = "String(StringLen::N(64))", nullable)]
    pub avatar_hash: Option<String>,

    /// Raw provider profile payload, JSON-encoded.
    #[sea_orm(column_type = "Text", nullable)]
    pub provider_data: Option<String>,

    /// Unix timestamp (seconds).
    pub created_at: i64,

    /// Unix timestamp (seconds).
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
