use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use entity::federated_identity;
use fedlink_core::FederationError;

use crate::collaborators::OwnerRef;
use crate::record::IdentityRecord;

/// Persistence for federated identity link records.
///
/// The storage layer itself must enforce the (realm, driver,
/// provider_user_id) uniqueness; `save` surfacing `ConstraintViolation` is
/// the concurrency signal callers recover from by re-reading.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_provider_identity(
        &self,
        realm: &str,
        driver: &str,
        provider_user_id: &str,
    ) -> Result<Option<IdentityRecord>, FederationError>;

    /// Insert or update. Returns the record marked persisted.
    async fn save(&self, record: IdentityRecord) -> Result<IdentityRecord, FederationError>;
}

/// sea-orm implementation over the `federated_identities` table.
pub struct SeaOrmIdentityStore {
    db: DatabaseConnection,
}

impl SeaOrmIdentityStore {
    pub fn new(db: DatabaseConnection) -> Self {
        SeaOrmIdentityStore { db }
    }
}

fn record_from_model(model: federated_identity::Model) -> IdentityRecord {
    let owner = match (model.owner_kind, model.owner_id) {
        (Some(kind), Some(id)) => Some(OwnerRef { kind, id }),
        _ => None,
    };

    IdentityRecord {
        id: model.id,
        realm: model.realm,
        driver: model.driver,
        provider_user_id: model.provider_user_id,
        owner,
        access_token: model.access_token,
        access_token_expires_at: model.access_token_expires_at,
        refresh_token: model.refresh_token,
        avatar_hash: model.avatar_hash,
        provider_data: model
            .provider_data
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
        created_at: model.created_at,
        updated_at: model.updated_at,
        persisted: true,
    }
}

fn active_model_from_record(
    record: &IdentityRecord,
    updated_at: i64,
) -> Result<federated_identity::ActiveModel, FederationError> {
    let provider_data = record
        .provider_data
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(FederationError::storage))
        .transpose()?;

    Ok(federated_identity::ActiveModel {
        id: Set(record.id.clone()),
        realm: Set(record.realm.clone()),
        owner_kind: Set(record.owner.as_ref().map(|o| o.kind.clone())),
        owner_id: Set(record.owner.as_ref().map(|o| o.id.clone())),
        driver: Set(record.driver.clone()),
        provider_user_id: Set(record.provider_user_id.clone()),
        access_token: Set(record.access_token.clone()),
        access_token_expires_at: Set(record.access_token_expires_at),
        refresh_token: Set(record.refresh_token.clone()),
        avatar_hash: Set(record.avatar_hash.clone()),
        provider_data: Set(provider_data),
        created_at: Set(record.created_at),
        updated_at: Set(updated_at),
    })
}

/// Duplicate-key detection across sqlite and postgres drivers.
fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("unique") || msg.contains("duplicate key")
}

#[async_trait]
impl IdentityStore for SeaOrmIdentityStore {
    async fn find_by_provider_identity(
        &self,
        realm: &str,
        driver: &str,
        provider_user_id: &str,
    ) -> Result<Option<IdentityRecord>, FederationError> {
        let model = federated_identity::Entity::find()
            .filter(federated_identity::Column::Realm.eq(realm))
            .filter(federated_identity::Column::Driver.eq(driver))
            .filter(federated_identity::Column::ProviderUserId.eq(provider_user_id))
            .one(&self.db)
            .await
            .map_err(FederationError::storage)?;

        Ok(model.map(record_from_model))
    }

    async fn save(&self, mut record: IdentityRecord) -> Result<IdentityRecord, FederationError> {
        let now = chrono::Utc::now().timestamp();
        let active = active_model_from_record(&record, now)?;

        let result = if record.persisted {
            active.update(&self.db).await.map(|_| ())
        } else {
            active.insert(&self.db).await.map(|_| ())
        };

        match result {
            Ok(()) => {
                record.updated_at = now;
                record.persisted = true;
                Ok(record)
            }
            Err(e) if !record.persisted && is_unique_violation(&e) => {
                Err(FederationError::ConstraintViolation)
            }
            Err(e) => Err(FederationError::storage(e)),
        }
    }
}
