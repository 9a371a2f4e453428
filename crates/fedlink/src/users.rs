use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use entity::user;
use fedlink_core::mapping::UserAttributes;
use fedlink_core::FederationError;

use crate::collaborators::{LocalUser, LocalUserStore, OwnerRef};

/// The owner kind served by the bundled store.
pub const USERS_OWNER_KIND: &str = "users";

/// Bundled local user store over the `users` table.
///
/// Serves a single pool for every realm; hosts with separate pools per
/// realm (e.g. admin_users) supply their own `LocalUserStore`.
pub struct SeaOrmUserStore {
    db: DatabaseConnection,
}

impl SeaOrmUserStore {
    pub fn new(db: DatabaseConnection) -> Self {
        SeaOrmUserStore { db }
    }
}

fn local_user_from_model(model: user::Model) -> LocalUser {
    LocalUser {
        owner: OwnerRef::new(USERS_OWNER_KIND, &model.id),
        name: model.name,
        email: model.email,
    }
}

#[async_trait]
impl LocalUserStore for SeaOrmUserStore {
    async fn resolve(&self, owner: &OwnerRef) -> Result<Option<LocalUser>, FederationError> {
        if owner.kind != USERS_OWNER_KIND {
            return Ok(None);
        }

        let model = user::Entity::find_by_id(owner.id.clone())
            .one(&self.db)
            .await
            .map_err(FederationError::storage)?;

        Ok(model.map(local_user_from_model))
    }

    async fn find_by_email(
        &self,
        _realm: &str,
        email: &str,
    ) -> Result<Option<LocalUser>, FederationError> {
        let model = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(&self.db)
            .await
            .map_err(FederationError::storage)?;

        Ok(model.map(local_user_from_model))
    }

    async fn create(
        &self,
        _realm: &str,
        attrs: &UserAttributes,
    ) -> Result<LocalUser, FederationError> {
        let now = chrono::Utc::now().timestamp();
        let id = Uuid::now_v7().to_string();

        let model = user::ActiveModel {
            id: Set(id),
            name: Set(attrs.get("name").cloned()),
            email: Set(attrs.get("email").cloned()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = model.insert(&self.db).await.map_err(FederationError::storage)?;

        Ok(local_user_from_model(inserted))
    }

    async fn save(&self, local: &LocalUser) -> Result<(), FederationError> {
        let now = chrono::Utc::now().timestamp();

        let model = user::ActiveModel {
            id: Set(local.owner.id.clone()),
            name: Set(local.name.clone()),
            email: Set(local.email.clone()),
            updated_at: Set(now),
            ..Default::default()
        };

        model.update(&self.db).await.map_err(FederationError::storage)?;

        Ok(())
    }
}
