use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Default local user pool served by the bundled store (`owner_kind = "users"`).
///
/// The reconciliation engine itself never assumes this schema; hosts with
/// other pools plug in their own `LocalUserStore`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub name: Option<String>,

    /// Lookup key for attach-by-email during reconciliation.
    pub email: Option<String>,

    /// Unix timestamp (seconds).
    pub created_at: i64,

    /// Unix timestamp (seconds).
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
