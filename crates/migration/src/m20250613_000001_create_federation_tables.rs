use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create users table (default local user pool)
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::Name).string())
                    .col(ColumnDef::new(Users::Email).string())
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Users::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_users_email")
                    .table(Users::Table)
                    .col(Users::Email)
                    .to_owned(),
            )
            .await?;

        // Create federated_identities table (provider identity <-> local user links)
        manager
            .create_table(
                Table::create()
                    .table(FederatedIdentities::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FederatedIdentities::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FederatedIdentities::Realm)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FederatedIdentities::OwnerKind).string())
                    .col(ColumnDef::new(FederatedIdentities::OwnerId).string())
                    .col(
                        ColumnDef::new(FederatedIdentities::Driver)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FederatedIdentities::ProviderUserId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(FederatedIdentities::AccessToken).text())
                    .col(
                        ColumnDef::new(FederatedIdentities::AccessTokenExpiresAt)
                            .big_integer(),
                    )
                    .col(ColumnDef::new(FederatedIdentities::RefreshToken).text())
                    .col(
                        ColumnDef::new(FederatedIdentities::AvatarHash).string_len(64),
                    )
                    .col(ColumnDef::new(FederatedIdentities::ProviderData).text())
                    .col(
                        ColumnDef::new(FederatedIdentities::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FederatedIdentities::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    // The reconciliation key. The storage layer (not the
                    // engine) is what guarantees two concurrent callbacks for
                    // the same provider identity cannot both create a link.
                    .index(
                        Index::create()
                            .name("uidx_federated_identities_realm_driver_subject")
                            .table(FederatedIdentities::Table)
                            .col(FederatedIdentities::Realm)
                            .col(FederatedIdentities::Driver)
                            .col(FederatedIdentities::ProviderUserId)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await?;

        // SQLite cannot represent a non-unique index as a table-level
        // CONSTRAINT, so we create these indexes separately.
        manager
            .create_index(
                Index::create()
                    .name("idx_federated_identities_driver_subject")
                    .table(FederatedIdentities::Table)
                    .col(FederatedIdentities::Driver)
                    .col(FederatedIdentities::ProviderUserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_federated_identities_owner")
                    .table(FederatedIdentities::Table)
                    .col(FederatedIdentities::OwnerKind)
                    .col(FederatedIdentities::OwnerId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FederatedIdentities::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Name,
    Email,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum FederatedIdentities {
    Table,
    Id,
    Realm,
    OwnerKind,
    OwnerId,
    Driver,
    ProviderUserId,
    AccessToken,
    AccessTokenExpiresAt,
    RefreshToken,
    AvatarHash,
    ProviderData,
    CreatedAt,
    UpdatedAt,
}
