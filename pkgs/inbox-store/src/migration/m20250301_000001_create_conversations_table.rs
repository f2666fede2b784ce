use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Conversations {
    Table,
    Id,
    TenantId,
    Kind,
    SiteId,
    Name,
    CreatedAt,
    LastActivityAt,
    ArchivedAt,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000001_create_conversations_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Conversations::Table)
                    .col(
                        ColumnDef::new(Conversations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Conversations::TenantId).string().not_null())
                    .col(ColumnDef::new(Conversations::Kind).string().not_null())
                    .col(ColumnDef::new(Conversations::SiteId).string())
                    .col(ColumnDef::new(Conversations::Name).string())
                    .col(
                        ColumnDef::new(Conversations::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Conversations::LastActivityAt).big_integer())
                    .col(ColumnDef::new(Conversations::ArchivedAt).big_integer())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_conversations_tenant_kind")
                    .table(Conversations::Table)
                    .col(Conversations::TenantId)
                    .col(Conversations::Kind)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Conversations::Table).to_owned())
            .await
    }
}
