use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Experiments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Experiments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Experiments::Name).string().not_null())
                    .col(
                        ColumnDef::new(Experiments::Status)
                            .string()
                            .not_null()
                            .default("created"),
                    )
                    .col(ColumnDef::new(Experiments::StoreUrl).string().not_null())
                    .col(ColumnDef::new(Experiments::ServerPid).big_integer().null())
                    .col(
                        ColumnDef::new(Experiments::ServerPort)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Experiments::ConfigPath).string().null())
                    .col(
                        ColumnDef::new(Experiments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Experiments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_experiments_status")
                    .table(Experiments::Table)
                    .col(Experiments::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_experiments_status")
                    .table(Experiments::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Experiments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Experiments {
    Table,
    Id,
    Name,
    Status,
    StoreUrl,
    ServerPid,
    ServerPort,
    ConfigPath,
    CreatedAt,
    UpdatedAt,
}
