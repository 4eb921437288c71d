use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Clients::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Clients::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Clients::ExperimentId).uuid().not_null())
                    .col(ColumnDef::new(Clients::Name).string().not_null())
                    .col(
                        ColumnDef::new(Clients::ConfigJson)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(ColumnDef::new(Clients::Pid).big_integer().null())
                    .col(
                        ColumnDef::new(Clients::ExpectedDurationRounds)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Clients::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Clients::UpdatedAt)
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
                    .name("idx_clients_experiment_id")
                    .table(Clients::Table)
                    .col(Clients::ExperimentId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_clients_experiment_id")
                    .table(Clients::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Clients::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Clients {
    Table,
    Id,
    ExperimentId,
    Name,
    ConfigJson,
    Pid,
    ExpectedDurationRounds,
    CreatedAt,
    UpdatedAt,
}
