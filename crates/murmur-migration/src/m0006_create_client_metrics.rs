use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ClientMetrics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ClientMetrics::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ClientMetrics::ClientId).uuid().not_null())
                    .col(ColumnDef::new(ClientMetrics::ExperimentId).uuid().not_null())
                    .col(
                        ColumnDef::new(ClientMetrics::Granularity)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ClientMetrics::Day).date().not_null())
                    .col(ColumnDef::new(ClientMetrics::Hour).integer().null())
                    .col(ColumnDef::new(ClientMetrics::MethodName).string().not_null())
                    .col(
                        ColumnDef::new(ClientMetrics::CallCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ClientMetrics::TotalDuration)
                            .double()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ClientMetrics::MinTs)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ClientMetrics::MaxTs)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_client_metrics_bucket")
                    .table(ClientMetrics::Table)
                    .col(ClientMetrics::ClientId)
                    .col(ClientMetrics::Granularity)
                    .col(ClientMetrics::Day)
                    .col(ClientMetrics::Hour)
                    .col(ClientMetrics::MethodName)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_client_metrics_experiment_id")
                    .table(ClientMetrics::Table)
                    .col(ClientMetrics::ExperimentId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_client_metrics_experiment_id")
                    .table(ClientMetrics::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_client_metrics_bucket")
                    .table(ClientMetrics::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ClientMetrics::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ClientMetrics {
    Table,
    Id,
    ClientId,
    ExperimentId,
    Granularity,
    Day,
    Hour,
    MethodName,
    CallCount,
    TotalDuration,
    MinTs,
    MaxTs,
}
