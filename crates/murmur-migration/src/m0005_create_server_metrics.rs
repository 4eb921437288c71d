use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ServerMetrics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ServerMetrics::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ServerMetrics::ExperimentId).uuid().not_null())
                    .col(
                        ColumnDef::new(ServerMetrics::Granularity)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ServerMetrics::Day).date().not_null())
                    .col(ColumnDef::new(ServerMetrics::Hour).integer().null())
                    .col(ColumnDef::new(ServerMetrics::Path).string().not_null())
                    .col(
                        ColumnDef::new(ServerMetrics::CallCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ServerMetrics::TotalDuration)
                            .double()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ServerMetrics::MinTs)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ServerMetrics::MaxTs)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_server_metrics_bucket")
                    .table(ServerMetrics::Table)
                    .col(ServerMetrics::ExperimentId)
                    .col(ServerMetrics::Granularity)
                    .col(ServerMetrics::Day)
                    .col(ServerMetrics::Hour)
                    .col(ServerMetrics::Path)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_server_metrics_bucket")
                    .table(ServerMetrics::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ServerMetrics::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ServerMetrics {
    Table,
    Id,
    ExperimentId,
    Granularity,
    Day,
    Hour,
    Path,
    CallCount,
    TotalDuration,
    MinTs,
    MaxTs,
}
