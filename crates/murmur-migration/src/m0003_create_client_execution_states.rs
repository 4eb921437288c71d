use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ClientExecutionStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ClientExecutionStates::ClientId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ClientExecutionStates::ExperimentId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ClientExecutionStates::ElapsedTime)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    // -1 means "not yet started"; 0 is a real hour/day.
                    .col(
                        ColumnDef::new(ClientExecutionStates::LastActiveHour)
                            .integer()
                            .not_null()
                            .default(-1),
                    )
                    .col(
                        ColumnDef::new(ClientExecutionStates::LastActiveDay)
                            .integer()
                            .not_null()
                            .default(-1),
                    )
                    .col(
                        ColumnDef::new(ClientExecutionStates::UpdatedAt)
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
                    .name("idx_client_execution_states_experiment_id")
                    .table(ClientExecutionStates::Table)
                    .col(ClientExecutionStates::ExperimentId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_client_execution_states_experiment_id")
                    .table(ClientExecutionStates::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(ClientExecutionStates::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum ClientExecutionStates {
    Table,
    ClientId,
    ExperimentId,
    ElapsedTime,
    LastActiveHour,
    LastActiveDay,
    UpdatedAt,
}
