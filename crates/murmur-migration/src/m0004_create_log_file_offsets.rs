use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LogFileOffsets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LogFileOffsets::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LogFileOffsets::ExperimentId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LogFileOffsets::Kind).string().not_null())
                    .col(ColumnDef::new(LogFileOffsets::ClientId).uuid().null())
                    .col(ColumnDef::new(LogFileOffsets::Path).string().not_null())
                    .col(
                        ColumnDef::new(LogFileOffsets::ByteOffset)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(LogFileOffsets::UpdatedAt)
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
                    .name("idx_log_file_offsets_scope")
                    .table(LogFileOffsets::Table)
                    .col(LogFileOffsets::ExperimentId)
                    .col(LogFileOffsets::Kind)
                    .col(LogFileOffsets::ClientId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_log_file_offsets_scope")
                    .table(LogFileOffsets::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(LogFileOffsets::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum LogFileOffsets {
    Table,
    Id,
    ExperimentId,
    Kind,
    ClientId,
    Path,
    ByteOffset,
    UpdatedAt,
}
