use sea_orm::entity::prelude::*;

/// How far into a log file the aggregator has already read. `kind` is
/// "server" or "client"; `client_id` is set only for client logs.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "log_file_offsets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub kind: String,
    pub client_id: Option<Uuid>,
    pub path: String,
    pub byte_offset: i64,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
