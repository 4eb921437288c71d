use sea_orm::entity::prelude::*;

/// One simulation experiment. `status` holds "created" | "running" |
/// "stopped"; `server_pid` is persisted so liveness checks survive an
/// orchestrator restart.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "experiments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub store_url: String,
    pub server_pid: Option<i64>,
    pub server_port: i32,
    pub config_path: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
