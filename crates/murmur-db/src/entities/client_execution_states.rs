use sea_orm::entity::prelude::*;

/// Per-client simulation progress. `last_active_hour`/`last_active_day`
/// start at -1 ("not yet started"), which is distinct from (0, 0) = "already
/// completed the first tick".
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "client_execution_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub client_id: Uuid,
    pub experiment_id: Uuid,
    pub elapsed_time: i64,
    pub last_active_hour: i32,
    pub last_active_day: i32,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
