use sea_orm::entity::prelude::*;

/// A simulation driver attached to an experiment. `config_json` is opaque to
/// the orchestrator and handed to the driver process verbatim.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "clients")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub name: String,
    pub config_json: String,
    pub pid: Option<i64>,
    pub expected_duration_rounds: i32,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
