use sea_orm::entity::prelude::*;

/// Aggregated server-log counters, bucketed by UTC day (and hour for the
/// hourly granularity) and endpoint path. `hour` is null for daily rows.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "server_metrics")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub granularity: String,
    pub day: Date,
    pub hour: Option<i32>,
    pub path: String,
    pub call_count: i64,
    pub total_duration: f64,
    pub min_ts: DateTimeWithTimeZone,
    pub max_ts: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
