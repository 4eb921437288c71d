use sea_orm::entity::prelude::*;

/// Aggregated client-log counters, keyed by method name instead of endpoint
/// path. Same bucketing rules as server metrics.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "client_metrics")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub client_id: Uuid,
    pub experiment_id: Uuid,
    pub granularity: String,
    pub day: Date,
    pub hour: Option<i32>,
    pub method_name: String,
    pub call_count: i64,
    pub total_duration: f64,
    pub min_ts: DateTimeWithTimeZone,
    pub max_ts: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
