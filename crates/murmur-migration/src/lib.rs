use sea_orm_migration::prelude::*;

mod m0001_create_experiments;
mod m0002_create_clients;
mod m0003_create_client_execution_states;
mod m0004_create_log_file_offsets;
mod m0005_create_server_metrics;
mod m0006_create_client_metrics;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m0001_create_experiments::Migration),
            Box::new(m0002_create_clients::Migration),
            Box::new(m0003_create_client_execution_states::Migration),
            Box::new(m0004_create_log_file_offsets::Migration),
            Box::new(m0005_create_server_metrics::Migration),
            Box::new(m0006_create_client_metrics::Migration),
        ]
    }
}
