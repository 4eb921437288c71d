use std::sync::Arc;

use chrono::Utc;
use murmur_db::entities::{clients, experiments};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

pub async fn memory_db() -> Arc<DatabaseConnection> {
    // A single connection keeps every query on the same in-memory database.
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1);
    let db = Database::connect(opts).await.expect("connect sqlite memory");
    murmur_migration::Migrator::up(&db, None)
        .await
        .expect("apply migrations");
    Arc::new(db)
}

pub async fn seed_experiment(db: &DatabaseConnection, status: &str) -> experiments::Model {
    experiments::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("seeded".to_string()),
        status: Set(status.to_string()),
        store_url: Set("sqlite::memory:".to_string()),
        server_pid: Set(None),
        server_port: Set(0),
        config_path: Set(None),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .expect("insert experiment")
}

pub async fn seed_client(
    db: &DatabaseConnection,
    experiment_id: Uuid,
    expected_duration_rounds: i32,
) -> clients::Model {
    clients::ActiveModel {
        id: Set(Uuid::new_v4()),
        experiment_id: Set(experiment_id),
        name: Set("seeded-client".to_string()),
        config_json: Set("{}".to_string()),
        pid: Set(None),
        expected_duration_rounds: Set(expected_duration_rounds),
        created_at: Set(Utc::now().into()),
        updated_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .expect("insert client")
}
