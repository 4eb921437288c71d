//! Maps active experiments to their own data-store connections.
//!
//! Every active experiment gets an isolated binding named
//! `store_exp_<id>`, so several experiments can be queried concurrently
//! without one leaking into another. A legacy "current" alias tracks the
//! most recently activated experiment for callers that predate explicit ids.

use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::CoreError;

pub fn binding_name(experiment_id: Uuid) -> String {
    format!("store_exp_{experiment_id}")
}

#[derive(Clone)]
struct Binding {
    name: String,
    conn: Arc<DatabaseConnection>,
}

#[derive(Default)]
pub struct ExperimentRegistry {
    bindings: RwLock<HashMap<Uuid, Binding>>,
    current: RwLock<Option<Uuid>>,
}

impl ExperimentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-point) the binding for one experiment and mark it
    /// active. Activation is independent per experiment: activating B never
    /// deactivates A.
    pub async fn activate(&self, experiment_id: Uuid, store_url: &str) -> Result<(), CoreError> {
        if !self.bindings.read().await.contains_key(&experiment_id) {
            let conn = murmur_db::connect(store_url).await?;
            let binding = Binding {
                name: binding_name(experiment_id),
                conn: Arc::new(conn),
            };
            tracing::info!(%experiment_id, binding = %binding.name, "activated experiment store");
            self.bindings.write().await.insert(experiment_id, binding);
        }
        *self.current.write().await = Some(experiment_id);
        Ok(())
    }

    /// Drop the binding. Callers already holding the connection handle
    /// finish normally; no forced disconnect.
    pub async fn deactivate(&self, experiment_id: Uuid) {
        let removed = self.bindings.write().await.remove(&experiment_id);
        if removed.is_some() {
            tracing::info!(%experiment_id, "deactivated experiment store");
        }
        let mut current = self.current.write().await;
        if *current == Some(experiment_id) {
            *current = None;
        }
    }

    pub async fn is_active(&self, experiment_id: Uuid) -> bool {
        self.bindings.read().await.contains_key(&experiment_id)
    }

    pub async fn active_ids(&self) -> Vec<Uuid> {
        self.bindings.read().await.keys().copied().collect()
    }

    pub async fn resolve(&self, experiment_id: Uuid) -> Result<Arc<DatabaseConnection>, CoreError> {
        self.bindings
            .read()
            .await
            .get(&experiment_id)
            .map(|b| b.conn.clone())
            .ok_or(CoreError::UnknownExperiment(experiment_id))
    }

    pub async fn resolve_name(&self, experiment_id: Uuid) -> Option<String> {
        self.bindings
            .read()
            .await
            .get(&experiment_id)
            .map(|b| b.name.clone())
    }

    /// Backward-compat shim: the most recently activated experiment, for
    /// callers that have not been updated to pass an explicit id.
    pub async fn resolve_current(&self) -> Option<(Uuid, Arc<DatabaseConnection>)> {
        let current = (*self.current.read().await)?;
        let conn = self.bindings.read().await.get(&current)?.conn.clone();
        Some((current, conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn activation_is_independent_per_experiment() {
        let registry = ExperimentRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        registry.activate(a, "sqlite::memory:").await.unwrap();
        registry.activate(b, "sqlite::memory:").await.unwrap();

        assert!(registry.is_active(a).await);
        assert!(registry.is_active(b).await);

        let conn_a = registry.resolve(a).await.unwrap();
        let conn_b = registry.resolve(b).await.unwrap();
        assert!(!Arc::ptr_eq(&conn_a, &conn_b));
        assert_ne!(
            registry.resolve_name(a).await.unwrap(),
            registry.resolve_name(b).await.unwrap()
        );

        registry.deactivate(a).await;
        assert!(!registry.is_active(a).await);
        assert!(registry.is_active(b).await);
        assert!(registry.resolve(b).await.is_ok());
    }

    #[tokio::test]
    async fn resolve_unknown_experiment_fails() {
        let registry = ExperimentRegistry::new();
        let err = registry.resolve(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::UnknownExperiment(_)));
    }

    #[tokio::test]
    async fn current_alias_follows_most_recent_activation() {
        let registry = ExperimentRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        registry.activate(a, "sqlite::memory:").await.unwrap();
        assert_eq!(registry.resolve_current().await.map(|(id, _)| id), Some(a));

        registry.activate(b, "sqlite::memory:").await.unwrap();
        assert_eq!(registry.resolve_current().await.map(|(id, _)| id), Some(b));

        // Deactivating the current experiment clears the alias; others stay.
        registry.deactivate(b).await;
        assert!(registry.resolve_current().await.is_none());
        assert!(registry.is_active(a).await);
    }

    #[tokio::test]
    async fn reactivation_keeps_existing_binding() {
        let registry = ExperimentRegistry::new();
        let a = Uuid::new_v4();

        registry.activate(a, "sqlite::memory:").await.unwrap();
        let first = registry.resolve(a).await.unwrap();
        registry.activate(a, "sqlite::memory:").await.unwrap();
        let second = registry.resolve(a).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
