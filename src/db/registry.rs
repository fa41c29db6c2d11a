//! Connection registry.
//!
//! The one place connections are created, listed, reconfigured and torn
//! down. Map reads take a shared lock; mutations are additionally serialized
//! by `mutations` so a slow open or persist never interleaves with another
//! mutation of the same registry.

use crate::config::PoolOptions;
use crate::db::connection::Connection;
use crate::db::store::ConnectionStore;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, ConnectionSummary};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    mutations: Mutex<()>,
    store: Arc<dyn ConnectionStore>,
    pool_options: PoolOptions,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("pool_options", &self.pool_options)
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn ConnectionStore>, pool_options: PoolOptions) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            mutations: Mutex::new(()),
            store,
            pool_options,
        }
    }

    /// Rehydrate every persisted connection.
    ///
    /// Each connection is opened eagerly; one that fails to open stays
    /// registered without a handle and is retried on first use.
    pub async fn load(&self) -> DbResult<usize> {
        let _guard = self.mutations.lock().await;
        let records = self.store.list_connections().await?;
        let mut loaded = HashMap::with_capacity(records.len());

        for (id, info) in records {
            let connection =
                match Connection::open(id.clone(), info.clone(), self.pool_options.clone()).await {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!(
                            connection_id = %id,
                            endpoint = %info.endpoint(),
                            error = %e,
                            "Failed to open connection at startup, will retry on first use"
                        );
                        Connection::restore(id.clone(), info, self.pool_options.clone())
                    }
                };
            loaded.insert(id, Arc::new(connection));
        }

        let count = loaded.len();
        self.connections.write().await.extend(loaded);
        info!(count, "Connection registry loaded");
        Ok(count)
    }

    /// Snapshot of every registered connection.
    pub async fn list(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Snapshot listing without secrets, ordered by label then id.
    pub async fn summaries(&self) -> Vec<ConnectionSummary> {
        let mut summaries = Vec::new();
        for connection in self.list().await {
            summaries.push(connection.summary().await);
        }
        summaries.sort_by(|a, b| a.info.name.cmp(&b.info.name).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    pub async fn get(&self, id: &str) -> DbResult<Arc<Connection>> {
        self.connections
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DbError::connection_not_found(id))
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Register a new connection and return its id.
    ///
    /// The connection is opened, then persisted, then published. If
    /// persisting fails the opened handle is closed and nothing is kept.
    pub async fn add(&self, info: ConnectionInfo) -> DbResult<String> {
        let _guard = self.mutations.lock().await;
        let id = uuid::Uuid::new_v4().to_string();
        info!(connection_id = %id, endpoint = %info.endpoint(), "Adding connection");

        let connection =
            Connection::open(id.clone(), info.clone(), self.pool_options.clone()).await?;

        if let Err(e) = self.store.insert_connection(None, &id, &info).await {
            error!(connection_id = %id, error = %e, "Failed to persist connection");
            connection.close().await;
            return Err(e.into_persist(&id));
        }

        self.connections
            .write()
            .await
            .insert(id.clone(), Arc::new(connection));
        info!(connection_id = %id, "Connection added");
        Ok(id)
    }

    /// Replace the info of a registered connection.
    ///
    /// The persisted update and the opening of the new handle share one
    /// unit of work, so a connection failure rolls the update back. The new
    /// handle is installed only after commit.
    pub async fn edit(&self, id: &str, info: ConnectionInfo) -> DbResult<()> {
        let _guard = self.mutations.lock().await;
        let connection = self.get(id).await?;
        info!(connection_id = %id, endpoint = %info.endpoint(), "Editing connection");

        let store = Arc::clone(&self.store);
        let target = Arc::clone(&connection);
        let owned_id = id.to_string();
        let owned_info = info.clone();

        let pool = self
            .store
            .coordinator()
            .read_committed(None, move |tx| {
                Box::pin(async move {
                    store
                        .update_connection(Some(tx), &owned_id, &owned_info)
                        .await?;
                    target.prepare(&owned_info).await
                })
            })
            .await
            .inspect_err(|e| {
                error!(connection_id = %id, error = %e, "Failed to edit connection");
            })?;

        connection.install(info, pool).await;
        info!(connection_id = %id, "Connection edited");
        Ok(())
    }

    /// Unregister a connection: delete its record, close it, drop it.
    pub async fn remove(&self, id: &str) -> DbResult<()> {
        let _guard = self.mutations.lock().await;
        let connection = self.get(id).await?;
        info!(connection_id = %id, "Removing connection");

        self.store.delete_connection(None, id).await.inspect_err(|e| {
            error!(connection_id = %id, error = %e, "Failed to delete connection record");
        })?;

        connection.close().await;
        self.connections.write().await.remove(id);
        info!(connection_id = %id, "Connection removed");
        Ok(())
    }

    /// Close every handle. Registrations are kept.
    pub async fn close_all(&self) {
        let _guard = self.mutations.lock().await;
        for connection in self.list().await {
            connection.close().await;
            info!(connection_id = %connection.id(), "Closed connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migration::{DEFAULT_MIGRATION, run_script};
    use crate::db::pool::DbPool;
    use crate::db::store::SqlConnectionStore;
    use tempfile::TempDir;

    async fn registry(dir: &TempDir) -> ConnectionRegistry {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("meta.db").display());
        let pool = DbPool::connect_url(&url, &PoolOptions::default()).await.unwrap();
        run_script(&pool, DEFAULT_MIGRATION).await.unwrap();
        ConnectionRegistry::new(
            Arc::new(SqlConnectionStore::new(pool)),
            PoolOptions::default(),
        )
    }

    fn target(dir: &TempDir, file: &str) -> ConnectionInfo {
        ConnectionInfo::sqlite(file, dir.path().join(file).to_string_lossy())
    }

    #[tokio::test]
    async fn test_add_then_get_returns_same_info() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;
        let info = target(&dir, "a.db");

        let id = registry.add(info.clone()).await.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(registry.get(&id).await.unwrap().info().await, info);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_add_unreachable_is_not_registered() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;
        let info = ConnectionInfo::sqlite(
            "broken",
            dir.path().join("no").join("such.db").to_string_lossy(),
        );

        let err = registry.add(info).await.unwrap_err();
        assert_eq!(err.kind(), "ConnectionFailed");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_edit_rolls_back_persisted_info() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;
        let original = target(&dir, "a.db");
        let id = registry.add(original.clone()).await.unwrap();

        let broken = ConnectionInfo::sqlite(
            "broken",
            dir.path().join("no").join("such.db").to_string_lossy(),
        );
        let err = registry.edit(&id, broken).await.unwrap_err();
        assert_eq!(err.kind(), "ConnectionFailed");
        assert_eq!(registry.get(&id).await.unwrap().info().await, original);

        // a fresh registry over the same store sees the original info
        let reloaded = ConnectionRegistry::new(Arc::clone(&registry.store), PoolOptions::default());
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.get(&id).await.unwrap().info().await, original);
    }

    #[tokio::test]
    async fn test_edit_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;
        let err = registry
            .edit("00000000-0000-0000-0000-000000000000", target(&dir, "a.db"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn test_close_all_keeps_registrations() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;
        let id = registry.add(target(&dir, "a.db")).await.unwrap();

        registry.close_all().await;
        let connection = registry.get(&id).await.unwrap();
        assert!(!connection.is_open().await);
        connection.ensure_open().await.unwrap();
    }
}
