//! One registered database endpoint.
//!
//! A [`Connection`] owns its reconnection recipe ([`ConnectionInfo`]) and,
//! when open, a pool built from exactly that recipe. Replacing the recipe
//! always goes through [`Connection::install`], so the two never drift.

use crate::config::PoolOptions;
use crate::db::pool::DbPool;
use crate::error::DbResult;
use crate::models::{ConnectionInfo, ConnectionSummary, Row};
use crate::query::Statement;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

#[derive(Debug)]
struct ConnectionState {
    info: ConnectionInfo,
    pool: Option<DbPool>,
}

#[derive(Debug)]
pub struct Connection {
    id: String,
    pool_options: PoolOptions,
    state: RwLock<ConnectionState>,
    /// Serializes lazy opens; `state` is never held across a connect.
    opening: Mutex<()>,
}

impl Connection {
    /// Open a connection eagerly. On failure nothing is retained.
    pub async fn open(
        id: impl Into<String>,
        info: ConnectionInfo,
        pool_options: PoolOptions,
    ) -> DbResult<Self> {
        let pool = DbPool::connect(&info, &pool_options).await?;
        Ok(Self {
            id: id.into(),
            pool_options,
            state: RwLock::new(ConnectionState {
                info,
                pool: Some(pool),
            }),
            opening: Mutex::new(()),
        })
    }

    /// Rebuild a connection from persisted info without opening it.
    pub fn restore(id: impl Into<String>, info: ConnectionInfo, pool_options: PoolOptions) -> Self {
        Self {
            id: id.into(),
            pool_options,
            state: RwLock::new(ConnectionState { info, pool: None }),
            opening: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn info(&self) -> ConnectionInfo {
        self.state.read().await.info.clone()
    }

    pub async fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: self.id.clone(),
            info: self.info().await,
        }
    }

    pub async fn is_open(&self) -> bool {
        self.state.read().await.pool.is_some()
    }

    /// Open a pool for `info` without touching the current state.
    pub async fn prepare(&self, info: &ConnectionInfo) -> DbResult<DbPool> {
        DbPool::connect(info, &self.pool_options).await
    }

    /// Swap in `info` and a pool opened from it, closing the previous pool.
    pub async fn install(&self, info: ConnectionInfo, pool: DbPool) {
        let previous = {
            let mut state = self.state.write().await;
            state.info = info;
            state.pool.replace(pool)
        };
        if let Some(old) = previous {
            old.close().await;
        }
        debug!(connection_id = %self.id, "Installed new handle");
    }

    /// Open a handle for `info` and swap it in. A failure leaves the
    /// current info and handle untouched.
    pub async fn reconfigure(&self, info: ConnectionInfo) -> DbResult<()> {
        let pool = self.prepare(&info).await?;
        self.install(info, pool).await;
        Ok(())
    }

    /// Return the live handle, opening one from the stored info if needed.
    ///
    /// Readers of the connection's info are not blocked while the pool is
    /// being opened. If the info was replaced meanwhile, the freshly opened
    /// pool is discarded and the open is retried from the new info.
    pub async fn ensure_open(&self) -> DbResult<DbPool> {
        if let Some(pool) = &self.state.read().await.pool {
            return Ok(pool.clone());
        }

        loop {
            let _opening = self.opening.lock().await;
            let info = {
                let state = self.state.read().await;
                if let Some(pool) = &state.pool {
                    return Ok(pool.clone());
                }
                state.info.clone()
            };

            info!(connection_id = %self.id, "Opening connection on first use");
            let pool = DbPool::connect(&info, &self.pool_options).await?;

            let mut state = self.state.write().await;
            if let Some(existing) = state.pool.clone() {
                drop(state);
                pool.close().await;
                return Ok(existing);
            }
            if state.info == info {
                state.pool = Some(pool.clone());
                return Ok(pool);
            }
            drop(state);
            debug!(connection_id = %self.id, "Info changed while opening, retrying");
            pool.close().await;
        }
    }

    /// Release the handle. Closing a closed connection is a no-op.
    pub async fn close(&self) {
        let pool = self.state.write().await.pool.take();
        if let Some(pool) = pool {
            pool.close().await;
            debug!(connection_id = %self.id, "Closed connection");
        }
    }

    pub async fn fetch(&self, statement: &Statement) -> DbResult<Vec<Row>> {
        self.ensure_open().await?.fetch(statement).await
    }

    pub async fn execute(&self, statement: &Statement) -> DbResult<u64> {
        self.ensure_open().await?.execute(statement).await
    }
}
