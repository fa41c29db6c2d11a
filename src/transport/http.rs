//! HTTP transport for the connection registry.
//!
//! A thin JSON layer: it validates request shape, calls the registry,
//! inspector or executor, and maps [`DbError`] onto status codes.

use crate::db::{ConnectionRegistry, QueryExecutor, SchemaInspector};
use crate::error::{DbError, DbResult};
use crate::models::{
    ConnectionInfo, ConnectionSummary, DriverKind, Function, Query, QueryResult, Table,
};
use crate::transport::Transport;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query as UrlQuery, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub executor: QueryExecutor,
}

impl AppState {
    pub fn new(registry: Arc<ConnectionRegistry>, executor: QueryExecutor) -> Self {
        Self { registry, executor }
    }

    fn deadline(&self) -> Option<Duration> {
        Some(self.executor.default_timeout())
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/driver", get(list_drivers))
        .route("/database", get(list_databases).post(add_database))
        .route("/database/{id}", patch(edit_database).delete(remove_database))
        .route("/database/{id}/tables", get(list_tables))
        .route("/database/{id}/functions", get(list_functions))
        .route("/database/{id}/query", post(run_query))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CreatedResponse {
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TableFilter {
    pub table: Option<String>,
}

/// Connection ids are UUIDs; anything else is rejected before lookup.
fn parse_id(id: &str) -> DbResult<&str> {
    uuid::Uuid::parse_str(id)
        .map(|_| id)
        .map_err(|_| DbError::invalid_input(format!("Invalid connection id: {}", id)))
}

fn connection_body(body: Result<Json<ConnectionInfo>, JsonRejection>) -> DbResult<ConnectionInfo> {
    body.map(|Json(info)| info)
        .map_err(|rejection| DbError::invalid_input(rejection.body_text()))
}

pub async fn list_drivers() -> Json<&'static [DriverKind]> {
    Json(DriverKind::all())
}

pub async fn list_databases(State(state): State<AppState>) -> Json<Vec<ConnectionSummary>> {
    Json(state.registry.summaries().await)
}

pub async fn add_database(
    State(state): State<AppState>,
    body: Result<Json<ConnectionInfo>, JsonRejection>,
) -> DbResult<(StatusCode, Json<CreatedResponse>)> {
    let info = connection_body(body)?;
    let id = state.registry.add(info).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

pub async fn edit_database(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ConnectionInfo>, JsonRejection>,
) -> DbResult<StatusCode> {
    let id = parse_id(&id)?;
    let info = connection_body(body)?;
    state.registry.edit(id, info).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_database(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DbResult<StatusCode> {
    let id = parse_id(&id)?;
    state.registry.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_tables(
    State(state): State<AppState>,
    Path(id): Path<String>,
    UrlQuery(filter): UrlQuery<TableFilter>,
) -> DbResult<Json<Vec<Table>>> {
    let connection = state.registry.get(parse_id(&id)?).await?;
    let tables =
        SchemaInspector::introspect(&connection, filter.table.as_deref(), state.deadline()).await?;
    Ok(Json(tables))
}

pub async fn list_functions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DbResult<Json<Vec<Function>>> {
    let connection = state.registry.get(parse_id(&id)?).await?;
    let functions = SchemaInspector::list_functions(&connection, state.deadline()).await?;
    Ok(Json(functions))
}

pub async fn run_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Query>, JsonRejection>,
) -> DbResult<Json<QueryResult>> {
    let connection = state.registry.get(parse_id(&id)?).await?;
    let Json(query) = body.map_err(|rejection| DbError::compile(rejection.body_text()))?;
    let result = state.executor.run(&connection, &query, None).await?;
    Ok(Json(result))
}

/// HTTP transport implementation.
pub struct HttpTransport {
    state: AppState,
    /// Host to bind to
    host: String,
    /// Port to bind to
    port: u16,
    shutdown_timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        state: AppState,
        host: impl Into<String>,
        port: u16,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            state,
            host: host.into(),
            port,
            shutdown_timeout,
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting HTTP API on {}", bind_addr);

        let app = router(self.state.clone());

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        // Create shutdown signal that triggers on SIGINT or SIGTERM
        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        // Race between: server completing normally vs forced timeout/second signal after shutdown
        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Waiting for in-flight requests (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(self.shutdown_timeout) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        info!("Closing database connections");
        self.state.registry.close_all().await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
