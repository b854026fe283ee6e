//! HTTP server setup and shared state.

use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Config, StoreBackend};
use crate::rotation::{scheduler, Engine, SharedEngine};
use crate::store::{InMemoryRotationStore, SharedRotationStore, SqliteRotationStore};

use super::assignments;
use super::types::HealthResponse;

/// Shared application state.
pub struct AppState {
    /// Users, tasks and assignment history
    pub store: SharedRotationStore,
    /// Single-flight reassignment engine shared by both triggers
    pub engine: SharedEngine,
    /// Cancelled on shutdown; in-flight cycles abort without committing
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(store: SharedRotationStore, capacity: usize, shutdown: CancellationToken) -> Self {
        let engine = Arc::new(Engine::new(Arc::clone(&store), capacity));
        Self {
            store,
            engine,
            shutdown,
        }
    }
}

/// Open the configured store backend.
pub async fn open_store(config: &Config) -> anyhow::Result<SharedRotationStore> {
    let store: SharedRotationStore = match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Arc::new(InMemoryRotationStore::new())
        }
        StoreBackend::Sqlite => {
            Arc::new(SqliteRotationStore::new(config.data_dir.clone()).await?)
        }
    };
    Ok(store)
}

/// Build the router for `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .nest("/api/assignments", assignments::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and, when enabled, the periodic trigger.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(
        store,
        config.max_tasks_per_user,
        shutdown.clone(),
    ));

    let scheduler_handle = if config.scheduler.enabled {
        Some(scheduler::spawn_reassign_loop(
            Arc::clone(&state.engine),
            config.scheduler.interval,
            shutdown.clone(),
        ))
    } else {
        tracing::info!("Reassignment scheduler disabled; use POST /api/assignments/run-once");
        None
    };

    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    // Setup graceful shutdown on SIGTERM/SIGINT
    let shutdown_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            tracing::warn!("Reassignment scheduler ended abnormally: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping reassignment cycles...");
}

/// Health check.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: state.store.backend_name().to_string(),
        persistent: state.store.is_persistent(),
        max_tasks_per_user: state.engine.capacity(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{OverviewResponse, VisitRecord};
    use crate::rotation::{RoundRobinRandomizer, Task, TaskState};
    use crate::store::RotationStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state(store: InMemoryRotationStore) -> Arc<AppState> {
        let store: SharedRotationStore = Arc::new(store);
        let config = Config::new(3);
        let engine = Arc::new(Engine::with_randomizer(
            Arc::clone(&store),
            config.max_tasks_per_user,
            Box::new(RoundRobinRandomizer::new()),
        ));
        Arc::new(AppState {
            store,
            engine,
            shutdown: CancellationToken::new(),
        })
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_reports_store_and_capacity() {
        let app = router(test_state(InMemoryRotationStore::new()));

        let (status, body) = send(app, "GET", "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.store, "memory");
        assert!(!health.persistent);
        assert_eq!(health.max_tasks_per_user, 3);
    }

    #[tokio::test]
    async fn test_health_reports_persistent_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(2);
        config.store_backend = StoreBackend::Sqlite;
        config.data_dir = dir.path().to_path_buf();
        let store = open_store(&config).await.unwrap();
        let state = Arc::new(AppState::new(
            store,
            config.max_tasks_per_user,
            CancellationToken::new(),
        ));

        let (status, body) = send(router(state), "GET", "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.store, "sqlite");
        assert!(health.persistent);
        assert_eq!(health.max_tasks_per_user, 2);
    }

    #[tokio::test]
    async fn test_run_once_assigns_and_returns_overview() {
        let store = InMemoryRotationStore::new();
        store.create_user("A").await.unwrap();
        store.create_user("B").await.unwrap();
        for i in 1..=7 {
            store.create_task(&format!("T{}", i)).await.unwrap();
        }
        let app = router(test_state(store.clone()));

        let (status, body) = send(app, "POST", "/api/assignments/run-once").await;

        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["report"]["assigned"], 6);
        assert_eq!(json["report"]["waiting"], 1);
        assert_eq!(json["report"]["completed"], 0);
        assert_eq!(json["overview"]["tasks"].as_array().unwrap().len(), 7);
        assert!(json["overview"]["tasks"][0]["state"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_run_once_after_shutdown_is_conflict() {
        let store = InMemoryRotationStore::new();
        store.create_user("A").await.unwrap();
        let task = store.create_task("T1").await.unwrap();
        let state = test_state(store.clone());
        state.shutdown.cancel();

        let (status, _) = send(router(state), "POST", "/api/assignments/run-once").await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            store.get_task(task.id).await.unwrap().unwrap().state,
            TaskState::Waiting
        );
    }

    #[tokio::test]
    async fn test_overview_lists_visited_users_in_order() {
        let store = InMemoryRotationStore::new();
        store.create_user("A").await.unwrap();
        store.create_user("B").await.unwrap();
        store.create_user("C").await.unwrap();
        let task = store.create_task("T1").await.unwrap();
        let state = test_state(store.clone());
        for _ in 0..2 {
            state
                .engine
                .run_cycle(&CancellationToken::new())
                .await
                .unwrap();
        }

        let (status, body) = send(router(state), "GET", "/api/assignments/overview").await;

        assert_eq!(status, StatusCode::OK);
        let overview: OverviewResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(overview.users.len(), 3);
        let summary = overview.tasks.iter().find(|t| t.id == task.id).unwrap();
        let history = store.assignment_history(task.id).await.unwrap();
        let expected: Vec<_> = history.iter().map(|r| r.user_id).collect();
        assert_eq!(summary.visited_user_ids, expected);
        assert_eq!(summary.current_assignee_id, expected.last().copied());
    }

    #[tokio::test]
    async fn test_visited_returns_history_or_404() {
        let store = InMemoryRotationStore::new();
        store.create_user("A").await.unwrap();
        let task = store.insert_task(Task::new("T1")).await.unwrap();
        let state = test_state(store.clone());
        state
            .engine
            .run_cycle(&CancellationToken::new())
            .await
            .unwrap();

        let (status, body) = send(
            router(Arc::clone(&state)),
            "GET",
            &format!("/api/assignments/visited/{}", task.id),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let records: Vec<VisitRecord> = serde_json::from_slice(&body).unwrap();
        assert_eq!(records.len(), 1);

        let (status, _) = send(
            router(state),
            "GET",
            &format!("/api/assignments/visited/{}", uuid::Uuid::new_v4()),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
