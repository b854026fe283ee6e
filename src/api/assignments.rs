//! Assignment endpoints: overview, per-task history and the on-demand trigger.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use super::routes::AppState;
use super::types::*;
use crate::rotation::{CycleOutcome, EngineError};
use crate::store::{RotationStore, StoreError};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/overview", get(overview))
        .route("/visited/:task_id", get(visited))
        .route("/run-once", post(run_once))
}

fn store_error(e: StoreError) -> (StatusCode, String) {
    let status = match &e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
        StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn engine_error(e: EngineError) -> (StatusCode, String) {
    match e {
        EngineError::Store(StoreError::Conflict(msg)) => {
            (StatusCode::CONFLICT, format!("Reassignment conflict: {}", msg))
        }
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

async fn build_overview(store: &dyn RotationStore) -> Result<OverviewResponse, StoreError> {
    let users = store
        .list_users()
        .await?
        .into_iter()
        .map(|u| UserSummary {
            id: u.id,
            name: u.name,
            is_active: u.is_active,
        })
        .collect();

    let mut tasks = Vec::new();
    for task in store.list_tasks().await? {
        let mut seen = HashSet::new();
        let visited_user_ids = store
            .assignment_history(task.id)
            .await?
            .into_iter()
            .map(|r| r.user_id)
            .filter(|id| seen.insert(*id))
            .collect();
        tasks.push(TaskSummary {
            id: task.id,
            title: task.title,
            state: task.state,
            current_assignee_id: task.current_assignee_id,
            previous_assignee_id: task.previous_assignee_id,
            visited_user_ids,
        });
    }

    Ok(OverviewResponse { users, tasks })
}

/// All users and tasks with their coverage.
async fn overview(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OverviewResponse>, (StatusCode, String)> {
    build_overview(state.store.as_ref())
        .await
        .map(Json)
        .map_err(store_error)
}

/// Assignment history of one task, oldest first.
async fn visited(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<VisitRecord>>, (StatusCode, String)> {
    if state
        .store
        .get_task(task_id)
        .await
        .map_err(store_error)?
        .is_none()
    {
        return Err((StatusCode::NOT_FOUND, format!("Task {} not found", task_id)));
    }

    let records = state
        .store
        .assignment_history(task_id)
        .await
        .map_err(store_error)?
        .into_iter()
        .map(|r| VisitRecord {
            user_id: r.user_id,
            assigned_at: r.assigned_at,
        })
        .collect();
    Ok(Json(records))
}

/// Run one reassignment cycle now and return the result.
async fn run_once(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RunOnceResponse>, (StatusCode, String)> {
    let cancel = state.shutdown.child_token();
    let report = match state.engine.run_cycle(&cancel).await {
        Ok(CycleOutcome::Completed(report)) => report,
        Ok(CycleOutcome::Aborted) => {
            return Err((
                StatusCode::CONFLICT,
                "Reassignment cycle was cancelled; nothing was changed".to_string(),
            ));
        }
        Err(e) => {
            tracing::warn!("On-demand reassignment failed: {}", e);
            return Err(engine_error(e));
        }
    };

    let overview = build_overview(state.store.as_ref())
        .await
        .map_err(store_error)?;
    Ok(Json(RunOnceResponse { report, overview }))
}
