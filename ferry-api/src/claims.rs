use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use ferry_booking::{AllocationRequest, AllocationResult, SessionSnapshot};
use ferry_core::{Availability, ClassId, ScheduleId};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/claims", post(allocate))
        .route("/v1/claims/{token}", get(snapshot))
        .route(
            "/v1/schedules/{schedule_id}/classes/{class_id}/availability",
            get(availability),
        )
}

/// POST /v1/claims
async fn allocate(
    State(state): State<AppState>,
    payload: Result<Json<AllocationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AllocationResult>), AppError> {
    let Json(req) = payload?;
    let result = state.booking.allocate_tickets(req).await?;
    tracing::info!(
        session = %result.session_token,
        tickets = result.ticket_ids.len(),
        "claim session opened"
    );
    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /v1/claims/{token}
async fn snapshot(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.booking.session_snapshot(token).await?))
}

async fn availability(
    State(state): State<AppState>,
    Path((schedule_id, class_id)): Path<(ScheduleId, ClassId)>,
) -> Result<Json<Availability>, AppError> {
    Ok(Json(state.booking.availability(schedule_id, class_id).await?))
}
