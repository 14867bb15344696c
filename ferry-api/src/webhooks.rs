use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use ferry_booking::{PaymentCallback, ReconcileOutcome};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_callback))
}

/// POST /v1/webhooks/payments
/// Receives payment status updates from the gateway. Duplicate deliveries
/// answer 200 with `already_resolved`.
async fn handle_payment_callback(
    State(state): State<AppState>,
    payload: Result<Json<PaymentCallback>, JsonRejection>,
) -> Result<Json<ReconcileOutcome>, AppError> {
    let Json(callback) = payload?;
    tracing::info!(
        order_id = %callback.merchant_ref,
        status = %callback.status,
        "received payment callback"
    );
    Ok(Json(state.booking.handle_payment_callback(callback).await?))
}
