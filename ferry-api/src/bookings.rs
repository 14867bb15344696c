use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::post,
    Json, Router,
};
use ferry_booking::{FinalizeResult, PassengerDataRequest, PaymentInitiation, TicketData};
use ferry_core::{Customer, GatewayTransaction};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct PassengerDataBody {
    customer: Customer,
    tickets: Vec<TicketData>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/claims/{token}/passengers", post(submit_passenger_data))
        .route(
            "/v1/bookings/{order_id}/payment",
            post(initiate_payment).get(payment_status),
        )
}

/// POST /v1/claims/{token}/passengers
/// Turns the claim into a booking and opens the payment window.
async fn submit_passenger_data(
    State(state): State<AppState>,
    Path(token): Path<Uuid>,
    payload: Result<Json<PassengerDataBody>, JsonRejection>,
) -> Result<Json<FinalizeResult>, AppError> {
    let Json(body) = payload?;
    let result = state
        .booking
        .submit_passenger_data(PassengerDataRequest {
            session_token: token,
            customer: body.customer,
            tickets: body.tickets,
        })
        .await?;
    tracing::info!(session = %token, order_id = %result.order_id, "booking created");
    Ok(Json(result))
}

/// POST /v1/bookings/{order_id}/payment
async fn initiate_payment(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentInitiation>, AppError> {
    Ok(Json(state.booking.initiate_payment(&order_id).await?))
}

/// GET /v1/bookings/{order_id}/payment
async fn payment_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<GatewayTransaction>, AppError> {
    Ok(Json(state.booking.payment_status(&order_id).await?))
}
