use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{created_response, AppState};
use crate::auth::Actor;
use crate::entities::reservation::{self, ReservationStatus};
use crate::errors::ServiceError;
use crate::services::reservation_ledger::NewReservation;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReservationResponse {
    pub id: Uuid,
    pub item_id: Uuid,
    pub requester_id: String,
    pub quantity: i32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub status: ReservationStatus,
    /// Actor behind the latest decision
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<reservation::Model> for ReservationResponse {
    fn from(model: reservation::Model) -> Self {
        Self {
            id: model.id,
            item_id: model.item_id,
            requester_id: model.requester_id,
            quantity: model.quantity,
            window_start: model.window_start,
            window_end: model.window_end,
            status: model.status,
            approved_by: model.approved_by,
            approved_at: model.approved_at,
            reason: model.reason,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReservationRequest {
    pub item_id: Uuid,
    /// Defaults to the caller. Only staff may reserve on someone else's behalf.
    pub requester_id: Option<String>,
    pub quantity: i32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReservationListQuery {
    /// Requester whose reservations to list; defaults to the caller
    pub requester: Option<String>,
}

/// Requester ids are stored trimmed; a blank value means the caller.
fn requester_or_caller(requested: Option<&str>, actor: &Actor) -> String {
    requested
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(actor.id.as_str())
        .to_string()
}

/// Creates the reservations router
pub fn reservations_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reservations).post(create_reservation))
        .route("/:id", get(get_reservation))
        .route("/:id/approve", post(approve_reservation))
        .route("/:id/reject", post(reject_reservation))
        .route("/:id/cancel", post(cancel_reservation))
        .route("/:id/complete", post(complete_reservation))
}

/// Request a reservation
#[utoipa::path(
    post,
    path = "/api/v1/reservations",
    request_body = CreateReservationRequest,
    responses(
        (status = 201, description = "Reservation recorded as pending", body = ReservationResponse),
        (status = 400, description = "Invalid quantity or window", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Capacity conflict; details lists the blocking reservations", body = crate::errors::ErrorResponse)
    ),
    tag = "reservations"
)]
pub async fn create_reservation(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateReservationRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let requester_id = requester_or_caller(payload.requester_id.as_deref(), &actor);
    actor.require_self_or_staff(&requester_id)?;

    let created = state
        .services
        .ledger
        .create(NewReservation {
            item_id: payload.item_id,
            requester_id,
            quantity: payload.quantity,
            window_start: payload.window_start,
            window_end: payload.window_end,
        })
        .await?;
    Ok(created_response(ReservationResponse::from(created)))
}

/// List a requester's reservations, newest first
#[utoipa::path(
    get,
    path = "/api/v1/reservations",
    params(ReservationListQuery),
    responses(
        (status = 200, description = "Reservations of the requester", body = [ReservationResponse]),
        (status = 403, description = "Not allowed to view another requester", body = crate::errors::ErrorResponse)
    ),
    tag = "reservations"
)]
pub async fn list_reservations(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ReservationListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let requester_id = requester_or_caller(query.requester.as_deref(), &actor);
    actor.require_self_or_staff(&requester_id)?;

    let reservations = state.services.ledger.list_by_requester(&requester_id).await?;
    Ok(Json(
        reservations
            .into_iter()
            .map(ReservationResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Get a reservation
#[utoipa::path(
    get,
    path = "/api/v1/reservations/{id}",
    params(("id" = Uuid, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Reservation found", body = ReservationResponse),
        (status = 404, description = "Reservation not found", body = crate::errors::ErrorResponse)
    ),
    tag = "reservations"
)]
pub async fn get_reservation(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let found = state.services.ledger.get(id).await?;
    actor.require_self_or_staff(&found.requester_id)?;
    Ok(Json(ReservationResponse::from(found)))
}

/// Approve a pending reservation
#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/approve",
    params(("id" = Uuid, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Reservation approved", body = ReservationResponse),
        (status = 403, description = "Staff role required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Not pending, or capacity no longer available", body = crate::errors::ErrorResponse)
    ),
    tag = "reservations"
)]
pub async fn approve_reservation(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_staff()?;
    let approved = state.services.lifecycle.approve(id, &actor.id).await?;
    Ok(Json(ReservationResponse::from(approved)))
}

/// Reject a pending reservation
#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/reject",
    params(("id" = Uuid, Path, description = "Reservation id")),
    request_body = ReasonRequest,
    responses(
        (status = 200, description = "Reservation rejected", body = ReservationResponse),
        (status = 400, description = "Reason missing", body = crate::errors::ErrorResponse),
        (status = 409, description = "Not pending", body = crate::errors::ErrorResponse)
    ),
    tag = "reservations"
)]
pub async fn reject_reservation(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReasonRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_staff()?;
    let rejected = state
        .services
        .lifecycle
        .reject(id, &actor.id, &payload.reason)
        .await?;
    Ok(Json(ReservationResponse::from(rejected)))
}

/// Cancel a pending or approved reservation
#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/cancel",
    params(("id" = Uuid, Path, description = "Reservation id")),
    request_body = ReasonRequest,
    responses(
        (status = 200, description = "Reservation cancelled", body = ReservationResponse),
        (status = 400, description = "Reason missing", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the requester", body = crate::errors::ErrorResponse),
        (status = 409, description = "Missing or already closed", body = crate::errors::ErrorResponse)
    ),
    tag = "reservations"
)]
pub async fn cancel_reservation(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReasonRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    if !actor.is_staff() {
        match state.services.ledger.get(id).await {
            Ok(existing) => actor.require_self_or_staff(&existing.requester_id)?,
            // A missing reservation is reported by the transition itself.
            Err(ServiceError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    let cancelled = state
        .services
        .lifecycle
        .cancel(id, &actor.id, &payload.reason)
        .await?;
    Ok(Json(ReservationResponse::from(cancelled)))
}

/// Mark an approved reservation as returned
#[utoipa::path(
    post,
    path = "/api/v1/reservations/{id}/complete",
    params(("id" = Uuid, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Reservation completed", body = ReservationResponse),
        (status = 409, description = "Not approved", body = crate::errors::ErrorResponse)
    ),
    tag = "reservations"
)]
pub async fn complete_reservation(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_staff()?;
    let completed = state.services.lifecycle.complete(id, &actor.id).await?;
    Ok(Json(ReservationResponse::from(completed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    #[test]
    fn requester_is_trimmed_and_defaults_to_caller() {
        let resident = Actor::new("resident-1", Role::Resident);
        assert_eq!(requester_or_caller(Some("  resident-2 "), &resident), "resident-2");
        assert_eq!(requester_or_caller(Some("   "), &resident), "resident-1");
        assert_eq!(requester_or_caller(None, &resident), "resident-1");
    }
}
