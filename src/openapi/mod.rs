use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::handlers::{items, reservations};
use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Barangay Reservation Ledger API",
        version = "0.1.0",
        description = r#"
Borrowing of barangay items and equipment: inventory, reservation requests,
staff decisions and availability checks.

## Authentication

Credentials are checked by the upstream authenticator, which forwards the caller as
`X-Actor-Id` and `X-Actor-Role` (`resident`, `staff` or `admin`).

## Conflicts

A request that would push an item over capacity at any instant of its window is
answered with `409 Conflict`; `details` lists the reservations it collides with.
"#
    ),
    paths(
        crate::health::health_check,
        items::list_items,
        items::create_item,
        items::get_item,
        items::update_item,
        items::delete_item,
        items::adjust_available,
        items::restock_item,
        items::list_item_reservations,
        items::check_availability,
        reservations::create_reservation,
        reservations::list_reservations,
        reservations::get_reservation,
        reservations::approve_reservation,
        reservations::reject_reservation,
        reservations::cancel_reservation,
        reservations::complete_reservation,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::entities::reservation::ReservationStatus,
        crate::services::inventory::NewItem,
        crate::services::inventory::ItemPatch,
        items::ItemResponse,
        items::AdjustAvailableRequest,
        items::AvailabilityRequest,
        items::AvailabilityResponse,
        reservations::ReservationResponse,
        reservations::CreateReservationRequest,
        reservations::ReasonRequest,
    )),
    tags(
        (name = "items", description = "Borrowable item inventory"),
        (name = "reservations", description = "Reservation requests and decisions"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

/// Serves the generated OpenAPI document
pub fn openapi_routes() -> Router<AppState> {
    Router::new().route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
}
