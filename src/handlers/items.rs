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
use validator::Validate;

use super::reservations::ReservationResponse;
use super::{created_response, no_content_response, AppState, Page, PaginationParams};
use crate::auth::Actor;
use crate::entities::item;
use crate::errors::ServiceError;
use crate::services::availability::Availability;
use crate::services::inventory::{ItemPatch, NewItem};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ItemResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub max_quantity: i32,
    pub available_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<item::Model> for ItemResponse {
    fn from(model: item::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            category: model.category,
            location: model.location,
            max_quantity: model.max_quantity,
            available_quantity: model.available_quantity,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AdjustAvailableRequest {
    #[validate(range(min = 0))]
    pub available_quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AvailabilityRequest {
    pub quantity: i32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AvailabilityResponse {
    pub admissible: bool,
    /// Reservations blocking the request, in window order
    pub conflicting_reservation_ids: Vec<Uuid>,
}

impl From<Availability> for AvailabilityResponse {
    fn from(outcome: Availability) -> Self {
        match outcome {
            Availability::Admissible => Self {
                admissible: true,
                conflicting_reservation_ids: Vec::new(),
            },
            Availability::Conflict(ids) => Self {
                admissible: false,
                conflicting_reservation_ids: ids,
            },
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ItemReservationsQuery {
    /// Only pending and approved reservations
    #[serde(default)]
    pub active: bool,
}

/// Creates the items router
pub fn items_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_items).post(create_item))
        .route(
            "/:id",
            get(get_item).patch(update_item).delete(delete_item),
        )
        .route("/:id/available", post(adjust_available))
        .route("/:id/restock", post(restock_item))
        .route("/:id/reservations", get(list_item_reservations))
        .route("/:id/availability", post(check_availability))
}

/// List borrowable items
#[utoipa::path(
    get,
    path = "/api/v1/items",
    params(PaginationParams),
    responses(
        (status = 200, description = "Items ordered by name", body = Page<ItemResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    tag = "items"
)]
pub async fn list_items(
    State(state): State<AppState>,
    _actor: Actor,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let (page, limit) = params.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let (items, total) = state.services.inventory.list_items(page, limit).await?;

    Ok(Json(Page {
        items: items.into_iter().map(ItemResponse::from).collect::<Vec<_>>(),
        total,
        page,
        limit,
    }))
}

/// Register a new item
#[utoipa::path(
    post,
    path = "/api/v1/items",
    request_body = NewItem,
    responses(
        (status = 201, description = "Item created", body = ItemResponse),
        (status = 400, description = "Invalid item", body = crate::errors::ErrorResponse),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse)
    ),
    tag = "items"
)]
pub async fn create_item(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<NewItem>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_admin()?;
    let created = state.services.inventory.create_item(payload).await?;
    Ok(created_response(ItemResponse::from(created)))
}

/// Get an item
#[utoipa::path(
    get,
    path = "/api/v1/items/{id}",
    params(("id" = Uuid, Path, description = "Item id")),
    responses(
        (status = 200, description = "Item found", body = ItemResponse),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse)
    ),
    tag = "items"
)]
pub async fn get_item(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let item = state.services.inventory.get_item(id).await?;
    Ok(Json(ItemResponse::from(item)))
}

/// Edit an item
#[utoipa::path(
    patch,
    path = "/api/v1/items/{id}",
    params(("id" = Uuid, Path, description = "Item id")),
    request_body = ItemPatch,
    responses(
        (status = 200, description = "Item updated", body = ItemResponse),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Active reservations exceed the new capacity", body = crate::errors::ErrorResponse)
    ),
    tag = "items"
)]
pub async fn update_item(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(patch): Json<ItemPatch>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_admin()?;
    let item = state.services.inventory.update_item(id, patch).await?;
    Ok(Json(ItemResponse::from(item)))
}

/// Delete an item and its closed reservation history
#[utoipa::path(
    delete,
    path = "/api/v1/items/{id}",
    params(("id" = Uuid, Path, description = "Item id")),
    responses(
        (status = 204, description = "Item deleted"),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item has active reservations", body = crate::errors::ErrorResponse)
    ),
    tag = "items"
)]
pub async fn delete_item(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_admin()?;
    state.services.inventory.delete_item(id).await?;
    Ok(no_content_response())
}

/// Override the on-shelf quantity
#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/available",
    params(("id" = Uuid, Path, description = "Item id")),
    request_body = AdjustAvailableRequest,
    responses(
        (status = 200, description = "Quantity adjusted", body = ItemResponse),
        (status = 400, description = "Quantity outside [0, max_quantity]", body = crate::errors::ErrorResponse)
    ),
    tag = "items"
)]
pub async fn adjust_available(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdjustAvailableRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_admin()?;
    payload.validate()?;
    let item = state
        .services
        .inventory
        .adjust_available(id, payload.available_quantity)
        .await?;
    Ok(Json(ItemResponse::from(item)))
}

/// Reset the on-shelf quantity to the item's capacity
#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/restock",
    params(("id" = Uuid, Path, description = "Item id")),
    responses(
        (status = 200, description = "Item restocked", body = ItemResponse),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse)
    ),
    tag = "items"
)]
pub async fn restock_item(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_admin()?;
    let item = state.services.inventory.restock(id).await?;
    Ok(Json(ItemResponse::from(item)))
}

/// Schedule of an item
#[utoipa::path(
    get,
    path = "/api/v1/items/{id}/reservations",
    params(("id" = Uuid, Path, description = "Item id"), ItemReservationsQuery),
    responses(
        (status = 200, description = "Reservations by window start", body = [ReservationResponse]),
        (status = 403, description = "Staff role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse)
    ),
    tag = "items"
)]
pub async fn list_item_reservations(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Query(query): Query<ItemReservationsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_staff()?;
    state.services.inventory.get_item(id).await?;

    let reservations = if query.active {
        state.services.ledger.list_active_by_item(id).await?
    } else {
        state.services.ledger.list_by_item(id).await?
    };
    Ok(Json(
        reservations
            .into_iter()
            .map(ReservationResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Ask whether a quantity could be reserved over a window
#[utoipa::path(
    post,
    path = "/api/v1/items/{id}/availability",
    params(("id" = Uuid, Path, description = "Item id")),
    request_body = AvailabilityRequest,
    responses(
        (status = 200, description = "Availability verdict", body = AvailabilityResponse),
        (status = 400, description = "Invalid window or quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse)
    ),
    tag = "items"
)]
pub async fn check_availability(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .services
        .availability
        .check_availability(id, payload.quantity, payload.window_start, payload.window_end)
        .await?;
    Ok(Json(AvailabilityResponse::from(outcome)))
}
