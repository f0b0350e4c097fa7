pub mod items;
pub mod reservations;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Standard no content response
pub fn no_content_response() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// Pagination parameters for list operations
#[derive(Debug, Deserialize, Serialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PaginationParams {
    /// Resolves the page and limit against the configured defaults, capping the limit.
    pub fn resolve(&self, default_limit: u32, max_limit: u32) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(default_limit as u64)
            .clamp(1, max_limit as u64);
        (page, limit)
    }
}

/// Paginated list envelope
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

/// Routes mounted under `/api/v1`
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/items", items::items_router())
        .nest("/reservations", reservations::reservations_router())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_caps() {
        let params = PaginationParams {
            page: None,
            limit: None,
        };
        assert_eq!(params.resolve(20, 100), (1, 20));

        let params = PaginationParams {
            page: Some(0),
            limit: Some(5000),
        };
        assert_eq!(params.resolve(20, 100), (1, 100));
    }
}
