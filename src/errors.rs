use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::{DbErr, RuntimeErr};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Conflict",
    "message": "Capacity conflict with 1 reservation(s)",
    "details": ["550e8400-e29b-41d4-a716-446655440000"],
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request", "Conflict")
    #[schema(example = "Conflict")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Conflicting reservation ids for capacity conflicts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<Uuid>>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Capacity conflict with {} reservation(s)", .0.len())]
    CapacityConflict(Vec<Uuid>),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found or invalid state: {0}")]
    NotFoundOrInvalidState(String),

    #[error("Transaction aborted: {0}")]
    TransactionAbort(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

/// SQLSTATE / SQLite result codes that mean "try again", not "you lost".
const TRANSIENT_CODES: [&str; 6] = ["40001", "40P01", "5", "6", "517", "1213"];

impl ServiceError {
    /// Classifies a database error, turning serialization failures, deadlocks and
    /// SQLite busy/locked results into `TransactionAbort`.
    pub fn db_error(error: DbErr) -> Self {
        if is_transient(&error) {
            ServiceError::TransactionAbort(error.to_string())
        } else {
            ServiceError::DatabaseError(error)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::TransactionAbort(_))
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::CapacityConflict(_)
            | Self::Conflict(_)
            | Self::NotFoundOrInvalidState(_)
            | Self::TransactionAbort(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::TransactionAbort(_) => "Concurrent update, please retry".to_string(),
            _ => self.to_string(),
        }
    }
}

fn is_transient(error: &DbErr) -> bool {
    let runtime = match error {
        DbErr::Conn(e) | DbErr::Exec(e) | DbErr::Query(e) => e,
        _ => return false,
    };
    match runtime {
        RuntimeErr::SqlxError(sea_orm::sqlx::Error::Database(db)) => {
            let code_matches = db
                .code()
                .map(|code| TRANSIENT_CODES.contains(&code.as_ref()))
                .unwrap_or(false);
            code_matches || db.message().contains("database is locked")
        }
        RuntimeErr::SqlxError(sea_orm::sqlx::Error::PoolTimedOut) => true,
        _ => false,
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.response_message();
        let details = match self {
            ServiceError::CapacityConflict(ids) => Some(ids),
            _ => None,
        };

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            details,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::CapacityConflict(vec![]).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::NotFoundOrInvalidState("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("pool exploded".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("secret".into())).response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::ValidationError("reason is required".into()).response_message(),
            "Validation error: reason is required"
        );
    }

    #[test]
    fn custom_db_errors_are_not_transient() {
        let err = ServiceError::db_error(DbErr::Custom("boom".into()));
        assert!(!err.is_transient());
        assert!(matches!(err, ServiceError::DatabaseError(_)));
    }

    #[tokio::test]
    async fn capacity_conflict_response_lists_reservations() {
        let id = Uuid::new_v4();
        let response = ServiceError::CapacityConflict(vec![id]).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.details, Some(vec![id]));
        assert_eq!(payload.error, "Conflict");
    }
}
