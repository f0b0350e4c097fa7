//! Caller identity
//!
//! Credentials are verified upstream; the authenticator forwards the resolved subject
//! and role as request headers. This module turns those headers into an [`Actor`]
//! and answers the role questions the handlers ask.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumString};
use utoipa::ToSchema;

use crate::errors::ServiceError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Role {
    Resident,
    Staff,
    Admin,
}

/// The authenticated subject of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Staff and administrators decide on reservations.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Staff | Role::Admin)
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "administrator role required".to_string(),
            ))
        }
    }

    pub fn require_staff(&self) -> Result<(), ServiceError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("staff role required".to_string()))
        }
    }

    /// Residents may only act on their own records; staff may act on anyone's.
    pub fn require_self_or_staff(&self, owner_id: &str) -> Result<(), ServiceError> {
        if self.is_staff() || self.id == owner_id {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "not allowed to act on another requester's reservation".to_string(),
            ))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_value(parts, ACTOR_ID_HEADER)
            .ok_or_else(|| ServiceError::Unauthorized("missing actor identity".to_string()))?;
        let role = header_value(parts, ACTOR_ROLE_HEADER)
            .ok_or_else(|| ServiceError::Unauthorized("missing actor role".to_string()))?;
        let role = Role::from_str(role)
            .map_err(|_| ServiceError::Unauthorized(format!("unknown role '{}'", role)))?;

        Ok(Actor::new(id, role))
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(headers: &[(&str, &str)]) -> Result<Actor, ServiceError> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn extracts_actor_from_headers() {
        let actor = extract(&[("X-Actor-Id", "staff-1"), ("X-Actor-Role", "Staff")])
            .await
            .unwrap();
        assert_eq!(actor, Actor::new("staff-1", Role::Staff));
    }

    #[tokio::test]
    async fn missing_or_unknown_headers_are_unauthorized() {
        assert!(matches!(
            extract(&[("X-Actor-Role", "admin")]).await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            extract(&[("X-Actor-Id", "u1"), ("X-Actor-Role", "mayor")]).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn role_checks() {
        let resident = Actor::new("r1", Role::Resident);
        let staff = Actor::new("s1", Role::Staff);
        let admin = Actor::new("a1", Role::Admin);

        assert!(resident.require_staff().is_err());
        assert!(staff.require_staff().is_ok());
        assert!(staff.require_admin().is_err());
        assert!(admin.require_admin().is_ok());
        assert!(resident.require_self_or_staff("r1").is_ok());
        assert!(resident.require_self_or_staff("r2").is_err());
        assert!(staff.require_self_or_staff("r2").is_ok());
    }
}
