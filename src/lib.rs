//! Barangay reservation & inventory ledger
//!
//! Residents reserve borrowable items (projectors, tents, chairs) for half-open time
//! windows; staff approve, reject and close those reservations; administrators
//! manage the inventory. Every item-scoped write runs in a serialized critical
//! section so that, at every instant, active reservations never exceed an item's
//! capacity.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod health;
pub mod logging;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{middleware, routing::get, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::db::RetryPolicy;
use crate::events::EventSender;
use crate::services::AppServices;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: EventSender,
    pub services: AppServices,
}

impl AppState {
    /// Wires the services over one connection pool and event channel.
    pub fn new(db: Arc<DatabaseConnection>, config: config::AppConfig, event_sender: EventSender) -> Self {
        let services = AppServices::new(db.clone(), event_sender.clone(), RetryPolicy::from(&config));
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

/// Full HTTP application: health, versioned API and OpenAPI document.
pub fn app_router(state: AppState, logger: slog::Logger) -> Router {
    let logging_state = Arc::new(logging::LoggingState::new(logger));

    Router::new()
        .route("/", get(|| async { "barangay-ledger up" }))
        .nest("/health", health::health_routes())
        .nest("/api/v1", handlers::api_router())
        .merge(openapi::openapi_routes())
        .layer(middleware::from_fn_with_state(
            logging_state,
            logging::logging_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
