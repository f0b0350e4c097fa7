#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use barangay_ledger::{
    config::AppConfig,
    db,
    entities::{item, reservation},
    events::{Event, EventSender},
    logging::discard_logger,
    services::{inventory::NewItem, reservation_ledger::NewReservation, AppServices},
    AppState,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    events: Mutex<mpsc::Receiver<Event>>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // Every connection to `sqlite::memory:` is its own database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.transaction_retry_backoff_ms = 1;
        cfg.event_channel_capacity = 4096;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = EventSender::channel(cfg.event_channel_capacity);
        let state = AppState::new(Arc::new(pool), cfg, event_sender);
        let router = barangay_ledger::app_router(state.clone(), discard_logger());

        Self {
            router,
            state,
            events: Mutex::new(event_rx),
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    /// Events emitted since the last call.
    pub async fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().await;
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn seed_item(&self, name: &str, max_quantity: i32) -> item::Model {
        self.services()
            .inventory
            .create_item(NewItem {
                name: name.to_string(),
                description: format!("{} for barangay events", name),
                category: "equipment".to_string(),
                location: "barangay hall".to_string(),
                max_quantity,
                initial_available: None,
            })
            .await
            .expect("seed item")
    }

    pub async fn reserve(
        &self,
        item_id: Uuid,
        requester: &str,
        quantity: i32,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<reservation::Model, barangay_ledger::errors::ServiceError> {
        self.services()
            .ledger
            .create(NewReservation {
                item_id,
                requester_id: requester.to_string(),
                quantity,
                window_start: window.0,
                window_end: window.1,
            })
            .await
    }

    /// Sends a request through the full router. `actor` is `(id, role)`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        actor: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = actor {
            builder = builder.header("X-Actor-Id", id).header("X-Actor-Role", role);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

/// `hour:00` UTC on the given day of June 2031.
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 6, day, hour, 0, 0).unwrap()
}

pub fn window(day: u32, start_hour: u32, end_hour: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    (at(day, start_hour), at(day, end_hour))
}
