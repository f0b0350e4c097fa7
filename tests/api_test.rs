mod common;

use axum::http::{Method, StatusCode};
use common::{at, TestApp};
use serde_json::{json, Value};

const ADMIN: Option<(&str, &str)> = Some(("admin-1", "admin"));
const STAFF: Option<(&str, &str)> = Some(("staff-1", "staff"));
const RESIDENT: Option<(&str, &str)> = Some(("resident-1", "resident"));
const NEIGHBOR: Option<(&str, &str)> = Some(("resident-2", "resident"));

async fn create_projector(app: &TestApp, max_quantity: i32) -> String {
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/items",
            ADMIN,
            Some(json!({
                "name": "Projector",
                "category": "electronics",
                "location": "barangay hall",
                "max_quantity": max_quantity
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

fn reservation_body(item_id: &str, quantity: i32, start: u32, end: u32) -> Value {
    json!({
        "item_id": item_id,
        "quantity": quantity,
        "window_start": at(2, start).to_rfc3339(),
        "window_end": at(2, end).to_rfc3339(),
    })
}

#[tokio::test]
async fn health_and_openapi_are_served() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "up");

    let (status, body) = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/reservations"].is_object());
}

#[tokio::test]
async fn requests_without_identity_are_unauthorized() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/api/v1/items", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = app
        .request(
            Method::GET,
            "/api/v1/items",
            Some(("someone", "barangay-captain")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn only_admins_manage_items() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/items",
            STAFF,
            Some(json!({ "name": "Tent", "max_quantity": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let id = create_projector(&app, 2).await;
    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/items/{id}"), RESIDENT, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available_quantity"], 2);

    let (status, _) = app
        .request(Method::POST, &format!("/api/v1/items/{id}/restock"), RESIDENT, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/items/{id}/available"),
            ADMIN,
            Some(json!({ "available_quantity": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = app
        .request(
            Method::PATCH,
            &format!("/api/v1/items/{id}"),
            ADMIN,
            Some(json!({ "location": "health center" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["location"], "health center");

    let (status, body) = app
        .request(Method::GET, "/api/v1/items?page=1&limit=10", RESIDENT, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, _) = app
        .request(Method::DELETE, &format!("/api/v1/items/{id}"), ADMIN, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .request(Method::GET, &format!("/api/v1/items/{id}"), ADMIN, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reservation_flow_over_http() {
    let app = TestApp::new().await;
    let item_id = create_projector(&app, 2).await;

    let (status, a) = app
        .request(
            Method::POST,
            "/api/v1/reservations",
            RESIDENT,
            Some(reservation_body(&item_id, 1, 9, 11)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{a}");
    assert_eq!(a["status"], "pending");
    assert_eq!(a["requester_id"], "resident-1");
    let a_id = a["id"].as_str().unwrap().to_string();

    // Residents cannot decide.
    let (status, _) = app
        .request(Method::POST, &format!("/api/v1/reservations/{a_id}/approve"), RESIDENT, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, approved) = app
        .request(Method::POST, &format!("/api/v1/reservations/{a_id}/approve"), STAFF, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["approved_by"], "staff-1");

    let (status, verdict) = app
        .request(
            Method::POST,
            &format!("/api/v1/items/{item_id}/availability"),
            NEIGHBOR,
            Some(json!({
                "quantity": 2,
                "window_start": at(2, 10).to_rfc3339(),
                "window_end": at(2, 12).to_rfc3339(),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["admissible"], false);
    assert_eq!(verdict["conflicting_reservation_ids"], json!([a_id]));

    let (status, conflict) = app
        .request(
            Method::POST,
            "/api/v1/reservations",
            NEIGHBOR,
            Some(reservation_body(&item_id, 2, 10, 12)),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["details"], json!([a_id]));

    // The neighbour may neither see nor cancel someone else's reservation.
    let (status, _) = app
        .request(Method::GET, &format!("/api/v1/reservations/{a_id}"), NEIGHBOR, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/reservations/{a_id}/cancel"),
            NEIGHBOR,
            Some(json!({ "reason": "need it more" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/reservations/{a_id}/cancel"),
            RESIDENT,
            Some(json!({ "reason": " " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, cancelled) = app
        .request(
            Method::POST,
            &format!("/api/v1/reservations/{a_id}/cancel"),
            RESIDENT,
            Some(json!({ "reason": "event cancelled" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/reservations/{a_id}/cancel"),
            RESIDENT,
            Some(json!({ "reason": "event cancelled" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, b) = app
        .request(
            Method::POST,
            "/api/v1/reservations",
            NEIGHBOR,
            Some(reservation_body(&item_id, 2, 10, 12)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{b}");

    let (status, mine) = app
        .request(Method::GET, "/api/v1/reservations", RESIDENT, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (status, schedule) = app
        .request(
            Method::GET,
            &format!("/api/v1/items/{item_id}/reservations?active=true"),
            STAFF,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(schedule.as_array().unwrap().len(), 1);
    assert_eq!(schedule[0]["id"], b["id"]);
}

#[tokio::test]
async fn residents_reserve_only_for_themselves() {
    let app = TestApp::new().await;
    let item_id = create_projector(&app, 1).await;

    let mut body = reservation_body(&item_id, 1, 9, 10);
    body["requester_id"] = json!("resident-9");
    let (status, _) = app
        .request(Method::POST, "/api/v1/reservations", RESIDENT, Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = app
        .request(Method::POST, "/api/v1/reservations", STAFF, Some(body))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["requester_id"], "resident-9");

    let (status, _) = app
        .request(
            Method::GET,
            "/api/v1/reservations?requester=resident-9",
            RESIDENT,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut padded = reservation_body(&item_id, 1, 11, 12);
    padded["requester_id"] = json!("  resident-1 ");
    let (status, mine) = app
        .request(Method::POST, "/api/v1/reservations", RESIDENT, Some(padded))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{mine}");
    assert_eq!(mine["requester_id"], "resident-1");

    let (status, listed) = app
        .request(
            Method::GET,
            "/api/v1/reservations?requester=%20resident-1%20",
            RESIDENT,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], mine["id"]);
}
