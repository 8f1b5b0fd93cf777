mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use common::Fixture;
use seat_booking::config::Config;
use seat_booking::{app, AppState};

fn router(f: &Fixture) -> axum::Router {
    let config = Config::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://localhost/booking".to_string()),
        "REDIS_URL" => Some("redis://localhost".to_string()),
        _ => None,
    })
    .unwrap();
    app(Arc::new(AppState {
        booking: f.booking.clone(),
        config,
    }))
}

async fn send(router: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_is_ok() {
    let f = Fixture::new().await;
    let (status, body) = send(&router(&f), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "development");
}

#[tokio::test]
async fn hold_generates_token_and_order_uses_it() {
    let f = Fixture::new().await;
    let app = router(&f);
    let (a1, a2) = (f.seat("1"), f.seat("2"));

    let (status, body) = send(
        &app,
        "POST",
        "/api/seats/hold",
        Some(json!({ "event_id": f.event_id, "seat_ids": [a1, a2] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["holder_token"].as_str().unwrap().to_string();
    assert_eq!(body["held"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        &app,
        "POST",
        "/api/orders",
        Some(json!({
            "event_id": f.event_id,
            "seat_ids": [a1, a2],
            "holder_token": token,
            "buyer_name": "Alice",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["total_amount"], 200);
    assert_eq!(body["status"], "registered");
    let order_id = body["id"].as_i64().unwrap();

    let (status, body) = send(&app, "GET", &format!("/api/orders/{order_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, "POST", &format!("/api/orders/{order_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
}

#[tokio::test]
async fn contended_hold_is_multi_status() {
    let f = Fixture::new().await;
    let app = router(&f);
    let a1 = f.seat("1");

    let hold = |token: &str| json!({ "event_id": f.event_id, "seat_ids": [a1], "holder_token": token });
    let (status, _) = send(&app, "POST", "/api/seats/hold", Some(hold("x"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", "/api/seats/hold", Some(hold("y"))).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["failed"][0]["seat_id"], a1);
    assert_eq!(body["failed"][0]["reason"], "locked");
}

#[tokio::test]
async fn sold_seat_conflict_is_reported() {
    let f = Fixture::new().await;
    let app = router(&f);
    let a1 = f.seat("1");

    let order = |token: &str| {
        json!({
            "event_id": f.event_id,
            "seat_ids": [a1],
            "holder_token": token,
            "buyer_name": "Buyer",
        })
    };
    let (status, _) = send(&app, "POST", "/api/orders", Some(order("x"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "POST", "/api/orders", Some(order("y"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "seat_already_sold");
    assert_eq!(body["details"]["seat_id"], a1);
}

#[tokio::test]
async fn validation_and_not_found_errors() {
    let f = Fixture::new().await;
    let app = router(&f);

    let (status, body) = send(
        &app,
        "POST",
        "/api/seats/hold",
        Some(json!({ "event_id": f.event_id, "seat_ids": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation_error");

    let (status, body) = send(
        &app,
        "POST",
        "/api/seats/hold",
        Some(json!({ "event_id": f.event_id, "seat_ids": [f.seat("1")], "holder_token": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = send(&app, "GET", "/api/orders/424242", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "order_not_found");

    let (status, _) = send(&app, "GET", "/api/events/424242/seats", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listings_hide_holder_tokens() {
    let f = Fixture::new().await;
    let app = router(&f);

    let (status, events) = send(&app, "GET", "/api/events", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events[0]["venue_name"], "Main Hall");

    send(
        &app,
        "POST",
        "/api/seats/hold",
        Some(json!({ "event_id": f.event_id, "seat_ids": [f.seat("1")], "holder_token": "secret" })),
    )
    .await;

    let (status, seats) = send(&app, "GET", &format!("/api/events/{}/seats", f.event_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let seats = seats.as_array().unwrap();
    assert_eq!(seats.len(), 3);
    assert_eq!(seats[0]["label"], "A1");
    assert_eq!(seats[0]["status"], "held");
    assert!(seats.iter().all(|s| s.get("holder_token").is_none()));
}
