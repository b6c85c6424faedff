use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use daytrader::{
    config::Settings,
    models::CommandResponse,
    routes,
    services::{FixedQuoteSource, InMemoryEventStore, InMemoryLedgerStore},
    AppState,
};

fn test_app() -> (Router, Arc<InMemoryEventStore>) {
    let settings = Settings {
        audit_backoff: Duration::from_millis(1),
        ..Settings::default()
    };
    let events = Arc::new(InMemoryEventStore::new());
    let quotes = Arc::new(FixedQuoteSource::new().with_price("ABC", Decimal::from(20)));

    let state = AppState::new(settings, Arc::new(InMemoryLedgerStore::new()), events.clone(), quotes);
    (routes::app(state), events)
}

fn dec(v: &Value) -> Decimal {
    Decimal::from_str(v.as_str().unwrap()).unwrap()
}

async fn post(app: &Router, body: Value) -> (StatusCode, CommandResponse) {
    let req = Request::builder()
        .method("POST")
        .uri("/command")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();

    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _) = test_app();
    let req = Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap();

    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn add_opens_account_and_reports_balance() {
    let (app, _) = test_app();

    let (status, res) = post(&app, json!({"Command": "ADD", "Username": "alice", "Amount": "100.50\r"})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(res.is_ok(), "{}", res.error);
    assert_eq!(res.command, "ADD");

    let data = res.json().unwrap();
    assert_eq!(data["username"], "alice");
    assert_eq!(dec(&data["balance"]), Decimal::from_str("100.50").unwrap());
}

#[tokio::test]
async fn buy_then_commit_moves_cash_into_shares() {
    let (app, _) = test_app();
    post(&app, json!({"Command": "ADD", "Username": "bob", "Amount": "100"})).await;

    let (_, staged) = post(&app, json!({"Command": "BUY", "Username": "bob", "Stock": "abc", "Amount": "40"})).await;
    assert!(staged.is_ok(), "{}", staged.error);
    let data = staged.json().unwrap();
    assert_eq!(data["staged"]["stock"], "ABC");
    assert_eq!(dec(&data["staged"]["price"]), Decimal::from(20));

    let (_, committed) = post(&app, json!({"Command": "COMMIT_BUY", "Username": "bob"})).await;
    assert!(committed.is_ok(), "{}", committed.error);
    let data = committed.json().unwrap();
    assert_eq!(dec(&data["balance"]), Decimal::from(60));
    assert_eq!(dec(&data["shares"]), Decimal::from(2));

    let (_, again) = post(&app, json!({"Command": "COMMIT_BUY", "Username": "bob"})).await;
    assert!(!again.is_ok());
    assert!(again.data.is_empty());
}

#[tokio::test]
async fn validation_failures_come_back_in_the_envelope() {
    let (app, _) = test_app();

    let (status, res) = post(&app, json!({"Command": "BUY", "Username": "carol", "Amount": "5"})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(res.error.contains("invalid command"));

    let (_, res) = post(&app, json!({"Command": "TELEPORT", "Username": "carol"})).await;
    assert!(res.error.contains("invalid command"));

    let (_, res) = post(&app, json!({"Command": "ADD", "Username": "carol", "Amount": "ten"})).await;
    assert!(res.error.contains("invalid command"));
}

#[tokio::test]
async fn malformed_body_is_answered_with_an_error() {
    let (app, _) = test_app();
    let req = Request::builder()
        .method("POST")
        .uri("/command")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();

    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let body: CommandResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(!body.is_ok());
}

#[tokio::test]
async fn unknown_user_is_rejected_without_quoting() {
    let (app, _) = test_app();

    let (_, res) = post(&app, json!({"Command": "BUY", "Username": "ghost", "Stock": "ABC", "Amount": "5"})).await;
    assert!(res.error.contains("account not found"));

    let (_, res) = post(&app, json!({"Command": "DISPLAY_SUMMARY", "Username": "ghost"})).await;
    assert!(res.error.contains("account not found"));
}

#[tokio::test]
async fn dumplog_returns_recorded_events() {
    let (app, events) = test_app();
    post(&app, json!({"Command": "ADD", "Username": "dave", "Amount": "10"})).await;

    // audit writes are detached
    for _ in 0..100 {
        if events.events().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (_, res) = post(&app, json!({"Command": "DUMPLOG", "Username": "dave", "Filename": "out.xml"})).await;
    assert!(res.is_ok(), "{}", res.error);
    let data = res.json().unwrap();
    assert_eq!(data["filename"], "out.xml");

    let kinds: Vec<&str> = data["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["eventType"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"userCommand"));
    assert!(kinds.contains(&"accountTransaction"));
}

#[tokio::test]
async fn deposit_overflow_is_answered_with_an_error() {
    let (app, _) = test_app();
    let max = "79228162514264337593543950335";

    let (_, first) = post(&app, json!({"Command": "ADD", "Username": "erin", "Amount": max})).await;
    assert!(first.is_ok(), "{}", first.error);

    let (status, second) = post(&app, json!({"Command": "ADD", "Username": "erin", "Amount": max})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(second.error.contains("out of range"), "{}", second.error);

    let (_, summary) = post(&app, json!({"Command": "DISPLAY_SUMMARY", "Username": "erin"})).await;
    assert_eq!(dec(&summary.json().unwrap()["balance"]), Decimal::MAX);
}
