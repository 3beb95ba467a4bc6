use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

use super::{create_router, AppState};
use crate::auth::testing::token_for;
use crate::billing::{BillingSettings, InvoiceService, StatisticsReporter};
use crate::models::{Client, ExpenseStatus, Expense};
use crate::notifier::testing::RecordingNotifier;
use crate::store::MemoryStore;

const SECRET: &str = "test-secret";

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    client_id: Uuid,
    token: String,
}

async fn setup() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let client_id = Uuid::new_v4();
    store
        .insert_client(Client {
            id: client_id,
            name: "Acme Corp".to_string(),
            email: Some("billing@acme.test".to_string()),
            is_deleted: false,
        })
        .await;

    let invoices = InvoiceService::new(
        store.clone(),
        Arc::new(RecordingNotifier::default()),
        BillingSettings::default(),
    )
    .with_clock(Arc::new(|| NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));

    let state = AppState {
        store: store.clone(),
        invoices: Arc::new(invoices),
        statistics: StatisticsReporter::new(store.clone()),
        jwt_secret: Some(SECRET.to_string()),
    };

    TestApp {
        router: create_router(state),
        store,
        client_id,
        token: token_for(Uuid::new_v4(), SECRET),
    }
}

impl TestApp {
    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn create_manual(&self, amount: f64) -> Value {
        let (status, body) = self
            .call(
                "POST",
                "/invoices",
                Some(json!({
                    "client": self.client_id,
                    "items": [{ "description": "Flat fee", "amount": amount }],
                    "taxRate": 10,
                    "dueDate": "2024-03-31"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let app = setup().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health/db").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    app.store.set_unavailable(true);
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health/db").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_invoices_require_token() {
    let app = setup().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/invoices").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/invoices")
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", token_for(Uuid::new_v4(), "wrong")),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_send_and_pay() {
    let app = setup().await;
    let created = app.create_manual(100.0).await;
    assert_eq!(created["invoiceNumber"], "INV-2024-00001");
    assert_eq!(created["status"], "draft");
    assert_eq!(created["total"].as_f64(), Some(110.0));
    let id = created["id"].as_str().unwrap().to_string();

    let (status, sent) = app.call("POST", &format!("/invoices/{id}/send"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["status"], "sent");

    let (status, body) = app
        .call(
            "POST",
            &format!("/invoices/{id}/payment"),
            Some(json!({ "amount": 50, "method": "check" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partially_paid");
    assert_eq!(body["balance"].as_f64(), Some(60.0));
    assert_eq!(body["payments"].as_array().unwrap().len(), 1);

    let (status, body) = app
        .call(
            "POST",
            &format!("/invoices/{id}/payment"),
            Some(json!({ "amount": 500, "method": "check" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Payment exceeds outstanding balance");

    let (status, detail) = app.call("GET", &format!("/invoices/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["client"]["name"], "Acme Corp");
}

#[tokio::test]
async fn test_unknown_payment_method_is_rejected() {
    let app = setup().await;
    let created = app.create_manual(100.0).await;
    let id = created["id"].as_str().unwrap();

    let (status, _) = app
        .call(
            "POST",
            &format!("/invoices/{id}/payment"),
            Some(json!({ "amount": 10, "method": "bitcoin" })),
        )
        .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_generate_variant_and_delete() {
    let app = setup().await;
    let expense_id = Uuid::new_v4();
    app.store
        .insert_expense(Expense {
            id: expense_id,
            client_id: app.client_id,
            case_id: None,
            description: "Courier".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(),
            amount: dec!(20),
            markup: dec!(10),
            billable: true,
            billable_amount: Expense::billable_amount_for(dec!(20), dec!(10)),
            status: ExpenseStatus::Approved,
            invoiced: false,
            invoice_id: None,
            is_deleted: false,
        })
        .await;

    let (status, created) = app
        .call("POST", "/invoices", Some(json!({ "clientId": app.client_id })))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["items"][0]["description"], "Expense: Courier");
    assert_eq!(created["subtotal"].as_f64(), Some(22.0));
    assert_eq!(created["dueDate"], "2024-03-31");

    let (status, body) = app
        .call("POST", "/invoices", Some(json!({ "clientId": app.client_id })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No unbilled items found for this client");

    let id = created["id"].as_str().unwrap();
    let (status, _) = app.call("DELETE", &format!("/invoices/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!app.store.expense(expense_id).await.unwrap().invoiced);

    let (status, body) = app.call("GET", &format!("/invoices/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Invoice not found");
}

#[tokio::test]
async fn test_missing_client_is_bad_request() {
    let app = setup().await;
    let (status, body) = app
        .call(
            "POST",
            "/invoices",
            Some(json!({ "items": [{ "description": "Fee", "amount": 10 }] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Client is required");
}

#[tokio::test]
async fn test_update_cannot_touch_invoice_number() {
    let app = setup().await;
    let created = app.create_manual(100.0).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = app
        .call(
            "PUT",
            &format!("/invoices/{id}"),
            Some(json!({ "invoiceNumber": "INV-1999-99999", "notes": "Updated" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invoiceNumber"], "INV-2024-00001");
    assert_eq!(body["notes"], "Updated");
}

#[tokio::test]
async fn test_list_filters_and_statistics() {
    let app = setup().await;
    let first = app.create_manual(100.0).await;
    app.create_manual(50.0).await;
    let id = first["id"].as_str().unwrap();
    app.call("POST", &format!("/invoices/{id}/send"), None).await;

    let (status, all) = app.call("GET", "/invoices", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, sent) = app.call("GET", "/invoices?status=sent", None).await;
    assert_eq!(sent.as_array().unwrap().len(), 1);
    assert_eq!(sent[0]["id"], first["id"]);

    let (_, none) = app
        .call("GET", &format!("/invoices?client={}", Uuid::new_v4()), None)
        .await;
    assert!(none.as_array().unwrap().is_empty());

    let (status, stats) = app.call("GET", "/invoices/statistics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["invoiceCount"], 2);
    assert_eq!(stats["totalInvoiced"].as_f64(), Some(165.0));

    let (status, months) = app
        .call("GET", "/invoices/statistics/monthly?from=2024-01-01", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(months[0]["month"], 3);

    let (status, overdue) = app.call("GET", "/invoices/overdue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(overdue.as_array().unwrap().is_empty());

    let (status, utilization) = app.call("GET", "/time/utilization", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(utilization["totalMinutes"], 0);
}
