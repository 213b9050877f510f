//! Common test utilities for clinic-billing-service integration tests.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use clinic_billing_service::services::{init_metrics, BillingStore, Database, InMemoryStore};
use clinic_billing_service::startup::{router, AppState};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use service_core::observability::init_test_tracing;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    init_test_tracing("info,clinic_billing_service=debug,sqlx=warn");
}

/// Router backed by a fresh in-memory store.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
}

pub fn spawn_app() -> TestApp {
    init_tracing();
    init_metrics();

    let store = Arc::new(InMemoryStore::new());
    let shared: Arc<dyn BillingStore> = store.clone();
    TestApp {
        router: router(AppState::new(shared)),
        store,
    }
}

/// Postgres store for `TEST_DATABASE_URL`, or `None` when it is not set.
pub async fn postgres_store() -> Option<Database> {
    init_tracing();
    init_metrics();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set - skipping PostgreSQL test");
        return None;
    };
    let db = Database::new(&url, 5, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations()
        .await
        .expect("Failed to run migrations");
    Some(db)
}

pub fn dec(s: &str) -> Decimal {
    s.parse().expect("valid decimal")
}

/// Read a decimal-string field out of a JSON value.
pub fn dec_at(value: &Value, key: &str) -> Decimal {
    dec(value[key]
        .as_str()
        .unwrap_or_else(|| panic!("{key} is not a string in {value}")))
}

impl TestApp {
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self.raw(method, uri, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn raw(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn create_patient(&self, name: &str) -> Uuid {
        let (status, body) = self.post("/patients", json!({ "name": name })).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["patient_id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn create_percent_doctor(&self, name: &str, percent: &str, tds: &str) -> Uuid {
        let (status, body) = self
            .post(
                "/doctors",
                json!({
                    "name": name,
                    "terms": { "basis": "percent", "percent": percent },
                    "tds_percent": tds
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["doctor_id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn create_flat_doctor(&self, name: &str, amount: &str, tds: &str) -> Uuid {
        let (status, body) = self
            .post(
                "/doctors",
                json!({
                    "name": name,
                    "terms": { "basis": "flat", "amount": amount },
                    "tds_percent": tds
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["doctor_id"].as_str().unwrap().parse().unwrap()
    }

    /// Create a visit. `lab` is a single unit at that rate.
    pub async fn create_visit(
        &self,
        patient_id: Uuid,
        doctor_id: Option<Uuid>,
        root_visit_id: Option<Uuid>,
        date: &str,
        rate: &str,
        lab: &str,
    ) -> Uuid {
        let (status, body) = self
            .post(
                "/visits",
                json!({
                    "patient_id": patient_id,
                    "root_visit_id": root_visit_id,
                    "doctor_id": doctor_id,
                    "case_number": format!("CASE-{date}"),
                    "operation": "Root canal",
                    "visit_date": date,
                    "rate": rate,
                    "discount": "0",
                    "lab_unit_rate": lab,
                    "lab_quantity": "1",
                    "doctor_commission_percent": null
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["visit_id"].as_str().unwrap().parse().unwrap()
    }

    /// Record a checkout and return the raw response.
    pub async fn pay(
        &self,
        patient_id: Uuid,
        total: &str,
        lines: &[(Uuid, &str)],
        date: &str,
    ) -> (StatusCode, Value) {
        let allocations: Vec<Value> = lines
            .iter()
            .map(|(visit_id, amount)| json!({ "visit_id": visit_id, "amount": amount }))
            .collect();
        self.post(
            &format!("/patients/{patient_id}/payments"),
            json!({
                "total_amount": total,
                "allocations": allocations,
                "payment_date": date,
                "mode": "cash"
            }),
        )
        .await
    }
}
