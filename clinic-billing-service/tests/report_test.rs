//! Reporting integration tests: waterfall replay, chain sufficiency, and the
//! commission report over HTTP.

mod common;

use axum::http::{Method, StatusCode};
use common::{dec, dec_at, spawn_app};
use serde_json::json;

#[tokio::test]
async fn test_waterfall_recovers_lab_across_payments() {
    let app = spawn_app();
    let patient = app.create_patient("Arjun Nair").await;
    let doctor = app.create_percent_doctor("Dr. Pillai", "50", "10").await;
    let visit = app
        .create_visit(patient, Some(doctor), None, "2026-02-01", "20000", "5000")
        .await;
    app.pay(patient, "3000", &[(visit, "3000")], "2026-02-02").await;
    app.pay(patient, "4000", &[(visit, "4000")], "2026-02-09").await;

    let (status, body) = app.get(&format!("/visits/{visit}/waterfall")).await;

    assert_eq!(status, StatusCode::OK);
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(dec_at(&rows[0], "lab_recovered"), dec("3000"));
    assert_eq!(dec_at(&rows[0], "doctor_gross"), dec("0"));
    assert_eq!(dec_at(&rows[1], "lab_recovered"), dec("2000"));
    assert_eq!(dec_at(&rows[1], "doctor_gross"), dec("1000"));
    assert_eq!(dec_at(&rows[1], "tds"), dec("100"));
    assert_eq!(dec_at(&rows[1], "doctor_net"), dec("900"));
    assert_eq!(dec_at(&rows[1], "clinic_share"), dec("1000"));
}

#[tokio::test]
async fn test_waterfall_keeps_snapshot_after_rate_change() {
    let app = spawn_app();
    let patient = app.create_patient("Sana Q").await;
    let doctor = app.create_percent_doctor("Dr. Varma", "40", "0").await;
    let visit = app
        .create_visit(patient, Some(doctor), None, "2026-02-01", "10000", "0")
        .await;

    // A later rate period does not touch the percent captured on the visit.
    let (status, _) = app
        .post(
            &format!("/doctors/{doctor}/rate-periods"),
            json!({ "commission_percent": "60", "effective_from": "2026-02-01" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    app.pay(patient, "1000", &[(visit, "1000")], "2026-02-05").await;

    let (_, body) = app.get(&format!("/visits/{visit}/waterfall")).await;
    let row = &body["rows"][0];
    assert_eq!(dec_at(row, "commission_percent"), dec("40"));
    assert_eq!(dec_at(row, "doctor_gross"), dec("400"));
}

#[tokio::test]
async fn test_flat_fee_spreads_over_payments() {
    let app = spawn_app();
    let patient = app.create_patient("Ritu B").await;
    let doctor = app.create_flat_doctor("Dr. Ghosh", "2000", "10").await;
    let visit = app
        .create_visit(patient, Some(doctor), None, "2026-02-01", "10000", "0")
        .await;
    for (amount, date) in [("500", "2026-02-02"), ("500", "2026-02-03"), ("1500", "2026-02-04")] {
        let (status, _) = app.pay(patient, amount, &[(visit, amount)], date).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, body) = app.get(&format!("/visits/{visit}/waterfall")).await;
    let gross: Vec<_> = body["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| dec_at(r, "doctor_gross"))
        .collect();
    assert_eq!(gross, vec![dec("500"), dec("500"), dec("1000")]);
    assert_eq!(dec_at(&body["rows"][2], "clinic_share"), dec("500"));
    assert!(body["rows"][2]["commission_percent"].is_null());
}

#[tokio::test]
async fn test_sufficiency_warns_on_short_chain() {
    let app = spawn_app();
    let patient = app.create_patient("Mohan L").await;
    let doctor = app.create_flat_doctor("Dr. Sethi", "8000", "10").await;
    let root = app
        .create_visit(patient, Some(doctor), None, "2026-03-01", "25000", "0")
        .await;
    let step1 = app
        .create_visit(patient, None, Some(root), "2026-03-08", "2000", "1200")
        .await;
    let step2 = app
        .create_visit(patient, None, Some(step1), "2026-03-15", "2000", "800")
        .await;
    app.pay(patient, "7000", &[(root, "7000")], "2026-03-01").await;

    let (status, body) = app.get(&format!("/visits/{step2}/sufficiency")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["root_visit_id"], json!(root));
    assert_eq!(body["visit_count"], json!(3));
    assert_eq!(dec_at(&body, "minimum_needed"), dec("10000"));
    assert_eq!(dec_at(&body, "collected"), dec("7000"));
    assert_eq!(dec_at(&body, "shortfall"), dec("3000"));

    // Advisory only: the chain can still take payments.
    let (status, _) = app.pay(patient, "1000", &[(step1, "1000")], "2026-03-08").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_commission_report_and_csv() {
    let app = spawn_app();
    let patient = app.create_patient("Kumar, Anil").await;
    let percent = app.create_percent_doctor("Dr. Anand", "40", "10").await;
    let flat = app.create_flat_doctor("Dr. Basu", "2000", "10").await;
    let a = app
        .create_visit(patient, Some(percent), None, "2026-04-01", "10000", "2000")
        .await;
    let b = app
        .create_visit(patient, Some(flat), None, "2026-04-01", "6000", "0")
        .await;
    app.pay(patient, "10000", &[(a, "10000")], "2026-04-02").await;
    app.pay(patient, "2500", &[(b, "2500")], "2026-04-03").await;
    app.pay(patient, "1000", &[(b, "1000")], "2026-05-01").await;

    let (status, body) = app
        .get("/reports/commission?from=2026-04-01&to=2026-04-30")
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(dec_at(&rows[0], "doctor_gross"), dec("3200"));
    assert_eq!(dec_at(&rows[0], "clinic_share"), dec("4800"));
    assert_eq!(dec_at(&rows[1], "doctor_gross"), dec("2000"));
    let totals = body["totals"].as_array().unwrap();
    assert_eq!(totals.len(), 2);
    assert_eq!(totals[0]["doctor_name"], "Dr. Anand");
    assert_eq!(dec_at(&totals[0], "tds"), dec("320"));

    let (status, body) = app
        .get(&format!("/reports/commission?doctor_id={flat}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(dec_at(&rows[1], "doctor_gross"), dec("0"));

    let (status, bytes) = app
        .raw(
            Method::GET,
            "/reports/commission.csv?from=2026-04-01&to=2026-04-30",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let csv = String::from_utf8(bytes).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "Date,Case#,Patient,Operation,Doctor,Received,Lab Cost,Commission%,Commission,TDS,Net Payable,Clinic Share"
    );
    assert_eq!(
        lines[1],
        "2026-04-02,CASE-2026-04-01,\"Kumar, Anil\",Root canal,Dr. Anand,10000.00,2000.00,40.00,3200.00,320.00,2880.00,4800.00"
    );
    assert!(lines[2].contains(",Dr. Basu,2500.00,0.00,Flat,2000.00,200.00,1800.00,500.00"));
}

#[tokio::test]
async fn test_report_rejects_inverted_range() {
    let app = spawn_app();
    let (status, _) = app
        .get("/reports/commission?from=2026-05-01&to=2026-04-01")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_waterfall_for_unknown_visit_is_404() {
    let app = spawn_app();
    let (status, _) = app
        .get(&format!("/visits/{}/waterfall", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
