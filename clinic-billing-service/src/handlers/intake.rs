//! Intake endpoints used by the front desk to register the records the
//! billing engine works on.

use crate::models::{CreateDoctor, CreatePatient, CreateRatePeriod, CreateVisit};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_patient(
    State(state): State<AppState>,
    Json(body): Json<CreatePatient>,
) -> Result<impl IntoResponse, AppError> {
    body.validate()?;
    let patient = state.store.create_patient(&body).await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn create_doctor(
    State(state): State<AppState>,
    Json(body): Json<CreateDoctor>,
) -> Result<impl IntoResponse, AppError> {
    body.validate()?;
    let doctor = state.store.create_doctor(&body).await?;
    Ok((StatusCode::CREATED, Json(doctor)))
}

/// Rate period body; the doctor comes from the path.
#[derive(Debug, Deserialize)]
pub struct RatePeriodBody {
    pub commission_percent: Decimal,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

pub async fn add_rate_period(
    State(state): State<AppState>,
    Path(doctor_id): Path<Uuid>,
    Json(body): Json<RatePeriodBody>,
) -> Result<impl IntoResponse, AppError> {
    let period = state
        .store
        .add_rate_period(&CreateRatePeriod {
            doctor_id,
            commission_percent: body.commission_percent,
            effective_from: body.effective_from,
            effective_to: body.effective_to,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(period)))
}

pub async fn create_visit(
    State(state): State<AppState>,
    Json(body): Json<CreateVisit>,
) -> Result<impl IntoResponse, AppError> {
    body.validate()?;
    let visit = state.store.create_visit(&body).await?;
    Ok((StatusCode::CREATED, Json(visit)))
}
