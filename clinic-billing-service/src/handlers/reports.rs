//! Reporting handlers: waterfall replay, chain sufficiency, commission report.

use crate::handlers::visit_or_404;
use crate::models::ReportFilter;
use crate::services::reports;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

pub async fn get_visit_waterfall(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let visit = visit_or_404(&state, visit_id).await?;
    let waterfall = reports::visit_waterfall(state.store.as_ref(), &visit).await?;
    Ok(Json(waterfall))
}

pub async fn get_chain_sufficiency(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let visit = visit_or_404(&state, visit_id).await?;
    let result = reports::chain_sufficiency(state.store.as_ref(), &visit).await?;
    Ok(Json(result))
}

fn check_range(filter: &ReportFilter) -> Result<(), AppError> {
    match (filter.from, filter.to) {
        (Some(from), Some(to)) if from > to => Err(AppError::BadRequest(anyhow::anyhow!(
            "from {} is after to {}",
            from,
            to
        ))),
        _ => Ok(()),
    }
}

pub async fn get_commission_report(
    State(state): State<AppState>,
    Query(filter): Query<ReportFilter>,
) -> Result<impl IntoResponse, AppError> {
    check_range(&filter)?;
    let report = reports::commission_report(state.store.as_ref(), filter).await?;
    Ok(Json(report))
}

pub async fn export_commission_csv(
    State(state): State<AppState>,
    Query(filter): Query<ReportFilter>,
) -> Result<impl IntoResponse, AppError> {
    check_range(&filter)?;
    let report = reports::commission_report(state.store.as_ref(), filter).await?;
    let body = reports::commission_csv(&report)?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"commission-report.csv\"",
            ),
        ],
        body,
    ))
}
