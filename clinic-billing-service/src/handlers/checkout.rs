//! Checkout handlers: outstanding balances, FIFO suggestion, recording and
//! deleting receipts, and a single visit's ledger.

use crate::dtos::{
    AutoAllocationBody, OutstandingResponse, RecordPaymentBody, RecordPaymentResponse,
    VisitLedgerResponse,
};
use crate::error::BillingError;
use crate::handlers::{require_patient, visit_or_404};
use crate::models::VisitBalance;
use crate::services::{LedgerCalculator, PaymentAllocator};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

async fn outstanding_for(state: &AppState, patient_id: Uuid) -> Result<Vec<VisitBalance>, AppError> {
    require_patient(state, patient_id).await?;
    let visits = state.store.list_patient_visits(patient_id).await?;
    let payments = state.store.list_patient_payments(patient_id).await?;
    Ok(LedgerCalculator::outstanding(&visits, &payments))
}

pub async fn get_outstanding(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let visits = outstanding_for(&state, patient_id).await?;
    let total_balance: Decimal = visits.iter().map(|v| v.balance).sum();

    Ok(Json(OutstandingResponse {
        patient_id,
        visits,
        total_balance,
    }))
}

/// Pre-fill for the checkout form. Nothing is written.
pub async fn suggest_allocation(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Json(body): Json<AutoAllocationBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.total_amount <= Decimal::ZERO {
        return Err(BillingError::NonPositiveTotal(body.total_amount).into());
    }
    let outstanding = outstanding_for(&state, patient_id).await?;
    Ok(Json(PaymentAllocator::auto_allocate(
        body.total_amount,
        &outstanding,
    )))
}

pub async fn record_payment(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Json(body): Json<RecordPaymentBody>,
) -> Result<impl IntoResponse, AppError> {
    require_patient(&state, patient_id).await?;

    let request = body.into_request(patient_id);
    let total_amount = request.total_amount;
    let payments = PaymentAllocator::allocate(state.store.as_ref(), request).await?;

    Ok((
        StatusCode::CREATED,
        Json(RecordPaymentResponse {
            patient_id,
            total_amount,
            payments,
        }),
    ))
}

pub async fn delete_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let payment = state.store.delete_payment(payment_id).await?;

    tracing::info!(
        payment_id = %payment.payment_id,
        receipt_no = payment.receipt_no,
        visit_id = %payment.visit_id,
        "Receipt deleted"
    );

    Ok(Json(payment))
}

pub async fn get_visit_ledger(
    State(state): State<AppState>,
    Path(visit_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let visit = visit_or_404(&state, visit_id).await?;
    let payments = state.store.list_visit_payments(visit_id).await?;

    Ok(Json(VisitLedgerResponse {
        balance: LedgerCalculator::summarize(&visit, &payments),
        root_visit_id: visit.root_visit_id,
        payments,
    }))
}
