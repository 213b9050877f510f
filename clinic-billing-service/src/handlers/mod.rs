//! HTTP handlers for clinic-billing-service.

pub mod checkout;
pub mod health;
pub mod intake;
pub mod reports;

use crate::models::Visit;
use crate::startup::AppState;
use service_core::error::AppError;
use uuid::Uuid;

/// Load a visit addressed by the caller, or 404.
pub(crate) async fn visit_or_404(state: &AppState, visit_id: Uuid) -> Result<Visit, AppError> {
    state
        .store
        .get_visit(visit_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Visit {} does not exist", visit_id)))
}

/// Fail with 404 unless the patient exists.
pub(crate) async fn require_patient(state: &AppState, patient_id: Uuid) -> Result<(), AppError> {
    match state.store.get_patient(patient_id).await? {
        Some(_) => Ok(()),
        None => Err(crate::error::BillingError::PatientNotFound(patient_id).into()),
    }
}
