//! Billing domain errors.

use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("No allocations provided")]
    NoAllocations,

    #[error("Payment total must be positive, got {0}")]
    NonPositiveTotal(Decimal),

    #[error("Allocation for visit {visit_id} must be positive, got {amount}")]
    NonPositiveAmount { visit_id: Uuid, amount: Decimal },

    #[error("Allocation for visit {visit_id} has more than 4 decimal places: {amount}")]
    AmountTooPrecise { visit_id: Uuid, amount: Decimal },

    #[error("Visit {0} appears more than once in the allocation")]
    DuplicateVisit(Uuid),

    #[error(
        "Allocations sum to {allocated} but payment total is {total} (mismatch {difference})"
    )]
    AllocationMismatch {
        total: Decimal,
        allocated: Decimal,
        difference: Decimal,
    },

    #[error("Allocation {requested} exceeds outstanding balance {balance} of visit {visit_id}")]
    ExceedsBalance {
        visit_id: Uuid,
        requested: Decimal,
        balance: Decimal,
    },

    #[error("Visit {0} does not exist")]
    VisitNotFound(Uuid),

    #[error("Visit {visit_id} does not belong to patient {patient_id}")]
    VisitNotOwned { visit_id: Uuid, patient_id: Uuid },

    #[error("Patient {0} does not exist")]
    PatientNotFound(Uuid),

    #[error("Payment {0} does not exist")]
    PaymentNotFound(Uuid),

    #[error("Doctor {0} does not exist")]
    DoctorNotFound(Uuid),

    #[error("Invalid commission input: {0}")]
    InvalidCommissionInput(String),

    #[error("Invalid visit: {0}")]
    InvalidVisit(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl BillingError {
    /// Caller-correctable problems: the user can fix the input and resubmit.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BillingError::NoAllocations
                | BillingError::NonPositiveTotal(_)
                | BillingError::NonPositiveAmount { .. }
                | BillingError::AmountTooPrecise { .. }
                | BillingError::DuplicateVisit(_)
                | BillingError::AllocationMismatch { .. }
                | BillingError::ExceedsBalance { .. }
                | BillingError::InvalidCommissionInput(_)
                | BillingError::InvalidVisit(_)
        )
    }

    /// Label for the errors metric.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::NoAllocations => "no_allocations",
            BillingError::NonPositiveTotal(_) => "non_positive_total",
            BillingError::NonPositiveAmount { .. } => "non_positive_amount",
            BillingError::AmountTooPrecise { .. } => "amount_too_precise",
            BillingError::DuplicateVisit(_) => "duplicate_visit",
            BillingError::AllocationMismatch { .. } => "allocation_mismatch",
            BillingError::ExceedsBalance { .. } => "exceeds_balance",
            BillingError::VisitNotFound(_) => "visit_not_found",
            BillingError::VisitNotOwned { .. } => "visit_not_owned",
            BillingError::PatientNotFound(_) => "patient_not_found",
            BillingError::PaymentNotFound(_) => "payment_not_found",
            BillingError::DoctorNotFound(_) => "doctor_not_found",
            BillingError::InvalidCommissionInput(_) => "invalid_commission_input",
            BillingError::InvalidVisit(_) => "invalid_visit",
            BillingError::Database(_) => "db_error",
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(anyhow::Error::new(err))
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            e if e.is_validation() => AppError::BadRequest(anyhow::Error::new(e)),
            // Lookups addressed directly by the caller.
            e @ (BillingError::PatientNotFound(_)
            | BillingError::PaymentNotFound(_)
            | BillingError::DoctorNotFound(_)) => AppError::NotFound(anyhow::Error::new(e)),
            // A visit inside an allocation that is missing or foreign means the
            // caller built the request wrong; not something the user can fix.
            e @ (BillingError::VisitNotFound(_) | BillingError::VisitNotOwned { .. }) => {
                tracing::error!(error = %e, "Allocation referenced an invalid visit");
                AppError::InternalError(anyhow::Error::new(e))
            }
            BillingError::Database(e) => AppError::DatabaseError(e),
            e => AppError::InternalError(anyhow::Error::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exceeds_balance_names_visit() {
        let visit_id = Uuid::new_v4();
        let err = BillingError::ExceedsBalance {
            visit_id,
            requested: Decimal::from(500),
            balance: Decimal::from(300),
        };
        assert!(err.to_string().contains(&visit_id.to_string()));
        assert!(err.is_validation());
        assert!(matches!(AppError::from(err), AppError::BadRequest(_)));
    }

    #[test]
    fn test_mismatch_reports_difference() {
        let err = BillingError::AllocationMismatch {
            total: Decimal::from(1000),
            allocated: Decimal::from(900),
            difference: Decimal::from(100),
        };
        assert!(err.to_string().contains("mismatch 100"));
    }

    #[test]
    fn test_foreign_visit_is_hard_failure() {
        let err = BillingError::VisitNotOwned {
            visit_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
        };
        assert!(!err.is_validation());
        assert!(matches!(AppError::from(err), AppError::InternalError(_)));
    }

    #[test]
    fn test_database_error_maps_to_database() {
        let err = BillingError::Database(anyhow::anyhow!("connection reset"));
        assert!(matches!(AppError::from(err), AppError::DatabaseError(_)));
    }
}
