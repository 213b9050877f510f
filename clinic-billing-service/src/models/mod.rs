//! Domain models for clinic-billing-service.

mod doctor;
mod patient;
mod payment;
mod report;
mod visit;

pub use doctor::{CommissionTerms, CreateDoctor, CreateRatePeriod, Doctor, DoctorRatePeriod};
pub use patient::{CreatePatient, Patient};
pub use payment::{Payment, PaymentMode};
pub use report::{
    ChainSufficiency, CommissionReport, CommissionRow, DoctorCommissionTotals, ReportFilter,
};
pub use visit::{CreateVisit, Visit, VisitBalance};
