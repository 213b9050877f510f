//! Visit model: one billable treatment event or a follow-up step in a chain.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A treatment visit.
///
/// `root_visit_id` equals `visit_id` for the visit that opened a treatment
/// chain; follow-ups point at that root directly, never at another follow-up.
/// `doctor_commission_percent` is the doctor's percent captured when the visit
/// was created and is never rewritten afterwards.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, Validate)]
pub struct Visit {
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub root_visit_id: Uuid,
    pub doctor_id: Option<Uuid>,
    #[validate(length(min = 1, message = "Case number cannot be empty"))]
    pub case_number: String,
    #[validate(length(min = 1, message = "Operation cannot be empty"))]
    pub operation: String,
    pub visit_date: NaiveDate,
    pub rate: Decimal,
    pub discount: Decimal,
    pub lab_unit_rate: Decimal,
    pub lab_quantity: Decimal,
    pub doctor_commission_percent: Option<Decimal>,
    pub created_utc: DateTime<Utc>,
}

impl Visit {
    /// Whether this visit opened its treatment chain.
    pub fn is_root(&self) -> bool {
        self.root_visit_id == self.visit_id
    }

    /// Lab cost owed to the vendor for this visit.
    pub fn lab_cost(&self) -> Decimal {
        (self.lab_unit_rate * self.lab_quantity).max(Decimal::ZERO)
    }
}

/// Input for recording a visit.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateVisit {
    pub patient_id: Uuid,
    /// `None` opens a new chain rooted at the created visit.
    pub root_visit_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub case_number: String,
    pub operation: String,
    pub visit_date: NaiveDate,
    pub rate: Decimal,
    pub discount: Decimal,
    pub lab_unit_rate: Decimal,
    pub lab_quantity: Decimal,
    pub doctor_commission_percent: Option<Decimal>,
}

/// Checkout view of a visit's ledger position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitBalance {
    pub visit_id: Uuid,
    pub case_number: String,
    pub operation: String,
    pub visit_date: NaiveDate,
    pub billed: Decimal,
    pub paid: Decimal,
    pub balance: Decimal,
}
