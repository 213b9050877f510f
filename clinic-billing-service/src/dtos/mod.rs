//! Request and response bodies for the HTTP surface.

use crate::models::{Payment, PaymentMode, VisitBalance};
use crate::services::allocator::{AllocationLine, AllocationRequest};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outstanding visits of one patient, oldest first.
#[derive(Debug, Serialize, Deserialize)]
pub struct OutstandingResponse {
    pub patient_id: Uuid,
    pub visits: Vec<VisitBalance>,
    pub total_balance: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AutoAllocationBody {
    pub total_amount: Decimal,
}

/// Confirmed checkout. The patient comes from the path.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordPaymentBody {
    pub total_amount: Decimal,
    pub allocations: Vec<AllocationLine>,
    /// Defaults to today (UTC).
    pub payment_date: Option<NaiveDate>,
    #[serde(default = "default_mode")]
    pub mode: PaymentMode,
    pub note: Option<String>,
}

fn default_mode() -> PaymentMode {
    PaymentMode::Cash
}

impl RecordPaymentBody {
    pub fn into_request(self, patient_id: Uuid) -> AllocationRequest {
        AllocationRequest {
            patient_id,
            total_amount: self.total_amount,
            allocations: self.allocations,
            payment_date: self
                .payment_date
                .unwrap_or_else(|| Utc::now().date_naive()),
            mode: self.mode,
            note: self.note.filter(|n| !n.trim().is_empty()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordPaymentResponse {
    pub patient_id: Uuid,
    pub total_amount: Decimal,
    pub payments: Vec<Payment>,
}

/// A visit's ledger position with the receipts behind it.
#[derive(Debug, Serialize, Deserialize)]
pub struct VisitLedgerResponse {
    #[serde(flatten)]
    pub balance: VisitBalance,
    pub root_visit_id: Uuid,
    pub payments: Vec<Payment>,
}
