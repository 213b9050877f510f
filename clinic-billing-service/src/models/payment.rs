//! Payment (receipt) model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::cmp::Ordering;
use uuid::Uuid;

/// How the money came in. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Cash,
    Card,
    Upi,
    BankTransfer,
    Cheque,
    Other,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::Card => "card",
            PaymentMode::Upi => "upi",
            PaymentMode::BankTransfer => "bank_transfer",
            PaymentMode::Cheque => "cheque",
            PaymentMode::Other => "other",
        }
    }
}

/// Money received against exactly one visit.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub amount: Decimal,
    pub receipt_no: i64,
    pub payment_date: NaiveDate,
    pub mode: String,
    pub note: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Payment {
    /// Chronological order used whenever a visit's payments are replayed:
    /// payment date, then creation time, then receipt number.
    pub fn chronological_cmp(&self, other: &Payment) -> Ordering {
        self.payment_date
            .cmp(&other.payment_date)
            .then_with(|| self.created_utc.cmp(&other.created_utc))
            .then_with(|| self.receipt_no.cmp(&other.receipt_no))
    }
}
