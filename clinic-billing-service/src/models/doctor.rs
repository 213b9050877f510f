//! Doctor commission terms and their effective-dated history.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// How a doctor is paid for a procedure. Exactly one basis applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum CommissionTerms {
    /// Share of the commissionable part of every payment.
    Percent { percent: Decimal },
    /// One-time fee per visit, paid out of collections until exhausted.
    Flat { amount: Decimal },
}

impl CommissionTerms {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionTerms::Percent { .. } => "percent",
            CommissionTerms::Flat { .. } => "flat",
        }
    }

    /// Split back into the `(commission_percent, commission_rate)` column pair.
    pub fn to_columns(self) -> (Option<Decimal>, Option<Decimal>) {
        match self {
            CommissionTerms::Percent { percent } => (Some(percent), None),
            CommissionTerms::Flat { amount } => (None, Some(amount)),
        }
    }
}

/// Doctor row as stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Doctor {
    pub doctor_id: Uuid,
    pub name: String,
    pub commission_percent: Option<Decimal>,
    pub commission_rate: Option<Decimal>,
    pub tds_percent: Decimal,
    pub created_utc: DateTime<Utc>,
}

impl Doctor {
    /// Current default terms. A positive flat rate wins over any percent.
    pub fn terms(&self) -> CommissionTerms {
        match self.commission_rate {
            Some(amount) if amount > Decimal::ZERO => CommissionTerms::Flat { amount },
            _ => CommissionTerms::Percent {
                percent: self.commission_percent.unwrap_or(Decimal::ZERO),
            },
        }
    }
}

/// A percent that applied to a doctor between two dates (inclusive).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DoctorRatePeriod {
    pub period_id: Uuid,
    pub doctor_id: Uuid,
    pub commission_percent: Decimal,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

impl DoctorRatePeriod {
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.effective_from && self.effective_to.is_none_or(|to| date <= to)
    }
}

/// Input for registering a doctor.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateDoctor {
    #[validate(length(min = 1, message = "Doctor name cannot be empty"))]
    pub name: String,
    pub terms: CommissionTerms,
    pub tds_percent: Decimal,
}

/// Input for adding a rate history period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRatePeriod {
    pub doctor_id: Uuid,
    pub commission_percent: Decimal,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}
