//! Report shapes: commission rows, per-doctor totals, chain sufficiency.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Filter for the commission report. Both dates are inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub doctor_id: Option<Uuid>,
}

impl ReportFilter {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// One payment's waterfall, joined with the names a report prints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionRow {
    pub payment_id: Uuid,
    pub receipt_no: i64,
    pub payment_date: NaiveDate,
    pub visit_id: Uuid,
    pub case_number: String,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub operation: String,
    pub doctor_id: Option<Uuid>,
    pub doctor_name: Option<String>,
    pub received: Decimal,
    pub lab_recovered: Decimal,
    /// `None` when the doctor is paid a flat fee or the visit has no doctor.
    pub commission_percent: Option<Decimal>,
    pub doctor_gross: Decimal,
    pub tds: Decimal,
    pub doctor_net: Decimal,
    pub clinic_share: Decimal,
}

/// Aggregate of a doctor's rows over the report range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorCommissionTotals {
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub payment_count: usize,
    pub received: Decimal,
    pub lab_recovered: Decimal,
    pub doctor_gross: Decimal,
    pub tds: Decimal,
    pub doctor_net: Decimal,
    pub clinic_share: Decimal,
}

impl DoctorCommissionTotals {
    pub fn new(doctor_id: Uuid, doctor_name: String) -> Self {
        Self {
            doctor_id,
            doctor_name,
            payment_count: 0,
            received: Decimal::ZERO,
            lab_recovered: Decimal::ZERO,
            doctor_gross: Decimal::ZERO,
            tds: Decimal::ZERO,
            doctor_net: Decimal::ZERO,
            clinic_share: Decimal::ZERO,
        }
    }

    pub fn add(&mut self, row: &CommissionRow) {
        self.payment_count += 1;
        self.received += row.received;
        self.lab_recovered += row.lab_recovered;
        self.doctor_gross += row.doctor_gross;
        self.tds += row.tds;
        self.doctor_net += row.doctor_net;
        self.clinic_share += row.clinic_share;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionReport {
    pub filter: ReportFilter,
    pub rows: Vec<CommissionRow>,
    pub totals: Vec<DoctorCommissionTotals>,
}

/// Collection position of a treatment chain against its doctor-fee-plus-lab floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSufficiency {
    pub root_visit_id: Uuid,
    pub visit_count: usize,
    pub doctor_fee_basis: Decimal,
    pub lab_cost_total: Decimal,
    pub collected: Decimal,
    pub minimum_needed: Decimal,
    pub shortfall: Decimal,
}

impl ChainSufficiency {
    /// A shortfall is advisory: staff are warned, nothing is blocked.
    pub fn needs_warning(&self) -> bool {
        self.shortfall > Decimal::ZERO
    }
}
