//! Commission waterfall: lab cost first, then the doctor's share, then the clinic.
//!
//! Each payment is split using what the visit had already collected before it,
//! so lab cost is recovered across a run of partial payments and a flat fee is
//! paid out once per visit. The per-visit state is never stored; it is rebuilt
//! by replaying the visit's payments in chronological order.

use crate::error::BillingError;
use crate::models::{CommissionTerms, Doctor, DoctorRatePeriod, Payment, Visit};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Commission basis applied to a single payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "basis", content = "value", rename_all = "snake_case")]
pub enum AppliedCommission {
    /// No treating doctor; everything past lab cost stays with the clinic.
    None,
    Percent(Decimal),
    /// Total flat fee for the visit, not the amount due on this payment.
    Flat(Decimal),
}

impl AppliedCommission {
    pub fn percent(&self) -> Option<Decimal> {
        match self {
            AppliedCommission::Percent(p) => Some(*p),
            _ => None,
        }
    }
}

/// Inputs for splitting one payment.
#[derive(Debug, Clone, Copy)]
pub struct WaterfallInput {
    pub received: Decimal,
    pub lab_cost: Decimal,
    /// Collected on the same visit before this payment.
    pub previously_collected: Decimal,
    pub commission: AppliedCommission,
    /// Flat fee already paid out by earlier payments on the same visit.
    pub flat_fee_paid: Decimal,
    pub tds_percent: Decimal,
}

/// Where one payment went. `lab_recovered + doctor_gross + clinic_share`
/// always equals `received`; `tds` is withheld out of `doctor_gross`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSplit {
    pub received: Decimal,
    pub lab_recovered: Decimal,
    pub commission_percent: Option<Decimal>,
    pub doctor_gross: Decimal,
    pub tds: Decimal,
    pub doctor_net: Decimal,
    pub clinic_share: Decimal,
}

/// Split a single payment. Inputs are assumed validated.
pub fn split_payment(input: &WaterfallInput) -> PaymentSplit {
    let hundred = Decimal::ONE_HUNDRED;

    let already_recovered = input.previously_collected.min(input.lab_cost);
    let remaining_lab_cost = (input.lab_cost - already_recovered).max(Decimal::ZERO);
    let lab_recovered = input.received.min(remaining_lab_cost);
    let commissionable = input.received - lab_recovered;

    let doctor_gross = match input.commission {
        AppliedCommission::None => Decimal::ZERO,
        AppliedCommission::Percent(percent) => commissionable * percent / hundred,
        AppliedCommission::Flat(amount) => {
            let unpaid = (amount - input.flat_fee_paid).max(Decimal::ZERO);
            commissionable.min(unpaid)
        }
    };

    let tds = doctor_gross * input.tds_percent / hundred;

    PaymentSplit {
        received: input.received,
        lab_recovered,
        commission_percent: input.commission.percent(),
        doctor_gross,
        tds,
        doctor_net: doctor_gross - tds,
        clinic_share: input.received - lab_recovered - doctor_gross,
    }
}

fn check_percent(label: &str, value: Decimal) -> Result<(), BillingError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(BillingError::InvalidCommissionInput(format!(
            "{label} {value} outside [0, 100]"
        )));
    }
    Ok(())
}

/// Resolves which commission applies to a visit's payments.
///
/// Precedence: a flat-fee doctor is always flat; otherwise the visit's own
/// snapshot percent; otherwise the history period covering the payment date;
/// otherwise the doctor's current percent.
#[derive(Debug, Clone, Copy)]
pub struct CommissionResolver<'a> {
    doctor: Option<&'a Doctor>,
    periods: &'a [DoctorRatePeriod],
}

impl<'a> CommissionResolver<'a> {
    pub fn new(doctor: Option<&'a Doctor>, periods: &'a [DoctorRatePeriod]) -> Self {
        Self { doctor, periods }
    }

    pub fn tds_percent(&self) -> Decimal {
        self.doctor.map(|d| d.tds_percent).unwrap_or(Decimal::ZERO)
    }

    /// The doctor's percent in effect on `on`. Later-starting periods win
    /// when periods overlap.
    pub fn percent_in_effect(&self, on: NaiveDate) -> Option<Decimal> {
        let doctor = self.doctor?;
        let from_history = self
            .periods
            .iter()
            .filter(|p| p.doctor_id == doctor.doctor_id && p.covers(on))
            .max_by_key(|p| p.effective_from)
            .map(|p| p.commission_percent);

        match doctor.terms() {
            CommissionTerms::Percent { percent } => Some(from_history.unwrap_or(percent)),
            CommissionTerms::Flat { .. } => None,
        }
    }

    pub fn for_payment(&self, visit: &Visit, on: NaiveDate) -> AppliedCommission {
        let Some(doctor) = self.doctor else {
            return AppliedCommission::None;
        };
        match doctor.terms() {
            CommissionTerms::Flat { amount } => AppliedCommission::Flat(amount),
            CommissionTerms::Percent { .. } => AppliedCommission::Percent(
                visit
                    .doctor_commission_percent
                    .or_else(|| self.percent_in_effect(on))
                    .unwrap_or(Decimal::ZERO),
            ),
        }
    }

    /// Reject terms the engine cannot apply.
    pub fn validate(&self, visit: &Visit) -> Result<(), BillingError> {
        if let Some(percent) = visit.doctor_commission_percent {
            check_percent("visit commission percent", percent)?;
        }
        if visit.lab_unit_rate < Decimal::ZERO || visit.lab_quantity < Decimal::ZERO {
            return Err(BillingError::InvalidCommissionInput(format!(
                "negative lab cost on visit {}",
                visit.visit_id
            )));
        }
        if let Some(doctor) = self.doctor {
            check_percent("tds percent", doctor.tds_percent)?;
            match doctor.terms() {
                CommissionTerms::Percent { percent } => {
                    check_percent("doctor commission percent", percent)?
                }
                CommissionTerms::Flat { amount } if amount < Decimal::ZERO => {
                    return Err(BillingError::InvalidCommissionInput(format!(
                        "negative flat fee {amount}"
                    )))
                }
                CommissionTerms::Flat { .. } => {}
            }
        }
        for period in self.periods {
            check_percent("historic commission percent", period.commission_percent)?;
        }
        Ok(())
    }
}

/// One replayed payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterfallRow {
    pub payment_id: Uuid,
    pub receipt_no: i64,
    pub payment_date: NaiveDate,
    pub previously_collected: Decimal,
    #[serde(flatten)]
    pub split: PaymentSplit,
}

/// A visit's payment history split payment by payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitWaterfall {
    pub visit_id: Uuid,
    pub lab_cost: Decimal,
    pub rows: Vec<WaterfallRow>,
}

impl VisitWaterfall {
    pub fn total_lab_recovered(&self) -> Decimal {
        self.rows.iter().map(|r| r.split.lab_recovered).sum()
    }

    pub fn total_doctor_gross(&self) -> Decimal {
        self.rows.iter().map(|r| r.split.doctor_gross).sum()
    }
}

/// Replay every payment on `visit` in chronological order.
pub fn replay_visit(
    visit: &Visit,
    payments: &[Payment],
    resolver: &CommissionResolver<'_>,
) -> Result<VisitWaterfall, BillingError> {
    resolver.validate(visit)?;

    let mut ordered: Vec<&Payment> = payments
        .iter()
        .filter(|p| p.visit_id == visit.visit_id)
        .collect();
    ordered.sort_by(|a, b| a.chronological_cmp(b));

    let lab_cost = visit.lab_cost();
    let tds_percent = resolver.tds_percent();
    let mut collected = Decimal::ZERO;
    let mut flat_fee_paid = Decimal::ZERO;
    let mut rows = Vec::with_capacity(ordered.len());

    for payment in ordered {
        if payment.amount < Decimal::ZERO {
            return Err(BillingError::InvalidCommissionInput(format!(
                "negative payment {} on visit {}",
                payment.amount, visit.visit_id
            )));
        }

        let commission = resolver.for_payment(visit, payment.payment_date);
        let split = split_payment(&WaterfallInput {
            received: payment.amount,
            lab_cost,
            previously_collected: collected,
            commission,
            flat_fee_paid,
            tds_percent,
        });

        if matches!(commission, AppliedCommission::Flat(_)) {
            flat_fee_paid += split.doctor_gross;
        }
        rows.push(WaterfallRow {
            payment_id: payment.payment_id,
            receipt_no: payment.receipt_no,
            payment_date: payment.payment_date,
            previously_collected: collected,
            split,
        });
        collected += payment.amount;
    }

    Ok(VisitWaterfall {
        visit_id: visit.visit_id,
        lab_cost,
        rows,
    })
}
