//! Storage seam for the billing engine.
//!
//! `Database` is the Postgres implementation used in production. `InMemoryStore`
//! keeps the same contract behind a single async mutex and backs the HTTP
//! tests and local runs without a database.

use crate::error::BillingError;
use crate::models::{
    CommissionTerms, CreateDoctor, CreatePatient, CreateRatePeriod, CreateVisit, Doctor,
    DoctorRatePeriod, Patient, Payment, Visit,
};
use crate::services::allocator::{AllocationPlan, PaymentAllocator};
use crate::services::waterfall::CommissionResolver;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), BillingError>;

    async fn create_patient(&self, input: &CreatePatient) -> Result<Patient, BillingError>;
    async fn get_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, BillingError>;

    async fn create_doctor(&self, input: &CreateDoctor) -> Result<Doctor, BillingError>;
    async fn get_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, BillingError>;
    async fn add_rate_period(
        &self,
        input: &CreateRatePeriod,
    ) -> Result<DoctorRatePeriod, BillingError>;
    async fn list_rate_periods(&self, doctor_id: Uuid)
        -> Result<Vec<DoctorRatePeriod>, BillingError>;

    /// Record a visit. Follow-ups are re-pointed at the top of their chain and
    /// the doctor's percent in effect on the visit date is captured when the
    /// caller did not supply one.
    async fn create_visit(&self, input: &CreateVisit) -> Result<Visit, BillingError>;
    async fn get_visit(&self, visit_id: Uuid) -> Result<Option<Visit>, BillingError>;
    async fn list_patient_visits(&self, patient_id: Uuid) -> Result<Vec<Visit>, BillingError>;
    /// Every visit of a chain, root included.
    async fn list_chain_visits(&self, root_visit_id: Uuid) -> Result<Vec<Visit>, BillingError>;

    /// A visit's payments in chronological order.
    async fn list_visit_payments(&self, visit_id: Uuid) -> Result<Vec<Payment>, BillingError>;
    async fn list_patient_payments(&self, patient_id: Uuid)
        -> Result<Vec<Payment>, BillingError>;
    /// Payments dated within the inclusive range, in chronological order.
    async fn list_payments_between(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Payment>, BillingError>;

    /// Re-check the plan against live balances and insert one payment per
    /// line with consecutive receipt numbers. All rows or none.
    async fn commit_allocation(&self, plan: &AllocationPlan) -> Result<Vec<Payment>, BillingError>;
    /// Remove a receipt. Its number is never handed out again.
    async fn delete_payment(&self, payment_id: Uuid) -> Result<Payment, BillingError>;
}

fn check_range(label: &str, value: Decimal) -> Result<(), BillingError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(BillingError::InvalidCommissionInput(format!(
            "{label} {value} outside [0, 100]"
        )));
    }
    Ok(())
}

/// Build the doctor row a store should insert.
pub fn new_doctor(input: &CreateDoctor) -> Result<Doctor, BillingError> {
    check_range("tds percent", input.tds_percent)?;
    match input.terms {
        CommissionTerms::Percent { percent } => check_range("commission percent", percent)?,
        CommissionTerms::Flat { amount } if amount <= Decimal::ZERO => {
            return Err(BillingError::InvalidCommissionInput(format!(
                "flat fee must be positive, got {amount}"
            )))
        }
        CommissionTerms::Flat { .. } => {}
    }

    let (commission_percent, commission_rate) = input.terms.to_columns();
    Ok(Doctor {
        doctor_id: Uuid::new_v4(),
        name: input.name.trim().to_string(),
        commission_percent,
        commission_rate,
        tds_percent: input.tds_percent,
        created_utc: Utc::now(),
    })
}

/// Build the rate period row a store should insert.
pub fn new_rate_period(input: &CreateRatePeriod) -> Result<DoctorRatePeriod, BillingError> {
    check_range("historic commission percent", input.commission_percent)?;
    if input.effective_to.is_some_and(|to| to < input.effective_from) {
        return Err(BillingError::InvalidCommissionInput(format!(
            "period ends before it starts ({})",
            input.effective_from
        )));
    }
    Ok(DoctorRatePeriod {
        period_id: Uuid::new_v4(),
        doctor_id: input.doctor_id,
        commission_percent: input.commission_percent,
        effective_from: input.effective_from,
        effective_to: input.effective_to,
    })
}

/// Build the visit row a store should insert. `parent` is the visit named by
/// `input.root_visit_id`, already looked up by the caller.
pub fn new_visit(
    input: &CreateVisit,
    parent: Option<&Visit>,
    doctor: Option<&Doctor>,
    periods: &[DoctorRatePeriod],
) -> Result<Visit, BillingError> {
    if input.rate < Decimal::ZERO || input.discount < Decimal::ZERO {
        return Err(BillingError::InvalidVisit(format!(
            "rate {} and discount {} must not be negative",
            input.rate, input.discount
        )));
    }

    let visit_id = Uuid::new_v4();
    let root_visit_id = match (input.root_visit_id, parent) {
        (None, _) => visit_id,
        (Some(requested), Some(parent)) if parent.visit_id == requested => {
            if parent.patient_id != input.patient_id {
                return Err(BillingError::InvalidVisit(format!(
                    "chain {requested} belongs to another patient"
                )));
            }
            parent.root_visit_id
        }
        (Some(requested), _) => {
            return Err(BillingError::InvalidVisit(format!(
                "chain root {requested} does not exist"
            )))
        }
    };

    let resolver = CommissionResolver::new(doctor, periods);
    let visit = Visit {
        visit_id,
        patient_id: input.patient_id,
        root_visit_id,
        doctor_id: doctor.map(|d| d.doctor_id),
        case_number: input.case_number.trim().to_string(),
        operation: input.operation.trim().to_string(),
        visit_date: input.visit_date,
        rate: input.rate,
        discount: input.discount,
        lab_unit_rate: input.lab_unit_rate,
        lab_quantity: input.lab_quantity,
        doctor_commission_percent: input
            .doctor_commission_percent
            .or_else(|| resolver.percent_in_effect(input.visit_date)),
        created_utc: Utc::now(),
    };
    resolver.validate(&visit)?;
    Ok(visit)
}

#[derive(Default)]
struct MemoryState {
    patients: HashMap<Uuid, Patient>,
    doctors: HashMap<Uuid, Doctor>,
    periods: Vec<DoctorRatePeriod>,
    visits: HashMap<Uuid, Visit>,
    payments: Vec<Payment>,
    last_receipt_no: i64,
}

impl MemoryState {
    fn sorted(mut payments: Vec<Payment>) -> Vec<Payment> {
        payments.sort_by(|a, b| a.chronological_cmp(b));
        payments
    }

    fn periods_for(&self, doctor_id: Uuid) -> Vec<DoctorRatePeriod> {
        self.periods
            .iter()
            .filter(|p| p.doctor_id == doctor_id)
            .cloned()
            .collect()
    }
}

/// Process-local store. One mutex serialises every write, which is what makes
/// check-then-insert in `commit_allocation` safe.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), BillingError> {
        Ok(())
    }

    async fn create_patient(&self, input: &CreatePatient) -> Result<Patient, BillingError> {
        let patient = Patient {
            patient_id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            created_utc: Utc::now(),
        };
        let mut state = self.state.lock().await;
        state.patients.insert(patient.patient_id, patient.clone());
        Ok(patient)
    }

    async fn get_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, BillingError> {
        Ok(self.state.lock().await.patients.get(&patient_id).cloned())
    }

    async fn create_doctor(&self, input: &CreateDoctor) -> Result<Doctor, BillingError> {
        let doctor = new_doctor(input)?;
        let mut state = self.state.lock().await;
        state.doctors.insert(doctor.doctor_id, doctor.clone());
        Ok(doctor)
    }

    async fn get_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, BillingError> {
        Ok(self.state.lock().await.doctors.get(&doctor_id).cloned())
    }

    async fn add_rate_period(
        &self,
        input: &CreateRatePeriod,
    ) -> Result<DoctorRatePeriod, BillingError> {
        let period = new_rate_period(input)?;
        let mut state = self.state.lock().await;
        if !state.doctors.contains_key(&input.doctor_id) {
            return Err(BillingError::DoctorNotFound(input.doctor_id));
        }
        state.periods.push(period.clone());
        Ok(period)
    }

    async fn list_rate_periods(
        &self,
        doctor_id: Uuid,
    ) -> Result<Vec<DoctorRatePeriod>, BillingError> {
        let mut periods = self.state.lock().await.periods_for(doctor_id);
        periods.sort_by_key(|p| p.effective_from);
        Ok(periods)
    }

    async fn create_visit(&self, input: &CreateVisit) -> Result<Visit, BillingError> {
        let mut state = self.state.lock().await;
        if !state.patients.contains_key(&input.patient_id) {
            return Err(BillingError::PatientNotFound(input.patient_id));
        }
        let doctor = match input.doctor_id {
            Some(id) => Some(
                state
                    .doctors
                    .get(&id)
                    .cloned()
                    .ok_or(BillingError::DoctorNotFound(id))?,
            ),
            None => None,
        };
        let periods = doctor
            .as_ref()
            .map(|d| state.periods_for(d.doctor_id))
            .unwrap_or_default();
        let parent = input
            .root_visit_id
            .and_then(|id| state.visits.get(&id).cloned());

        let visit = new_visit(input, parent.as_ref(), doctor.as_ref(), &periods)?;
        state.visits.insert(visit.visit_id, visit.clone());
        Ok(visit)
    }

    async fn get_visit(&self, visit_id: Uuid) -> Result<Option<Visit>, BillingError> {
        Ok(self.state.lock().await.visits.get(&visit_id).cloned())
    }

    async fn list_patient_visits(&self, patient_id: Uuid) -> Result<Vec<Visit>, BillingError> {
        let state = self.state.lock().await;
        let mut visits: Vec<Visit> = state
            .visits
            .values()
            .filter(|v| v.patient_id == patient_id)
            .cloned()
            .collect();
        visits.sort_by(|a, b| {
            a.visit_date
                .cmp(&b.visit_date)
                .then_with(|| a.created_utc.cmp(&b.created_utc))
        });
        Ok(visits)
    }

    async fn list_chain_visits(&self, root_visit_id: Uuid) -> Result<Vec<Visit>, BillingError> {
        let state = self.state.lock().await;
        let mut visits: Vec<Visit> = state
            .visits
            .values()
            .filter(|v| v.root_visit_id == root_visit_id)
            .cloned()
            .collect();
        visits.sort_by(|a, b| {
            a.visit_date
                .cmp(&b.visit_date)
                .then_with(|| a.created_utc.cmp(&b.created_utc))
        });
        Ok(visits)
    }

    async fn list_visit_payments(&self, visit_id: Uuid) -> Result<Vec<Payment>, BillingError> {
        let state = self.state.lock().await;
        Ok(MemoryState::sorted(
            state
                .payments
                .iter()
                .filter(|p| p.visit_id == visit_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_patient_payments(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<Payment>, BillingError> {
        let state = self.state.lock().await;
        Ok(MemoryState::sorted(
            state
                .payments
                .iter()
                .filter(|p| p.patient_id == patient_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_payments_between(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Payment>, BillingError> {
        let state = self.state.lock().await;
        Ok(MemoryState::sorted(
            state
                .payments
                .iter()
                .filter(|p| {
                    from.is_none_or(|f| p.payment_date >= f) && to.is_none_or(|t| p.payment_date <= t)
                })
                .cloned()
                .collect(),
        ))
    }

    async fn commit_allocation(&self, plan: &AllocationPlan) -> Result<Vec<Payment>, BillingError> {
        let mut state = self.state.lock().await;

        let ids: HashSet<Uuid> = plan.visit_ids().into_iter().collect();
        let visits: Vec<Visit> = ids
            .iter()
            .filter_map(|id| state.visits.get(id).cloned())
            .collect();
        let existing: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| ids.contains(&p.visit_id))
            .cloned()
            .collect();
        PaymentAllocator::check_against_ledger(plan, &visits, &existing)?;

        let created_utc = Utc::now();
        let mut inserted = Vec::with_capacity(plan.lines.len());
        for line in &plan.lines {
            state.last_receipt_no += 1;
            inserted.push(Payment {
                payment_id: Uuid::new_v4(),
                visit_id: line.visit_id,
                patient_id: plan.patient_id,
                amount: line.amount,
                receipt_no: state.last_receipt_no,
                payment_date: plan.payment_date,
                mode: plan.mode.as_str().to_string(),
                note: plan.note.clone(),
                created_utc,
            });
        }
        state.payments.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn delete_payment(&self, payment_id: Uuid) -> Result<Payment, BillingError> {
        let mut state = self.state.lock().await;
        let index = state
            .payments
            .iter()
            .position(|p| p.payment_id == payment_id)
            .ok_or(BillingError::PaymentNotFound(payment_id))?;
        Ok(state.payments.remove(index))
    }
}
