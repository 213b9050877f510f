//! Payment allocation: split one lump payment across a patient's visits.
//!
//! The flow is validate the request shape, hand the plan to the store, and
//! let the store re-check every line against the visit's live balance inside
//! the same transaction that assigns receipt numbers and inserts the rows.

use crate::error::BillingError;
use crate::models::{Payment, PaymentMode, Visit, VisitBalance};
use crate::services::ledger::{LedgerCalculator, AMOUNT_EPSILON};
use crate::services::metrics::{record_allocation, record_collected, record_error, record_receipts};
use crate::services::store::BillingStore;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Portion of a payment assigned to one visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub visit_id: Uuid,
    pub amount: Decimal,
}

/// A confirmed checkout as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub patient_id: Uuid,
    pub total_amount: Decimal,
    pub allocations: Vec<AllocationLine>,
    pub payment_date: NaiveDate,
    pub mode: PaymentMode,
    pub note: Option<String>,
}

/// A request that passed shape validation. Zero lines are dropped; every
/// remaining line is positive and names a distinct visit.
#[derive(Debug, Clone)]
pub struct AllocationPlan {
    pub patient_id: Uuid,
    pub total_amount: Decimal,
    pub lines: Vec<AllocationLine>,
    pub payment_date: NaiveDate,
    pub mode: PaymentMode,
    pub note: Option<String>,
}

impl AllocationPlan {
    pub fn visit_ids(&self) -> Vec<Uuid> {
        self.lines.iter().map(|l| l.visit_id).collect()
    }

    pub fn allocated(&self) -> Decimal {
        self.lines.iter().map(|l| l.amount).sum()
    }
}

/// FIFO suggestion for a lump amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoAllocation {
    pub total_amount: Decimal,
    /// One line per outstanding visit, oldest first, zero once the money runs out.
    pub lines: Vec<AllocationLine>,
    /// Money left after every outstanding visit was cleared.
    pub unallocated: Decimal,
}

/// Decimal places a stored payment amount keeps.
pub const AMOUNT_SCALE: u32 = 4;

pub struct PaymentAllocator;

impl PaymentAllocator {
    /// Pay the oldest debt first: each visit takes `min(remaining, balance)`
    /// until nothing remains.
    pub fn auto_allocate(total_amount: Decimal, outstanding: &[VisitBalance]) -> AutoAllocation {
        let mut ordered: Vec<&VisitBalance> = outstanding.iter().collect();
        // Stable, so visits on the same date keep the caller's order.
        ordered.sort_by_key(|v| v.visit_date);

        let mut remaining = total_amount.max(Decimal::ZERO);
        let lines = ordered
            .into_iter()
            .map(|visit| {
                let amount = remaining.min(visit.balance.max(Decimal::ZERO));
                remaining -= amount;
                AllocationLine {
                    visit_id: visit.visit_id,
                    amount,
                }
            })
            .collect();

        AutoAllocation {
            total_amount,
            lines,
            unallocated: remaining,
        }
    }

    /// Check everything that can be checked without touching storage.
    pub fn plan(request: AllocationRequest) -> Result<AllocationPlan, BillingError> {
        if request.allocations.is_empty() {
            return Err(BillingError::NoAllocations);
        }
        if request.total_amount <= Decimal::ZERO {
            return Err(BillingError::NonPositiveTotal(request.total_amount));
        }

        if let Some(line) = request
            .allocations
            .iter()
            .find(|l| l.amount < Decimal::ZERO)
        {
            return Err(BillingError::NonPositiveAmount {
                visit_id: line.visit_id,
                amount: line.amount,
            });
        }

        if let Some(line) = request
            .allocations
            .iter()
            .find(|l| l.amount.normalize().scale() > AMOUNT_SCALE)
        {
            return Err(BillingError::AmountTooPrecise {
                visit_id: line.visit_id,
                amount: line.amount,
            });
        }

        let lines: Vec<AllocationLine> = request
            .allocations
            .into_iter()
            .filter(|l| l.amount > Decimal::ZERO)
            .collect();
        if lines.is_empty() {
            return Err(BillingError::NoAllocations);
        }

        let mut seen = HashSet::with_capacity(lines.len());
        for line in &lines {
            if !seen.insert(line.visit_id) {
                return Err(BillingError::DuplicateVisit(line.visit_id));
            }
        }

        let allocated: Decimal = lines.iter().map(|l| l.amount).sum();
        let difference = request.total_amount - allocated;
        if difference.abs() > AMOUNT_EPSILON {
            return Err(BillingError::AllocationMismatch {
                total: request.total_amount,
                allocated,
                difference,
            });
        }
        if !difference.is_zero() {
            warn!(
                total = %request.total_amount,
                allocated = %allocated,
                difference = %difference,
                "Allocation differs from total within tolerance; recording line amounts"
            );
        }

        Ok(AllocationPlan {
            patient_id: request.patient_id,
            total_amount: request.total_amount,
            lines,
            payment_date: request.payment_date,
            mode: request.mode,
            note: request.note,
        })
    }

    /// Re-check a plan against freshly read visits and payments. Stores call
    /// this while holding whatever lock serialises allocations, so the balance
    /// seen here is the one the insert will be judged against.
    pub fn check_against_ledger(
        plan: &AllocationPlan,
        visits: &[Visit],
        payments: &[Payment],
    ) -> Result<(), BillingError> {
        let by_id: HashMap<Uuid, &Visit> = visits.iter().map(|v| (v.visit_id, v)).collect();

        for line in &plan.lines {
            let visit = by_id
                .get(&line.visit_id)
                .ok_or(BillingError::VisitNotFound(line.visit_id))?;
            if visit.patient_id != plan.patient_id {
                return Err(BillingError::VisitNotOwned {
                    visit_id: line.visit_id,
                    patient_id: plan.patient_id,
                });
            }
        }

        for line in &plan.lines {
            let visit = by_id[&line.visit_id];
            let own: Vec<Payment> = payments
                .iter()
                .filter(|p| p.visit_id == line.visit_id)
                .cloned()
                .collect();
            // Unclamped, so earlier over-payments inside the tolerance count
            // against the cap. A visit with nothing outstanding takes nothing.
            let raw = LedgerCalculator::raw_balance(visit, &own);
            if raw < AMOUNT_EPSILON || line.amount > raw + AMOUNT_EPSILON {
                return Err(BillingError::ExceedsBalance {
                    visit_id: line.visit_id,
                    requested: line.amount,
                    balance: raw.max(Decimal::ZERO),
                });
            }
        }

        Ok(())
    }

    /// Validate and persist an allocation. All rows or none.
    #[instrument(skip(store, request), fields(patient_id = %request.patient_id, total = %request.total_amount))]
    pub async fn allocate(
        store: &dyn BillingStore,
        request: AllocationRequest,
    ) -> Result<Vec<Payment>, BillingError> {
        let plan = Self::plan(request).inspect_err(|e| {
            record_allocation("rejected");
            record_error(e.kind());
        })?;

        match store.commit_allocation(&plan).await {
            Ok(payments) => {
                record_allocation("committed");
                record_receipts(plan.mode.as_str(), payments.len());
                record_collected(plan.allocated());

                info!(
                    payment_count = payments.len(),
                    first_receipt_no = payments.first().map(|p| p.receipt_no),
                    last_receipt_no = payments.last().map(|p| p.receipt_no),
                    "Allocation committed"
                );
                Ok(payments)
            }
            Err(e) => {
                record_allocation(if e.is_validation() { "rejected" } else { "failed" });
                record_error(e.kind());
                warn!(error = %e, "Allocation not committed");
                Err(e)
            }
        }
    }
}
