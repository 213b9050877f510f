//! Per-visit billed / paid / balance arithmetic.

use crate::models::{Payment, Visit, VisitBalance};
use rust_decimal::Decimal;

/// Tolerance for equality and cap comparisons on currency amounts (0.01).
pub const AMOUNT_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Stateless ledger arithmetic for a single visit.
pub struct LedgerCalculator;

impl LedgerCalculator {
    /// Rate minus discount, floored at zero. A zero-rate visit bills nothing.
    pub fn billed(visit: &Visit) -> Decimal {
        if visit.rate <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (visit.rate - visit.discount).max(Decimal::ZERO)
    }

    /// Sum of the given payments. The caller passes only one visit's payments.
    pub fn paid(payments: &[Payment]) -> Decimal {
        payments.iter().map(|p| p.amount).sum()
    }

    /// Billed minus paid, unclamped. Negative means over-payment and is only
    /// used internally to reject allocations.
    pub fn raw_balance(visit: &Visit, payments: &[Payment]) -> Decimal {
        Self::billed(visit) - Self::paid(payments)
    }

    /// Outstanding balance as reported to callers, never negative.
    pub fn balance(visit: &Visit, payments: &[Payment]) -> Decimal {
        Self::raw_balance(visit, payments).max(Decimal::ZERO)
    }

    /// Whether anything worth collecting remains.
    pub fn is_outstanding(visit: &Visit, payments: &[Payment]) -> bool {
        Self::balance(visit, payments) >= AMOUNT_EPSILON
    }

    pub fn summarize(visit: &Visit, payments: &[Payment]) -> VisitBalance {
        VisitBalance {
            visit_id: visit.visit_id,
            case_number: visit.case_number.clone(),
            operation: visit.operation.clone(),
            visit_date: visit.visit_date,
            billed: Self::billed(visit),
            paid: Self::paid(payments),
            balance: Self::balance(visit, payments),
        }
    }

    /// Outstanding visits of one patient, oldest first. `payments` may hold the
    /// whole patient's history; each visit only sees its own rows.
    pub fn outstanding(visits: &[Visit], payments: &[Payment]) -> Vec<VisitBalance> {
        let mut ordered: Vec<&Visit> = visits.iter().collect();
        ordered.sort_by(|a, b| {
            a.visit_date
                .cmp(&b.visit_date)
                .then_with(|| a.created_utc.cmp(&b.created_utc))
                .then_with(|| a.visit_id.cmp(&b.visit_id))
        });

        ordered
            .into_iter()
            .filter_map(|visit| {
                let own: Vec<Payment> = payments
                    .iter()
                    .filter(|p| p.visit_id == visit.visit_id)
                    .cloned()
                    .collect();
                Self::is_outstanding(visit, &own).then(|| Self::summarize(visit, &own))
            })
            .collect()
    }
}
