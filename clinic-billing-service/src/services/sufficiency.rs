//! Warn when a treatment chain has not yet collected the doctor fee plus lab costs.

use crate::models::{ChainSufficiency, Payment, Visit};
use crate::services::ledger::LedgerCalculator;
use crate::services::waterfall::{AppliedCommission, CommissionResolver};
use rust_decimal::Decimal;
use std::collections::HashSet;

pub struct SufficiencyMonitor;

impl SufficiencyMonitor {
    /// What the treating doctor stands to earn from the root visit: the flat
    /// fee, or the percent of the root's billed amount in effect on its date.
    pub fn doctor_fee_basis(root: &Visit, resolver: &CommissionResolver<'_>) -> Decimal {
        match resolver.for_payment(root, root.visit_date) {
            AppliedCommission::None => Decimal::ZERO,
            AppliedCommission::Flat(amount) => amount,
            AppliedCommission::Percent(percent) => {
                LedgerCalculator::billed(root) * percent / Decimal::ONE_HUNDRED
            }
        }
    }

    /// Compare a chain's collections with its floor. `chain` may or may not
    /// contain the root; visits rooted elsewhere are ignored.
    pub fn check_chain(
        root: &Visit,
        chain: &[Visit],
        payments: &[Payment],
        doctor_fee_basis: Decimal,
    ) -> ChainSufficiency {
        let mut seen = HashSet::new();
        let members: Vec<&Visit> = std::iter::once(root)
            .chain(
                chain
                    .iter()
                    .filter(|v| v.root_visit_id == root.visit_id),
            )
            .filter(|v| seen.insert(v.visit_id))
            .collect();

        let lab_cost_total: Decimal = members.iter().map(|v| v.lab_cost()).sum();
        let collected: Decimal = members
            .iter()
            .map(|v| {
                let own: Vec<Payment> = payments
                    .iter()
                    .filter(|p| p.visit_id == v.visit_id)
                    .cloned()
                    .collect();
                LedgerCalculator::paid(&own)
            })
            .sum();

        let minimum_needed = doctor_fee_basis + lab_cost_total;

        ChainSufficiency {
            root_visit_id: root.visit_id,
            visit_count: members.len(),
            doctor_fee_basis,
            lab_cost_total,
            collected,
            minimum_needed,
            shortfall: (minimum_needed - collected).max(Decimal::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Doctor;
    use crate::services::ledger::fixtures::{payment, visit};
    use chrono::Utc;
    use uuid::Uuid;

    fn follow_up(root: &Visit, day: u32, lab: i64) -> Visit {
        let mut v = visit(root.patient_id, day, 0, 0);
        v.root_visit_id = root.visit_id;
        v.lab_unit_rate = Decimal::from(lab);
        v.lab_quantity = Decimal::ONE;
        v
    }

    #[test]
    fn test_shortfall_against_fee_plus_lab() {
        let root = visit(Uuid::new_v4(), 1, 20_000, 0);
        let step1 = follow_up(&root, 5, 1_200);
        let step2 = follow_up(&root, 9, 800);
        let payments = vec![payment(&root, 4_000, 1, 1), payment(&root, 3_000, 9, 2)];

        let result = SufficiencyMonitor::check_chain(
            &root,
            &[step1, step2],
            &payments,
            Decimal::from(8_000),
        );

        assert_eq!(result.minimum_needed, Decimal::from(10_000));
        assert_eq!(result.collected, Decimal::from(7_000));
        assert_eq!(result.shortfall, Decimal::from(3_000));
        assert_eq!(result.visit_count, 3);
        assert!(result.needs_warning());
    }

    #[test]
    fn test_no_shortfall_once_floor_reached() {
        let root = visit(Uuid::new_v4(), 1, 20_000, 0);
        let payments = vec![payment(&root, 12_000, 1, 1)];

        let result =
            SufficiencyMonitor::check_chain(&root, &[], &payments, Decimal::from(8_000));

        assert_eq!(result.shortfall, Decimal::ZERO);
        assert!(!result.needs_warning());
    }

    #[test]
    fn test_root_listed_in_chain_is_counted_once() {
        let mut root = visit(Uuid::new_v4(), 1, 5_000, 0);
        root.lab_unit_rate = Decimal::from(500);
        root.lab_quantity = Decimal::ONE;
        let payments = vec![payment(&root, 1_000, 1, 1)];

        let result = SufficiencyMonitor::check_chain(
            &root,
            &[root.clone()],
            &payments,
            Decimal::ZERO,
        );

        assert_eq!(result.visit_count, 1);
        assert_eq!(result.lab_cost_total, Decimal::from(500));
        assert_eq!(result.collected, Decimal::from(1_000));
    }

    #[test]
    fn test_foreign_visits_are_ignored() {
        let root = visit(Uuid::new_v4(), 1, 5_000, 0);
        let stranger = visit(root.patient_id, 2, 5_000, 0);
        let payments = vec![payment(&stranger, 5_000, 2, 1)];

        let result =
            SufficiencyMonitor::check_chain(&root, &[stranger], &payments, Decimal::from(100));

        assert_eq!(result.collected, Decimal::ZERO);
        assert_eq!(result.shortfall, Decimal::from(100));
    }

    #[test]
    fn test_fee_basis_for_percent_doctor_uses_billed_amount() {
        let mut root = visit(Uuid::new_v4(), 1, 10_000, 2_000);
        root.doctor_commission_percent = Some(Decimal::from(40));
        let doctor = Doctor {
            doctor_id: Uuid::new_v4(),
            name: "Dr. Mehta".to_string(),
            commission_percent: Some(Decimal::from(50)),
            commission_rate: None,
            tds_percent: Decimal::TEN,
            created_utc: Utc::now(),
        };
        let resolver = CommissionResolver::new(Some(&doctor), &[]);

        assert_eq!(
            SufficiencyMonitor::doctor_fee_basis(&root, &resolver),
            Decimal::from(3_200)
        );
    }

    #[test]
    fn test_fee_basis_for_flat_doctor_is_the_fee() {
        let root = visit(Uuid::new_v4(), 1, 10_000, 0);
        let doctor = Doctor {
            doctor_id: Uuid::new_v4(),
            name: "Dr. Shah".to_string(),
            commission_percent: None,
            commission_rate: Some(Decimal::from(8_000)),
            tds_percent: Decimal::TEN,
            created_utc: Utc::now(),
        };
        let resolver = CommissionResolver::new(Some(&doctor), &[]);

        assert_eq!(
            SufficiencyMonitor::doctor_fee_basis(&root, &resolver),
            Decimal::from(8_000)
        );
    }

    #[test]
    fn test_fee_basis_without_doctor_is_zero() {
        let root = visit(Uuid::new_v4(), 1, 10_000, 0);
        let resolver = CommissionResolver::new(None, &[]);
        assert_eq!(
            SufficiencyMonitor::doctor_fee_basis(&root, &resolver),
            Decimal::ZERO
        );
    }
}
