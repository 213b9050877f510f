//! Read-side views built on the waterfall: per-visit replay, the commission
//! report with its CSV export, and the chain sufficiency check.

use crate::error::BillingError;
use crate::models::{
    ChainSufficiency, CommissionReport, CommissionRow, Doctor, DoctorCommissionTotals,
    DoctorRatePeriod, Patient, Payment, ReportFilter, Visit,
};
use crate::services::metrics::record_shortfall_warning;
use crate::services::store::BillingStore;
use crate::services::sufficiency::SufficiencyMonitor;
use crate::services::waterfall::{replay_visit, CommissionResolver, VisitWaterfall, WaterfallRow};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const CSV_HEADER: [&str; 12] = [
    "Date",
    "Case#",
    "Patient",
    "Operation",
    "Doctor",
    "Received",
    "Lab Cost",
    "Commission%",
    "Commission",
    "TDS",
    "Net Payable",
    "Clinic Share",
];

async fn doctor_terms(
    store: &dyn BillingStore,
    doctor_id: Option<Uuid>,
) -> Result<(Option<Doctor>, Vec<DoctorRatePeriod>), BillingError> {
    let Some(id) = doctor_id else {
        return Ok((None, Vec::new()));
    };
    let doctor = store
        .get_doctor(id)
        .await?
        .ok_or(BillingError::DoctorNotFound(id))?;
    let periods = store.list_rate_periods(id).await?;
    Ok((Some(doctor), periods))
}

/// Replay a visit's full payment history.
#[instrument(skip(store, visit), fields(visit_id = %visit.visit_id))]
pub async fn visit_waterfall(
    store: &dyn BillingStore,
    visit: &Visit,
) -> Result<VisitWaterfall, BillingError> {
    let (doctor, periods) = doctor_terms(store, visit.doctor_id).await?;
    let payments = store.list_visit_payments(visit.visit_id).await?;
    replay_visit(
        visit,
        &payments,
        &CommissionResolver::new(doctor.as_ref(), &periods),
    )
}

/// Commission rows for every payment dated inside the filter.
///
/// Each visit is replayed from its first payment, so lab cost already
/// recovered before `from` is not recovered again inside the range.
#[instrument(skip(store))]
pub async fn commission_report(
    store: &dyn BillingStore,
    filter: ReportFilter,
) -> Result<CommissionReport, BillingError> {
    let in_range = store.list_payments_between(filter.from, filter.to).await?;
    let wanted: HashSet<Uuid> = in_range.iter().map(|p| p.payment_id).collect();

    let mut replayed: HashMap<Uuid, (Visit, Option<Doctor>, WaterfallRow)> = HashMap::new();
    let mut seen_visits = HashSet::new();
    for payment in &in_range {
        if !seen_visits.insert(payment.visit_id) {
            continue;
        }
        let visit = store
            .get_visit(payment.visit_id)
            .await?
            .ok_or(BillingError::VisitNotFound(payment.visit_id))?;
        if filter.doctor_id.is_some() && visit.doctor_id != filter.doctor_id {
            continue;
        }

        let (doctor, periods) = doctor_terms(store, visit.doctor_id).await?;
        let history = store.list_visit_payments(visit.visit_id).await?;
        let waterfall = replay_visit(
            &visit,
            &history,
            &CommissionResolver::new(doctor.as_ref(), &periods),
        )?;
        for row in waterfall.rows {
            if wanted.contains(&row.payment_id) {
                replayed.insert(row.payment_id, (visit.clone(), doctor.clone(), row));
            }
        }
    }

    let mut patients: HashMap<Uuid, Patient> = HashMap::new();
    let mut rows = Vec::with_capacity(replayed.len());
    for payment in &in_range {
        let Some((visit, doctor, row)) = replayed.remove(&payment.payment_id) else {
            continue;
        };
        if !patients.contains_key(&visit.patient_id) {
            let patient = store
                .get_patient(visit.patient_id)
                .await?
                .ok_or(BillingError::PatientNotFound(visit.patient_id))?;
            patients.insert(visit.patient_id, patient);
        }
        let patient_name = patients
            .get(&visit.patient_id)
            .map(|p| p.name.clone())
            .unwrap_or_default();

        rows.push(to_commission_row(payment, &visit, patient_name, doctor.as_ref(), row));
    }

    let totals = doctor_totals(&rows);

    info!(
        rows = rows.len(),
        doctors = totals.len(),
        "Commission report built"
    );

    Ok(CommissionReport {
        filter,
        rows,
        totals,
    })
}

fn to_commission_row(
    payment: &Payment,
    visit: &Visit,
    patient_name: String,
    doctor: Option<&Doctor>,
    row: WaterfallRow,
) -> CommissionRow {
    let split = row.split;
    CommissionRow {
        payment_id: payment.payment_id,
        receipt_no: payment.receipt_no,
        payment_date: payment.payment_date,
        visit_id: visit.visit_id,
        case_number: visit.case_number.clone(),
        patient_id: visit.patient_id,
        patient_name,
        operation: visit.operation.clone(),
        doctor_id: doctor.map(|d| d.doctor_id),
        doctor_name: doctor.map(|d| d.name.clone()),
        received: split.received,
        lab_recovered: split.lab_recovered,
        commission_percent: split.commission_percent,
        doctor_gross: split.doctor_gross,
        tds: split.tds,
        doctor_net: split.doctor_net,
        clinic_share: split.clinic_share,
    }
}

/// Per-doctor sums, ordered by doctor name. Rows without a doctor are left out.
pub fn doctor_totals(rows: &[CommissionRow]) -> Vec<DoctorCommissionTotals> {
    let mut by_doctor: HashMap<Uuid, DoctorCommissionTotals> = HashMap::new();
    for row in rows {
        let Some(doctor_id) = row.doctor_id else {
            continue;
        };
        by_doctor
            .entry(doctor_id)
            .or_insert_with(|| {
                DoctorCommissionTotals::new(doctor_id, row.doctor_name.clone().unwrap_or_default())
            })
            .add(row);
    }

    let mut totals: Vec<DoctorCommissionTotals> = by_doctor.into_values().collect();
    totals.sort_by(|a, b| {
        a.doctor_name
            .cmp(&b.doctor_name)
            .then_with(|| a.doctor_id.cmp(&b.doctor_id))
    });
    totals
}

/// Two places, half away from zero.
fn format_amount(amount: Decimal) -> String {
    format!(
        "{:.2}",
        amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    )
}

/// Render report rows as CSV. Amounts are rounded to two places here and
/// nowhere else.
pub fn commission_csv(report: &CommissionReport) -> anyhow::Result<String> {
    let mut csv = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    csv.write_record(CSV_HEADER)?;

    for row in &report.rows {
        let percent = match (row.commission_percent, &row.doctor_name) {
            (Some(p), _) => format_amount(p),
            (None, Some(_)) => "Flat".to_string(),
            (None, None) => String::new(),
        };
        let fields = [
            row.payment_date.format("%Y-%m-%d").to_string(),
            row.case_number.clone(),
            row.patient_name.clone(),
            row.operation.clone(),
            row.doctor_name.clone().unwrap_or_default(),
            format_amount(row.received),
            format_amount(row.lab_recovered),
            percent,
            format_amount(row.doctor_gross),
            format_amount(row.tds),
            format_amount(row.doctor_net),
            format_amount(row.clinic_share),
        ];
        csv.write_record(&fields)?;
    }

    let bytes = csv.into_inner().map_err(|e| anyhow::anyhow!("CSV flush failed: {e}"))?;
    Ok(String::from_utf8(bytes)?)
}

/// Collection position of the chain `visit` belongs to. Logs and counts a
/// warning when the chain is short; never fails because of a shortfall.
#[instrument(skip(store, visit), fields(visit_id = %visit.visit_id))]
pub async fn chain_sufficiency(
    store: &dyn BillingStore,
    visit: &Visit,
) -> Result<ChainSufficiency, BillingError> {
    let root = if visit.is_root() {
        visit.clone()
    } else {
        store
            .get_visit(visit.root_visit_id)
            .await?
            .ok_or(BillingError::VisitNotFound(visit.root_visit_id))?
    };

    let chain = store.list_chain_visits(root.visit_id).await?;
    let mut payments = Vec::new();
    for member in &chain {
        payments.extend(store.list_visit_payments(member.visit_id).await?);
    }

    let (doctor, periods) = doctor_terms(store, root.doctor_id).await?;
    let fee_basis = SufficiencyMonitor::doctor_fee_basis(
        &root,
        &CommissionResolver::new(doctor.as_ref(), &periods),
    );
    let result = SufficiencyMonitor::check_chain(&root, &chain, &payments, fee_basis);

    if result.needs_warning() {
        record_shortfall_warning();
        warn!(
            root_visit_id = %result.root_visit_id,
            minimum_needed = %result.minimum_needed,
            collected = %result.collected,
            shortfall = %result.shortfall,
            "Treatment chain below doctor fee plus lab cost"
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommissionTerms, CreateDoctor, CreatePatient, CreateVisit, PaymentMode};
    use crate::services::allocator::{AllocationLine, AllocationPlan};
    use crate::services::ledger::fixtures::date;
    use crate::services::store::InMemoryStore;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    struct Clinic {
        store: InMemoryStore,
        patient: Patient,
        percent_doctor: Doctor,
        flat_doctor: Doctor,
    }

    async fn clinic() -> Clinic {
        let store = InMemoryStore::new();
        let patient = store
            .create_patient(&CreatePatient {
                name: "Menon, Ravi".to_string(),
            })
            .await
            .unwrap();
        let percent_doctor = store
            .create_doctor(&CreateDoctor {
                name: "Dr. Anand".to_string(),
                terms: CommissionTerms::Percent { percent: d(50) },
                tds_percent: d(10),
            })
            .await
            .unwrap();
        let flat_doctor = store
            .create_doctor(&CreateDoctor {
                name: "Dr. Basu".to_string(),
                terms: CommissionTerms::Flat { amount: d(2_000) },
                tds_percent: d(10),
            })
            .await
            .unwrap();
        Clinic {
            store,
            patient,
            percent_doctor,
            flat_doctor,
        }
    }

    impl Clinic {
        async fn visit(&self, doctor: &Doctor, day: u32, rate: i64, lab: i64) -> Visit {
            self.store
                .create_visit(&CreateVisit {
                    patient_id: self.patient.patient_id,
                    root_visit_id: None,
                    doctor_id: Some(doctor.doctor_id),
                    case_number: format!("C-{day}"),
                    operation: "Implant".to_string(),
                    visit_date: date(day),
                    rate: d(rate),
                    discount: Decimal::ZERO,
                    lab_unit_rate: d(lab),
                    lab_quantity: Decimal::ONE,
                    doctor_commission_percent: None,
                })
                .await
                .unwrap()
        }

        async fn pay(&self, visit: &Visit, amount: i64, day: u32) -> Payment {
            self.store
                .commit_allocation(&AllocationPlan {
                    patient_id: self.patient.patient_id,
                    total_amount: d(amount),
                    lines: vec![AllocationLine {
                        visit_id: visit.visit_id,
                        amount: d(amount),
                    }],
                    payment_date: date(day),
                    mode: PaymentMode::Cash,
                    note: None,
                })
                .await
                .unwrap()
                .remove(0)
        }
    }

    #[tokio::test]
    async fn test_report_replays_payments_before_range() {
        let c = clinic().await;
        let v = c.visit(&c.percent_doctor, 1, 20_000, 5_000).await;
        c.pay(&v, 3_000, 2).await;
        c.pay(&v, 4_000, 12).await;

        let report = commission_report(
            &c.store,
            ReportFilter {
                from: Some(date(10)),
                to: Some(date(31)),
                doctor_id: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(row.lab_recovered, d(2_000));
        assert_eq!(row.doctor_gross, d(1_000));
        assert_eq!(row.tds, d(100));
        assert_eq!(row.clinic_share, d(1_000));
        assert_eq!(row.patient_name, "Menon, Ravi");
    }

    #[tokio::test]
    async fn test_report_filters_by_doctor_and_totals() {
        let c = clinic().await;
        let a = c.visit(&c.percent_doctor, 1, 10_000, 0).await;
        let b = c.visit(&c.flat_doctor, 1, 10_000, 0).await;
        c.pay(&a, 1_000, 3).await;
        c.pay(&a, 1_000, 4).await;
        c.pay(&b, 5_000, 4).await;

        let all = commission_report(&c.store, ReportFilter::default())
            .await
            .unwrap();
        assert_eq!(all.rows.len(), 3);
        assert_eq!(all.totals.len(), 2);
        assert_eq!(all.totals[0].doctor_name, "Dr. Anand");
        assert_eq!(all.totals[0].payment_count, 2);
        assert_eq!(all.totals[0].doctor_gross, d(1_000));
        assert_eq!(all.totals[1].doctor_gross, d(2_000));

        let only_flat = commission_report(
            &c.store,
            ReportFilter {
                doctor_id: Some(c.flat_doctor.doctor_id),
                ..ReportFilter::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(only_flat.rows.len(), 1);
        assert_eq!(only_flat.rows[0].commission_percent, None);
    }

    #[tokio::test]
    async fn test_csv_layout() {
        let c = clinic().await;
        let a = c.visit(&c.percent_doctor, 1, 10_000, 2_000).await;
        let b = c.visit(&c.flat_doctor, 1, 10_000, 0).await;
        c.pay(&a, 10_000, 3).await;
        c.pay(&b, 500, 4).await;

        let report = commission_report(&c.store, ReportFilter::default())
            .await
            .unwrap();
        let csv = commission_csv(&report).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], CSV_HEADER.join(","));
        assert_eq!(
            lines[1],
            "2026-01-03,C-1,\"Menon, Ravi\",Implant,Dr. Anand,10000.00,2000.00,50.00,4000.00,400.00,3600.00,4000.00"
        );
        assert!(lines[2].contains(",Flat,500.00,"));
    }

    #[tokio::test]
    async fn test_csv_rounds_fractional_amounts() {
        let c = clinic().await;
        let received: Decimal = "1234.57".parse().unwrap();
        let v = c
            .store
            .create_visit(&CreateVisit {
                patient_id: c.patient.patient_id,
                root_visit_id: None,
                doctor_id: Some(c.percent_doctor.doctor_id),
                case_number: "C-7".to_string(),
                operation: "Crown\r\nprep".to_string(),
                visit_date: date(7),
                rate: received,
                discount: Decimal::ZERO,
                lab_unit_rate: Decimal::ZERO,
                lab_quantity: Decimal::ZERO,
                doctor_commission_percent: Some("33.3333".parse().unwrap()),
            })
            .await
            .unwrap();
        c.store
            .commit_allocation(&AllocationPlan {
                patient_id: c.patient.patient_id,
                total_amount: received,
                lines: vec![AllocationLine {
                    visit_id: v.visit_id,
                    amount: received,
                }],
                payment_date: date(8),
                mode: PaymentMode::Upi,
                note: None,
            })
            .await
            .unwrap();

        let report = commission_report(&c.store, ReportFilter::default())
            .await
            .unwrap();
        let csv = commission_csv(&report).unwrap();

        assert!(csv.contains(
            "2026-01-08,C-7,\"Menon, Ravi\",\"Crown\r\nprep\",Dr. Anand,1234.57,0.00,33.33,411.52,41.15,370.37,823.05\n"
        ));
    }

    #[test]
    fn test_format_amount_rounds_half_away_from_zero() {
        assert_eq!(format_amount("1.239".parse().unwrap()), "1.24");
        assert_eq!(format_amount("2.005".parse().unwrap()), "2.01");
        assert_eq!(format_amount("-2.005".parse().unwrap()), "-2.01");
        assert_eq!(format_amount(Decimal::from(7)), "7.00");
    }

    #[tokio::test]
    async fn test_chain_sufficiency_from_follow_up() {
        let c = clinic().await;
        let root = c.visit(&c.flat_doctor, 1, 20_000, 1_000).await;
        let follow_up = c
            .store
            .create_visit(&CreateVisit {
                patient_id: c.patient.patient_id,
                root_visit_id: Some(root.visit_id),
                doctor_id: None,
                case_number: "C-1b".to_string(),
                operation: "Fitting".to_string(),
                visit_date: date(8),
                rate: d(1_000),
                discount: Decimal::ZERO,
                lab_unit_rate: d(500),
                lab_quantity: Decimal::ONE,
                doctor_commission_percent: None,
            })
            .await
            .unwrap();
        c.pay(&root, 1_500, 2).await;
        c.pay(&follow_up, 500, 8).await;

        let result = chain_sufficiency(&c.store, &follow_up).await.unwrap();

        assert_eq!(result.root_visit_id, root.visit_id);
        assert_eq!(result.visit_count, 2);
        assert_eq!(result.minimum_needed, d(3_500));
        assert_eq!(result.collected, d(2_000));
        assert_eq!(result.shortfall, d(1_500));
    }

    #[tokio::test]
    async fn test_visit_waterfall_uses_stored_doctor() {
        let c = clinic().await;
        let v = c.visit(&c.flat_doctor, 1, 10_000, 0).await;
        c.pay(&v, 1_500, 2).await;
        c.pay(&v, 1_500, 3).await;

        let waterfall = visit_waterfall(&c.store, &v).await.unwrap();
        assert_eq!(waterfall.rows.len(), 2);
        assert_eq!(waterfall.total_doctor_gross(), d(2_000));
    }
}
