//! Database service for clinic-billing-service.

use crate::error::BillingError;
use crate::models::{
    CreateDoctor, CreatePatient, CreateRatePeriod, CreateVisit, Doctor, DoctorRatePeriod, Patient,
    Payment, Visit,
};
use crate::services::allocator::{AllocationPlan, PaymentAllocator};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{new_doctor, new_rate_period, new_visit, BillingStore};
use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const VISIT_COLUMNS: &str = "visit_id, patient_id, root_visit_id, doctor_id, case_number, operation, \
     visit_date, rate, discount, lab_unit_rate, lab_quantity, doctor_commission_percent, created_utc";

const PAYMENT_COLUMNS: &str =
    "payment_id, visit_id, patient_id, amount, receipt_no, payment_date, mode, note, created_utc";

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> BillingError {
    move |e| BillingError::Database(anyhow::anyhow!("{}: {}", context, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "clinic-billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), BillingError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err("Health check failed"))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Patients and doctors
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input))]
    async fn create_patient(&self, input: &CreatePatient) -> Result<Patient, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_patient"])
            .start_timer();

        let patient = sqlx::query_as::<_, Patient>(
            r#"
            INSERT INTO patients (patient_id, name)
            VALUES ($1, $2)
            RETURNING patient_id, name, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.name.trim())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to create patient"))?;

        timer.observe_duration();

        info!(patient_id = %patient.patient_id, "Patient created");

        Ok(patient)
    }

    #[instrument(skip(self), fields(patient_id = %patient_id))]
    async fn get_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_patient"])
            .start_timer();

        let patient = sqlx::query_as::<_, Patient>(
            "SELECT patient_id, name, created_utc FROM patients WHERE patient_id = $1",
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get patient"))?;

        timer.observe_duration();

        Ok(patient)
    }

    #[instrument(skip(self, input), fields(basis = input.terms.as_str()))]
    async fn create_doctor(&self, input: &CreateDoctor) -> Result<Doctor, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_doctor"])
            .start_timer();

        let row = new_doctor(input)?;
        let doctor = sqlx::query_as::<_, Doctor>(
            r#"
            INSERT INTO doctors (doctor_id, name, commission_percent, commission_rate, tds_percent)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING doctor_id, name, commission_percent, commission_rate, tds_percent, created_utc
            "#,
        )
        .bind(row.doctor_id)
        .bind(&row.name)
        .bind(row.commission_percent)
        .bind(row.commission_rate)
        .bind(row.tds_percent)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to create doctor"))?;

        timer.observe_duration();

        info!(doctor_id = %doctor.doctor_id, "Doctor created");

        Ok(doctor)
    }

    #[instrument(skip(self), fields(doctor_id = %doctor_id))]
    async fn get_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_doctor"])
            .start_timer();

        let doctor = sqlx::query_as::<_, Doctor>(
            r#"
            SELECT doctor_id, name, commission_percent, commission_rate, tds_percent, created_utc
            FROM doctors
            WHERE doctor_id = $1
            "#,
        )
        .bind(doctor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get doctor"))?;

        timer.observe_duration();

        Ok(doctor)
    }

    #[instrument(skip(self, input), fields(doctor_id = %input.doctor_id))]
    async fn add_rate_period(
        &self,
        input: &CreateRatePeriod,
    ) -> Result<DoctorRatePeriod, BillingError> {
        let row = new_rate_period(input)?;
        if self.get_doctor(input.doctor_id).await?.is_none() {
            return Err(BillingError::DoctorNotFound(input.doctor_id));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_rate_period"])
            .start_timer();

        let period = sqlx::query_as::<_, DoctorRatePeriod>(
            r#"
            INSERT INTO doctor_rate_periods (period_id, doctor_id, commission_percent, effective_from, effective_to)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING period_id, doctor_id, commission_percent, effective_from, effective_to
            "#,
        )
        .bind(row.period_id)
        .bind(row.doctor_id)
        .bind(row.commission_percent)
        .bind(row.effective_from)
        .bind(row.effective_to)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to add rate period"))?;

        timer.observe_duration();

        Ok(period)
    }

    #[instrument(skip(self), fields(doctor_id = %doctor_id))]
    async fn list_rate_periods(
        &self,
        doctor_id: Uuid,
    ) -> Result<Vec<DoctorRatePeriod>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_rate_periods"])
            .start_timer();

        let periods = sqlx::query_as::<_, DoctorRatePeriod>(
            r#"
            SELECT period_id, doctor_id, commission_percent, effective_from, effective_to
            FROM doctor_rate_periods
            WHERE doctor_id = $1
            ORDER BY effective_from
            "#,
        )
        .bind(doctor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list rate periods"))?;

        timer.observe_duration();

        Ok(periods)
    }

    // -------------------------------------------------------------------------
    // Visits
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(patient_id = %input.patient_id))]
    async fn create_visit(&self, input: &CreateVisit) -> Result<Visit, BillingError> {
        if self.get_patient(input.patient_id).await?.is_none() {
            return Err(BillingError::PatientNotFound(input.patient_id));
        }
        let doctor = match input.doctor_id {
            Some(id) => Some(
                self.get_doctor(id)
                    .await?
                    .ok_or(BillingError::DoctorNotFound(id))?,
            ),
            None => None,
        };
        let periods = match &doctor {
            Some(d) => self.list_rate_periods(d.doctor_id).await?,
            None => Vec::new(),
        };
        let parent = match input.root_visit_id {
            Some(id) => self.get_visit(id).await?,
            None => None,
        };

        let row = new_visit(input, parent.as_ref(), doctor.as_ref(), &periods)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_visit"])
            .start_timer();

        let visit = sqlx::query_as::<_, Visit>(&format!(
            r#"
            INSERT INTO visits (visit_id, patient_id, root_visit_id, doctor_id, case_number, operation,
                visit_date, rate, discount, lab_unit_rate, lab_quantity, doctor_commission_percent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {VISIT_COLUMNS}
            "#
        ))
        .bind(row.visit_id)
        .bind(row.patient_id)
        .bind(row.root_visit_id)
        .bind(row.doctor_id)
        .bind(&row.case_number)
        .bind(&row.operation)
        .bind(row.visit_date)
        .bind(row.rate)
        .bind(row.discount)
        .bind(row.lab_unit_rate)
        .bind(row.lab_quantity)
        .bind(row.doctor_commission_percent)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to create visit"))?;

        timer.observe_duration();

        info!(
            visit_id = %visit.visit_id,
            root_visit_id = %visit.root_visit_id,
            "Visit created"
        );

        Ok(visit)
    }

    #[instrument(skip(self), fields(visit_id = %visit_id))]
    async fn get_visit(&self, visit_id: Uuid) -> Result<Option<Visit>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_visit"])
            .start_timer();

        let visit = sqlx::query_as::<_, Visit>(&format!(
            "SELECT {VISIT_COLUMNS} FROM visits WHERE visit_id = $1"
        ))
        .bind(visit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get visit"))?;

        timer.observe_duration();

        Ok(visit)
    }

    #[instrument(skip(self), fields(patient_id = %patient_id))]
    async fn list_patient_visits(&self, patient_id: Uuid) -> Result<Vec<Visit>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_patient_visits"])
            .start_timer();

        let visits = sqlx::query_as::<_, Visit>(&format!(
            r#"
            SELECT {VISIT_COLUMNS}
            FROM visits
            WHERE patient_id = $1
            ORDER BY visit_date, created_utc
            "#
        ))
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list visits"))?;

        timer.observe_duration();

        Ok(visits)
    }

    #[instrument(skip(self), fields(root_visit_id = %root_visit_id))]
    async fn list_chain_visits(&self, root_visit_id: Uuid) -> Result<Vec<Visit>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_chain_visits"])
            .start_timer();

        let visits = sqlx::query_as::<_, Visit>(&format!(
            r#"
            SELECT {VISIT_COLUMNS}
            FROM visits
            WHERE root_visit_id = $1
            ORDER BY visit_date, created_utc
            "#
        ))
        .bind(root_visit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list chain visits"))?;

        timer.observe_duration();

        Ok(visits)
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(visit_id = %visit_id))]
    async fn list_visit_payments(&self, visit_id: Uuid) -> Result<Vec<Payment>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_visit_payments"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE visit_id = $1
            ORDER BY payment_date, created_utc, receipt_no
            "#
        ))
        .bind(visit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list visit payments"))?;

        timer.observe_duration();

        Ok(payments)
    }

    #[instrument(skip(self), fields(patient_id = %patient_id))]
    async fn list_patient_payments(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<Payment>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_patient_payments"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE patient_id = $1
            ORDER BY payment_date, created_utc, receipt_no
            "#
        ))
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list patient payments"))?;

        timer.observe_duration();

        Ok(payments)
    }

    #[instrument(skip(self))]
    async fn list_payments_between(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Payment>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments_between"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE ($1::date IS NULL OR payment_date >= $1)
              AND ($2::date IS NULL OR payment_date <= $2)
            ORDER BY payment_date, created_utc, receipt_no
            "#
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list payments"))?;

        timer.observe_duration();

        Ok(payments)
    }

    /// Visits are locked in id order so two allocations touching the same
    /// visits cannot deadlock. The receipt counter row is locked by its
    /// UPDATE, which serialises numbering across all allocations.
    #[instrument(skip(self, plan), fields(patient_id = %plan.patient_id, lines = plan.lines.len()))]
    async fn commit_allocation(&self, plan: &AllocationPlan) -> Result<Vec<Payment>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_allocation"])
            .start_timer();

        let mut ids = plan.visit_ids();
        ids.sort();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        let visits = sqlx::query_as::<_, Visit>(&format!(
            r#"
            SELECT {VISIT_COLUMNS}
            FROM visits
            WHERE visit_id = ANY($1)
            ORDER BY visit_id
            FOR UPDATE
            "#
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err("Failed to lock visits"))?;

        let existing = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE visit_id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err("Failed to read payments"))?;

        if let Err(e) = PaymentAllocator::check_against_ledger(plan, &visits, &existing) {
            tx.rollback().await.ok();
            return Err(e);
        }

        let count = plan.lines.len() as i64;
        let last_receipt_no = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE receipt_sequence
            SET last_receipt_no = GREATEST(
                last_receipt_no,
                (SELECT COALESCE(MAX(receipt_no), 0) FROM payments)
            ) + $1
            WHERE id = 1
            RETURNING last_receipt_no
            "#,
        )
        .bind(count)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to reserve receipt numbers"))?;
        let first_receipt_no = last_receipt_no - count + 1;

        let mut inserted = Vec::with_capacity(plan.lines.len());
        for (offset, line) in plan.lines.iter().enumerate() {
            let payment = sqlx::query_as::<_, Payment>(&format!(
                r#"
                INSERT INTO payments (payment_id, visit_id, patient_id, amount, receipt_no, payment_date, mode, note)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING {PAYMENT_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(line.visit_id)
            .bind(plan.patient_id)
            .bind(line.amount)
            .bind(first_receipt_no + offset as i64)
            .bind(plan.payment_date)
            .bind(plan.mode.as_str())
            .bind(&plan.note)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("Failed to insert payment"))?;
            inserted.push(payment);
        }

        tx.commit()
            .await
            .map_err(db_err("Failed to commit transaction"))?;

        timer.observe_duration();

        info!(
            first_receipt_no = first_receipt_no,
            last_receipt_no = last_receipt_no,
            "Payments recorded"
        );

        Ok(inserted)
    }

    #[instrument(skip(self), fields(payment_id = %payment_id))]
    async fn delete_payment(&self, payment_id: Uuid) -> Result<Payment, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "DELETE FROM payments WHERE payment_id = $1 RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to delete payment"))?
        .ok_or(BillingError::PaymentNotFound(payment_id))?;

        timer.observe_duration();

        info!(receipt_no = payment.receipt_no, "Payment deleted");

        Ok(payment)
    }
}
