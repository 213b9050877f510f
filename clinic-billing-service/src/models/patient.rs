//! Patient model. Only the fields reports print are carried here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: Uuid,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}

/// Input for registering a patient.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePatient {
    #[validate(length(min = 1, message = "Patient name cannot be empty"))]
    pub name: String,
}
