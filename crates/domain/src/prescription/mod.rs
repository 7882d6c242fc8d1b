//! Prescriptions and the gate that decides whether they unlock a medicine.

mod gate;

use std::str::FromStr;

use chrono::NaiveDate;
use common::{MedicineId, PrescriptionId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

pub use gate::{GateDecision, PrescriptionGate, PrescriptionLookup, evaluate};

/// Verification status of an uploaded prescription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Pending,
    Processing,
    Verified,
    Rejected,
    Expired,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionStatus::Pending => "pending",
            PrescriptionStatus::Processing => "processing",
            PrescriptionStatus::Verified => "verified",
            PrescriptionStatus::Rejected => "rejected",
            PrescriptionStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrescriptionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PrescriptionStatus::Pending),
            "processing" => Ok(PrescriptionStatus::Processing),
            "verified" => Ok(PrescriptionStatus::Verified),
            "rejected" => Ok(PrescriptionStatus::Rejected),
            "expired" => Ok(PrescriptionStatus::Expired),
            other => Err(DomainError::InvalidInput(format!(
                "unknown prescription status: {other}"
            ))),
        }
    }
}

/// A prescription as maintained by the verification workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: PrescriptionId,
    pub user_id: UserId,
    pub status: PrescriptionStatus,
    pub valid_until: Option<NaiveDate>,
    /// Medicine names or generics the doctor prescribed. Empty means unrestricted.
    pub prescribed_medicines: Vec<String>,
}

impl Prescription {
    pub fn new(user_id: UserId, status: PrescriptionStatus) -> Self {
        Self {
            id: PrescriptionId::new(),
            user_id,
            status,
            valid_until: None,
            prescribed_medicines: Vec::new(),
        }
    }

    pub fn verified(user_id: UserId) -> Self {
        Self::new(user_id, PrescriptionStatus::Verified)
    }

    pub fn with_valid_until(mut self, valid_until: NaiveDate) -> Self {
        self.valid_until = Some(valid_until);
        self
    }

    pub fn with_medicines<I, S>(mut self, medicines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prescribed_medicines = medicines.into_iter().map(Into::into).collect();
        self
    }

    /// Expired when the validity end date lies strictly before `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.valid_until.is_some_and(|until| until < today)
    }
}

/// Why a prescription does not unlock a medicine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum PrescriptionIssueKind {
    Missing,
    NotFound,
    NotVerified(PrescriptionStatus),
    Expired,
    MedicineNotPrescribed,
}

impl PrescriptionIssueKind {
    /// Short label used in validation error lists, e.g. `"Aspirin: Prescription expired"`.
    pub fn label(&self) -> &'static str {
        match self {
            PrescriptionIssueKind::Missing => "Prescription required",
            PrescriptionIssueKind::NotFound => "Prescription not found",
            PrescriptionIssueKind::NotVerified(_) => "Prescription not verified",
            PrescriptionIssueKind::Expired => "Prescription expired",
            PrescriptionIssueKind::MedicineNotPrescribed => "Not listed on prescription",
        }
    }
}

impl std::fmt::Display for PrescriptionIssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrescriptionIssueKind::Missing => f.write_str("Prescription required but not provided"),
            PrescriptionIssueKind::NotFound => f.write_str("Prescription not found"),
            PrescriptionIssueKind::NotVerified(status) => {
                write!(f, "Prescription status: {status}")
            }
            PrescriptionIssueKind::Expired => f.write_str("Prescription expired"),
            PrescriptionIssueKind::MedicineNotPrescribed => {
                f.write_str("Medicine not listed on prescription")
            }
        }
    }
}

/// Structured prescription problem reported by cart validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionIssue {
    pub medicine_id: MedicineId,
    pub medicine_name: String,
    pub issue: String,
    pub severity: String,
}

impl PrescriptionIssue {
    pub fn error(medicine_id: MedicineId, medicine_name: &str, kind: PrescriptionIssueKind) -> Self {
        Self {
            medicine_id,
            medicine_name: medicine_name.to_string(),
            issue: kind.to_string(),
            severity: "error".to_string(),
        }
    }
}
