//! The prescription gate: whether a line's prescription unlocks its medicine.

use chrono::NaiveDate;
use common::PrescriptionId;

use crate::catalog::Medicine;
use crate::store::{PrescriptionStore, StoreError};

use super::{Prescription, PrescriptionIssueKind, PrescriptionStatus};

/// Outcome of looking up the prescription attached to a cart or order line.
#[derive(Debug, Clone, Copy)]
pub enum PrescriptionLookup<'a> {
    /// The line carries no prescription reference.
    NotAttached,
    /// A reference is present but no such prescription exists.
    NotFound,
    Found(&'a Prescription),
}

impl<'a> From<Option<&'a Prescription>> for PrescriptionLookup<'a> {
    fn from(found: Option<&'a Prescription>) -> Self {
        match found {
            Some(prescription) => PrescriptionLookup::Found(prescription),
            None => PrescriptionLookup::NotFound,
        }
    }
}

/// Whether a line may be bought.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Purchasable,
    Blocked(PrescriptionIssueKind),
}

impl GateDecision {
    pub fn is_purchasable(&self) -> bool {
        matches!(self, GateDecision::Purchasable)
    }
}

/// Decides whether `medicine` is unlocked by the looked-up prescription.
///
/// Rules are checked in order and the first failing one wins.
pub fn evaluate(medicine: &Medicine, lookup: PrescriptionLookup<'_>, today: NaiveDate) -> GateDecision {
    if !medicine.prescription_required {
        return GateDecision::Purchasable;
    }

    let prescription = match lookup {
        PrescriptionLookup::NotAttached => {
            return GateDecision::Blocked(PrescriptionIssueKind::Missing);
        }
        PrescriptionLookup::NotFound => {
            return GateDecision::Blocked(PrescriptionIssueKind::NotFound);
        }
        PrescriptionLookup::Found(prescription) => prescription,
    };

    if prescription.status != PrescriptionStatus::Verified {
        return GateDecision::Blocked(PrescriptionIssueKind::NotVerified(prescription.status));
    }

    if prescription.is_expired(today) {
        return GateDecision::Blocked(PrescriptionIssueKind::Expired);
    }

    if !prescription.prescribed_medicines.is_empty()
        && !prescription
            .prescribed_medicines
            .iter()
            .any(|entry| medicine.matches_name(entry))
    {
        return GateDecision::Blocked(PrescriptionIssueKind::MedicineNotPrescribed);
    }

    GateDecision::Purchasable
}

/// Prescription gate backed by a prescription store. Never writes.
pub struct PrescriptionGate<'a, S: PrescriptionStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: PrescriptionStore + ?Sized> PrescriptionGate<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Looks the prescription up (when referenced) and evaluates the rules.
    ///
    /// Returns the fetched prescription alongside the decision so callers can
    /// run further checks such as ownership without a second lookup.
    pub async fn check(
        &self,
        medicine: &Medicine,
        prescription_id: Option<PrescriptionId>,
        today: NaiveDate,
    ) -> Result<(GateDecision, Option<Prescription>), StoreError> {
        if !medicine.prescription_required && prescription_id.is_none() {
            return Ok((GateDecision::Purchasable, None));
        }

        let prescription = match prescription_id {
            Some(id) => self.store.get_prescription(id).await?,
            None => None,
        };

        let lookup = match (prescription_id, prescription.as_ref()) {
            (None, _) => PrescriptionLookup::NotAttached,
            (Some(_), found) => PrescriptionLookup::from(found),
        };

        Ok((evaluate(medicine, lookup, today), prescription))
    }

    pub async fn is_line_purchasable(
        &self,
        medicine: &Medicine,
        prescription_id: Option<PrescriptionId>,
        today: NaiveDate,
    ) -> Result<bool, StoreError> {
        let (decision, _) = self.check(medicine, prescription_id, today).await?;
        Ok(decision.is_purchasable())
    }
}
