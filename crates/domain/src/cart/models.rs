use chrono::{DateTime, Utc};
use common::{CartId, CartLineId, MedicineId, PrescriptionId, UserId};
use serde::{Deserialize, Serialize};

use crate::catalog::Medicine;
use crate::pricing::Totals;
use crate::prescription::PrescriptionIssue;
use crate::value_objects::Money;

/// Maximum units of one medicine per cart line.
pub const MAX_LINE_QUANTITY: u32 = 100;

/// Maximum length of a cart line note, in characters.
pub const MAX_NOTES_LEN: usize = 500;

/// A user's active cart. Lines are stored separately, keyed by cart id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: CartId::new(),
            user_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One medicine in a cart. At most one line exists per (cart, medicine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartLineId,
    pub cart_id: CartId,
    pub medicine_id: MedicineId,
    pub quantity: u32,
    pub prescription_id: Option<PrescriptionId>,
    pub notes: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// How an upsert changes the quantity of an existing line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityChange {
    /// Add to the current quantity, or start a new line with it.
    Add(u32),
    /// Replace the current quantity.
    Set(u32),
}

impl QuantityChange {
    /// Quantity after applying the change to `current` (0 for a new line).
    pub fn apply(&self, current: u32) -> u32 {
        match self {
            QuantityChange::Add(amount) => current.saturating_add(*amount),
            QuantityChange::Set(quantity) => *quantity,
        }
    }
}

/// Insert-or-update request for the line of `medicine_id` in a cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineUpsert {
    pub medicine_id: MedicineId,
    pub change: QuantityChange,
    /// Replaces the stored reference when set; otherwise the existing one is kept.
    pub prescription_id: Option<PrescriptionId>,
    /// Replaces the stored note when set.
    pub notes: Option<String>,
    /// The store rejects a resulting quantity above this limit.
    pub max_quantity: u32,
}

/// In-place update of one line, addressed by its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineUpdate {
    pub quantity: u32,
    /// Replaces the stored reference when set.
    pub prescription_id: Option<PrescriptionId>,
    pub notes: Option<String>,
}

/// A cart line joined with its catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineView {
    pub id: CartLineId,
    pub medicine: Medicine,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
    pub prescription_id: Option<PrescriptionId>,
    pub notes: Option<String>,
    pub is_prescription_valid: bool,
    pub added_at: DateTime<Utc>,
}

/// A cart with its resolved lines and live totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartView {
    pub id: CartId,
    pub user_id: UserId,
    pub lines: Vec<CartLineView>,
    pub total_items: u32,
    pub totals: Totals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate prescription state of a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionValidationStatus {
    /// Every prescription-required line is unlocked, or there are none.
    Valid,
    /// Some prescription-required line has no prescription attached yet.
    Pending,
    /// Some attached prescription does not unlock its medicine.
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    pub total_items: u32,
    pub subtotal: Money,
    pub tax_amount: Money,
    pub delivery_fee: Money,
    pub total_amount: Money,
    pub has_prescription_items: bool,
    pub prescription_validation_status: PrescriptionValidationStatus,
}

/// Verdict of cart validation. Valid iff `errors` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub prescription_issues: Vec<PrescriptionIssue>,
}
