//! Catalog entries as seen by the cart and order pipeline.
//!
//! Catalog CRUD lives elsewhere; this crate only reads medicines and adjusts
//! their stock when orders are placed or cancelled before dispatch.

use chrono::NaiveDate;
use common::MedicineId;
use serde::{Deserialize, Serialize};

use crate::value_objects::Money;

/// A sellable medicine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medicine {
    pub id: MedicineId,
    pub name: String,
    pub generic_name: Option<String>,
    pub manufacturer: Option<String>,
    pub price: Money,
    pub prescription_required: bool,
    pub stock_quantity: u32,
    pub min_stock_level: u32,
    pub expiry_date: Option<NaiveDate>,
}

impl Medicine {
    /// Creates an over-the-counter medicine with no expiry date.
    pub fn new(name: impl Into<String>, price: Money, stock_quantity: u32) -> Self {
        Self {
            id: MedicineId::new(),
            name: name.into(),
            generic_name: None,
            manufacturer: None,
            price,
            prescription_required: false,
            stock_quantity,
            min_stock_level: 10,
            expiry_date: None,
        }
    }

    pub fn with_generic_name(mut self, generic_name: impl Into<String>) -> Self {
        self.generic_name = Some(generic_name.into());
        self
    }

    pub fn with_prescription_required(mut self) -> Self {
        self.prescription_required = true;
        self
    }

    pub fn with_expiry_date(mut self, expiry_date: NaiveDate) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    pub fn with_min_stock_level(mut self, min_stock_level: u32) -> Self {
        self.min_stock_level = min_stock_level;
        self
    }

    /// True once the expiry date is today or in the past.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry <= today)
    }

    /// Days until expiry, negative once expired. `None` without an expiry date.
    pub fn days_to_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expiry_date
            .map(|expiry| expiry.signed_duration_since(today).num_days())
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.min_stock_level
    }

    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.stock_quantity >= quantity
    }

    /// Case-insensitive match of the brand or generic name against `entry`.
    pub fn matches_name(&self, entry: &str) -> bool {
        let entry = entry.trim().to_lowercase();
        self.name.to_lowercase() == entry
            || self
                .generic_name
                .as_deref()
                .is_some_and(|generic| generic.to_lowercase() == entry)
    }
}
