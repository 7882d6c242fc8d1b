//! Whole-cart validation: stock, expiry and prescription checks per line.

use chrono::NaiveDate;

use crate::catalog::Medicine;
use crate::prescription::{GateDecision, PrescriptionGate, PrescriptionIssue};
use crate::store::{Result, Store};

use super::models::{CartLine, ValidationResult};

/// Days ahead within which an expiry date produces a warning.
pub const EXPIRY_WARNING_DAYS: i64 = 30;

/// Validates cart lines against the catalog and prescription stores.
///
/// Lines are checked in the order given so messages are deterministic.
/// Every problem is collected; nothing short-circuits except an empty cart.
pub struct CartValidator<'a, S: Store + ?Sized> {
    store: &'a S,
    today: NaiveDate,
}

impl<'a, S: Store + ?Sized> CartValidator<'a, S> {
    pub fn new(store: &'a S, today: NaiveDate) -> Self {
        Self { store, today }
    }

    pub async fn validate(&self, lines: &[CartLine]) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        if lines.is_empty() {
            result.errors.push("Cart is empty".to_string());
            metrics::counter!("cart_validations_total", "valid" => "false").increment(1);
            return Ok(result);
        }

        let gate = PrescriptionGate::new(self.store);
        for line in lines {
            let Some(medicine) = self.store.get_medicine(line.medicine_id).await? else {
                result.errors.push(format!(
                    "Medicine {} is no longer available",
                    line.medicine_id
                ));
                continue;
            };

            self.check_stock_and_expiry(&medicine, line.quantity, &mut result);

            if medicine.prescription_required {
                let (decision, _) = gate
                    .check(&medicine, line.prescription_id, self.today)
                    .await?;
                if let GateDecision::Blocked(kind) = decision {
                    result
                        .prescription_issues
                        .push(PrescriptionIssue::error(medicine.id, &medicine.name, kind));
                    result
                        .errors
                        .push(format!("{}: {}", medicine.name, kind.label()));
                }
            }

            self.collect_warnings(&medicine, &mut result);
        }

        result.is_valid = result.errors.is_empty();
        metrics::counter!("cart_validations_total", "valid" => result.is_valid.to_string())
            .increment(1);
        if !result.is_valid {
            tracing::warn!(errors = result.errors.len(), "Cart validation failed");
        }
        Ok(result)
    }

    fn check_stock_and_expiry(&self, medicine: &Medicine, quantity: u32, result: &mut ValidationResult) {
        if !medicine.has_stock_for(quantity) {
            result.errors.push(format!(
                "{}: Insufficient stock. Available: {}, Requested: {}",
                medicine.name, medicine.stock_quantity, quantity
            ));
        }
        if medicine.is_expired(self.today) {
            result
                .errors
                .push(format!("{}: Medicine has expired", medicine.name));
        }
    }

    fn collect_warnings(&self, medicine: &Medicine, result: &mut ValidationResult) {
        if medicine.is_low_stock() {
            result
                .warnings
                .push(format!("{}: Low stock warning", medicine.name));
        }
        if let Some(days) = medicine.days_to_expiry(self.today)
            && (1..=EXPIRY_WARNING_DAYS).contains(&days)
        {
            result
                .warnings
                .push(format!("{}: Expires in {} days", medicine.name, days));
        }
    }
}
