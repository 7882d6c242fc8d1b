//! Cart service: the customer-facing cart API.

use std::sync::Arc;

use common::{CartLineId, MedicineId, PrescriptionId};
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::catalog::Medicine;
use crate::clock::{Clock, SystemClock};
use crate::error::DomainError;
use crate::pricing::{self, Totals};
use crate::prescription::{
    GateDecision, PrescriptionGate, PrescriptionIssueKind, PrescriptionLookup, evaluate,
};
use crate::store::{Store, StoreError};

use super::models::{
    CartLine, CartLineView, CartSummary, CartView, LineUpdate, LineUpsert, MAX_LINE_QUANTITY,
    MAX_NOTES_LEN, PrescriptionValidationStatus, QuantityChange, ValidationResult,
};
use super::validation::CartValidator;

/// Request to add a medicine to the caller's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddToCart {
    pub medicine_id: MedicineId,
    pub quantity: u32,
    #[serde(default)]
    pub prescription_id: Option<PrescriptionId>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Replacement values for an existing cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCartLine {
    pub quantity: u32,
    #[serde(default)]
    pub prescription_id: Option<PrescriptionId>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Service for managing carts.
///
/// Stateless over the store: every call re-reads what it needs, so many
/// services may share one store.
pub struct CartService<S: Store + ?Sized, C: Clock = SystemClock> {
    store: Arc<S>,
    clock: C,
}

impl<S: Store + ?Sized> CartService<S> {
    /// Creates a new cart service using the system clock.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: Store + ?Sized, C: Clock> CartService<S, C> {
    pub fn with_clock(store: Arc<S>, clock: C) -> Self {
        Self { store, clock }
    }

    /// Returns the caller's cart with resolved lines and totals.
    #[tracing::instrument(skip(self))]
    pub async fn get_cart(&self, caller: &Caller) -> Result<CartView, DomainError> {
        let cart = self.store.get_or_create_cart(caller.user_id).await?;
        let lines = self.store.list_lines(cart.id).await?;

        let mut views = Vec::with_capacity(lines.len());
        for line in lines {
            // Lines whose medicine left the catalog are shown by validation, not here.
            if let Some(medicine) = self.store.get_medicine(line.medicine_id).await? {
                views.push(self.line_view(line, medicine).await?);
            }
        }

        let totals = Self::totals_of(&views);
        Ok(CartView {
            id: cart.id,
            user_id: cart.user_id,
            total_items: views.iter().map(|view| view.quantity).sum(),
            lines: views,
            totals,
            created_at: cart.created_at,
            updated_at: cart.updated_at,
        })
    }

    /// Adds a medicine, or increases the quantity of its existing line.
    #[tracing::instrument(skip(self))]
    pub async fn add_to_cart(
        &self,
        caller: &Caller,
        request: AddToCart,
    ) -> Result<CartLineView, DomainError> {
        check_quantity(request.quantity)?;
        check_notes(request.notes.as_deref())?;

        let medicine = self.medicine(request.medicine_id).await?;
        if !medicine.has_stock_for(request.quantity) {
            return Err(DomainError::InsufficientStock {
                medicine: medicine.name,
                available: medicine.stock_quantity,
                requested: request.quantity,
            });
        }
        self.check_prescription(caller, &medicine, request.prescription_id)
            .await?;

        let cart = self.store.get_or_create_cart(caller.user_id).await?;
        let upsert = LineUpsert {
            medicine_id: medicine.id,
            change: QuantityChange::Add(request.quantity),
            prescription_id: request.prescription_id,
            notes: request.notes,
            max_quantity: MAX_LINE_QUANTITY.min(medicine.stock_quantity),
        };
        let line = self
            .store
            .upsert_line(cart.id, upsert)
            .await
            .map_err(|err| quantity_error(err, &medicine))?;

        tracing::info!(
            cart_id = %cart.id,
            medicine_id = %medicine.id,
            quantity = line.quantity,
            "Cart line added"
        );
        self.line_view(line, medicine).await
    }

    /// Replaces the quantity of a line, and its prescription or note when given.
    #[tracing::instrument(skip(self))]
    pub async fn update_cart_line(
        &self,
        caller: &Caller,
        line_id: CartLineId,
        request: UpdateCartLine,
    ) -> Result<CartLineView, DomainError> {
        check_quantity(request.quantity)?;
        check_notes(request.notes.as_deref())?;

        let cart = self.store.get_or_create_cart(caller.user_id).await?;
        let line = self
            .store
            .get_line(cart.id, line_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Cart item", line_id))?;
        let medicine = self.medicine(line.medicine_id).await?;

        if !medicine.has_stock_for(request.quantity) {
            return Err(DomainError::InsufficientStock {
                medicine: medicine.name,
                available: medicine.stock_quantity,
                requested: request.quantity,
            });
        }
        let prescription_id = request.prescription_id.or(line.prescription_id);
        self.check_prescription(caller, &medicine, prescription_id)
            .await?;

        let update = LineUpdate {
            quantity: request.quantity,
            prescription_id: request.prescription_id,
            notes: request.notes,
        };
        let line = self
            .store
            .update_line(cart.id, line_id, update)
            .await?
            .ok_or_else(|| DomainError::not_found("Cart item", line_id))?;
        self.line_view(line, medicine).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_cart_line(
        &self,
        caller: &Caller,
        line_id: CartLineId,
    ) -> Result<(), DomainError> {
        let cart = self.store.get_or_create_cart(caller.user_id).await?;
        if self.store.delete_line(cart.id, line_id).await? {
            Ok(())
        } else {
            Err(DomainError::not_found("Cart item", line_id))
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn clear_cart(&self, caller: &Caller) -> Result<(), DomainError> {
        let cart = self.store.get_or_create_cart(caller.user_id).await?;
        self.store.clear(cart.id).await?;
        Ok(())
    }

    /// Total units across all lines.
    pub async fn cart_item_count(&self, caller: &Caller) -> Result<u32, DomainError> {
        let cart = self.store.get_or_create_cart(caller.user_id).await?;
        let lines = self.store.list_lines(cart.id).await?;
        Ok(lines.iter().map(|line| line.quantity).sum())
    }

    /// Live totals and prescription state of the caller's cart.
    #[tracing::instrument(skip(self))]
    pub async fn get_cart_summary(&self, caller: &Caller) -> Result<CartSummary, DomainError> {
        let cart = self.store.get_or_create_cart(caller.user_id).await?;
        let lines = self.store.list_lines(cart.id).await?;
        let today = self.clock.today();

        let mut priced = Vec::with_capacity(lines.len());
        let mut has_prescription_items = false;
        let mut status = PrescriptionValidationStatus::Valid;
        for line in &lines {
            let Some(medicine) = self.store.get_medicine(line.medicine_id).await? else {
                continue;
            };
            priced.push((medicine.price, line.quantity));

            if !medicine.prescription_required {
                continue;
            }
            has_prescription_items = true;
            let line_status = match line.prescription_id {
                None => PrescriptionValidationStatus::Pending,
                Some(_) => {
                    let gate = PrescriptionGate::new(&*self.store);
                    let (decision, _) = gate.check(&medicine, line.prescription_id, today).await?;
                    if decision.is_purchasable() {
                        PrescriptionValidationStatus::Valid
                    } else {
                        PrescriptionValidationStatus::Invalid
                    }
                }
            };
            status = worse(status, line_status);
        }

        let totals = if priced.is_empty() {
            Totals::empty()
        } else {
            pricing::price(priced.iter().copied())
        };
        Ok(CartSummary {
            total_items: lines.iter().map(|line| line.quantity).sum(),
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            delivery_fee: totals.delivery_fee,
            total_amount: totals.total_amount,
            has_prescription_items,
            prescription_validation_status: status,
        })
    }

    /// Validates the caller's cart without changing it.
    #[tracing::instrument(skip(self))]
    pub async fn validate_cart(&self, caller: &Caller) -> Result<ValidationResult, DomainError> {
        let cart = self.store.get_or_create_cart(caller.user_id).await?;
        let lines = self.store.list_lines(cart.id).await?;
        let result = CartValidator::new(&*self.store, self.clock.today())
            .validate(&lines)
            .await?;
        Ok(result)
    }

    async fn medicine(&self, id: MedicineId) -> Result<Medicine, DomainError> {
        self.store
            .get_medicine(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Medicine", id))
    }

    /// Prescription checks applied when a line is written.
    async fn check_prescription(
        &self,
        caller: &Caller,
        medicine: &Medicine,
        prescription_id: Option<PrescriptionId>,
    ) -> Result<(), DomainError> {
        let Some(id) = prescription_id else {
            if medicine.prescription_required {
                return Err(DomainError::PrescriptionInvalid {
                    medicine: medicine.name.clone(),
                    issue: PrescriptionIssueKind::Missing,
                });
            }
            return Ok(());
        };

        let prescription = self
            .store
            .get_prescription(id)
            .await?
            .ok_or_else(|| DomainError::not_found("Prescription", id))?;
        if prescription.user_id != caller.user_id {
            return Err(DomainError::Forbidden(
                "prescription belongs to another user".to_string(),
            ));
        }

        if let GateDecision::Blocked(issue) = evaluate(
            medicine,
            PrescriptionLookup::Found(&prescription),
            self.clock.today(),
        ) {
            return Err(DomainError::PrescriptionInvalid {
                medicine: medicine.name.clone(),
                issue,
            });
        }
        Ok(())
    }

    async fn line_view(
        &self,
        line: CartLine,
        medicine: Medicine,
    ) -> Result<CartLineView, DomainError> {
        let is_prescription_valid = PrescriptionGate::new(&*self.store)
            .is_line_purchasable(&medicine, line.prescription_id, self.clock.today())
            .await?;
        Ok(CartLineView {
            id: line.id,
            unit_price: medicine.price,
            total_price: medicine.price.multiply(line.quantity),
            medicine,
            quantity: line.quantity,
            prescription_id: line.prescription_id,
            notes: line.notes,
            is_prescription_valid,
            added_at: line.added_at,
        })
    }

    fn totals_of(views: &[CartLineView]) -> Totals {
        if views.is_empty() {
            return Totals::empty();
        }
        pricing::price(views.iter().map(|view| (view.unit_price, view.quantity)))
    }
}

fn worse(
    a: PrescriptionValidationStatus,
    b: PrescriptionValidationStatus,
) -> PrescriptionValidationStatus {
    use PrescriptionValidationStatus::*;
    match (a, b) {
        (Invalid, _) | (_, Invalid) => Invalid,
        (Pending, _) | (_, Pending) => Pending,
        _ => Valid,
    }
}

pub(crate) fn check_quantity(quantity: u32) -> Result<(), DomainError> {
    if quantity == 0 || quantity > MAX_LINE_QUANTITY {
        return Err(DomainError::InvalidInput(format!(
            "quantity must be between 1 and {MAX_LINE_QUANTITY}"
        )));
    }
    Ok(())
}

fn check_notes(notes: Option<&str>) -> Result<(), DomainError> {
    if notes.is_some_and(|notes| notes.chars().count() > MAX_NOTES_LEN) {
        return Err(DomainError::InvalidInput(format!(
            "notes must be at most {MAX_NOTES_LEN} characters"
        )));
    }
    Ok(())
}

/// Maps an upsert limit violation to the more specific stock error when the
/// limit came from stock.
fn quantity_error(err: StoreError, medicine: &Medicine) -> DomainError {
    match err {
        StoreError::QuantityLimit { requested, .. } if requested > medicine.stock_quantity => {
            DomainError::InsufficientStock {
                medicine: medicine.name.clone(),
                available: medicine.stock_quantity,
                requested,
            }
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::prescription::{Prescription, PrescriptionStatus};
    use crate::store::InMemoryStore;
    use crate::store::testing::ScriptedStore;
    use crate::value_objects::Money;
    use chrono::NaiveDate;
    use common::UserId;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 10).unwrap()
    }

    fn service() -> (Arc<InMemoryStore>, CartService<InMemoryStore, FixedClock>) {
        let store = Arc::new(InMemoryStore::new());
        let service = CartService::with_clock(store.clone(), FixedClock::on(today()));
        (store, service)
    }

    fn add(medicine: &Medicine, quantity: u32) -> AddToCart {
        AddToCart {
            medicine_id: medicine.id,
            quantity,
            prescription_id: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_adding_twice_merges_lines() {
        let (store, service) = service();
        let caller = Caller::customer(UserId::new());
        let medicine = Medicine::new("Dolo 650", Money::from_rupees(30), 50);
        store.insert_medicine(medicine.clone()).await;

        service.add_to_cart(&caller, add(&medicine, 2)).await.unwrap();
        let line = service.add_to_cart(&caller, add(&medicine, 3)).await.unwrap();

        assert_eq!(line.quantity, 5);
        let cart = service.get_cart(&caller).await.unwrap();
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.total_items, 5);
        assert_eq!(cart.totals.subtotal, Money::from_rupees(150));
    }

    #[tokio::test]
    async fn test_combined_quantity_cannot_exceed_stock() {
        let (store, service) = service();
        let caller = Caller::customer(UserId::new());
        let medicine = Medicine::new("Dolo 650", Money::from_rupees(30), 4);
        store.insert_medicine(medicine.clone()).await;

        service.add_to_cart(&caller, add(&medicine, 3)).await.unwrap();
        let err = service.add_to_cart(&caller, add(&medicine, 2)).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientStock {
                available: 4,
                requested: 5,
                ..
            }
        ));
        assert_eq!(service.cart_item_count(&caller).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_quantity_bounds() {
        let (store, service) = service();
        let caller = Caller::customer(UserId::new());
        let medicine = Medicine::new("Dolo 650", Money::from_rupees(30), 500);
        store.insert_medicine(medicine.clone()).await;

        assert!(matches!(
            service.add_to_cart(&caller, add(&medicine, 0)).await,
            Err(DomainError::InvalidInput(_))
        ));
        assert!(matches!(
            service.add_to_cart(&caller, add(&medicine, 101)).await,
            Err(DomainError::InvalidInput(_))
        ));
        service.add_to_cart(&caller, add(&medicine, 100)).await.unwrap();
        assert!(matches!(
            service.add_to_cart(&caller, add(&medicine, 1)).await,
            Err(DomainError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_medicine_is_not_found() {
        let (_store, service) = service();
        let caller = Caller::customer(UserId::new());
        let medicine = Medicine::new("Ghost", Money::from_rupees(1), 1);
        assert!(matches!(
            service.add_to_cart(&caller, add(&medicine, 1)).await,
            Err(DomainError::NotFound { entity: "Medicine", .. })
        ));
    }

    #[tokio::test]
    async fn test_prescription_medicine_needs_a_verified_own_prescription() {
        let (store, service) = service();
        let owner = UserId::new();
        let caller = Caller::customer(owner);
        let medicine = Medicine::new("Augmentin", Money::from_rupees(200), 20)
            .with_prescription_required();
        store.insert_medicine(medicine.clone()).await;

        let err = service.add_to_cart(&caller, add(&medicine, 1)).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::PrescriptionInvalid {
                issue: PrescriptionIssueKind::Missing,
                ..
            }
        ));

        let pending = Prescription::new(owner, PrescriptionStatus::Pending);
        store.insert_prescription(pending.clone()).await;
        let mut request = add(&medicine, 1);
        request.prescription_id = Some(pending.id);
        let err = service.add_to_cart(&caller, request).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::PrescriptionInvalid {
                issue: PrescriptionIssueKind::NotVerified(PrescriptionStatus::Pending),
                ..
            }
        ));

        let foreign = Prescription::verified(UserId::new());
        store.insert_prescription(foreign.clone()).await;
        let mut request = add(&medicine, 1);
        request.prescription_id = Some(foreign.id);
        assert!(matches!(
            service.add_to_cart(&caller, request).await,
            Err(DomainError::Forbidden(_))
        ));

        let mut request = add(&medicine, 1);
        request.prescription_id = Some(PrescriptionId::new());
        assert!(matches!(
            service.add_to_cart(&caller, request).await,
            Err(DomainError::NotFound { entity: "Prescription", .. })
        ));

        let verified = Prescription::verified(owner);
        store.insert_prescription(verified.clone()).await;
        let mut request = add(&medicine, 1);
        request.prescription_id = Some(verified.id);
        let line = service.add_to_cart(&caller, request).await.unwrap();
        assert!(line.is_prescription_valid);
    }

    #[tokio::test]
    async fn test_update_and_remove_line() {
        let (store, service) = service();
        let caller = Caller::customer(UserId::new());
        let medicine = Medicine::new("Dolo 650", Money::from_rupees(30), 10);
        store.insert_medicine(medicine.clone()).await;
        let line = service.add_to_cart(&caller, add(&medicine, 2)).await.unwrap();

        let update = UpdateCartLine {
            quantity: 7,
            prescription_id: None,
            notes: Some("after meals".to_string()),
        };
        let updated = service
            .update_cart_line(&caller, line.id, update)
            .await
            .unwrap();
        assert_eq!(updated.quantity, 7);
        assert_eq!(updated.notes.as_deref(), Some("after meals"));

        let too_many = UpdateCartLine {
            quantity: 11,
            prescription_id: None,
            notes: None,
        };
        assert!(matches!(
            service.update_cart_line(&caller, line.id, too_many).await,
            Err(DomainError::InsufficientStock { .. })
        ));

        service.remove_cart_line(&caller, line.id).await.unwrap();
        assert!(matches!(
            service.remove_cart_line(&caller, line.id).await,
            Err(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_of_concurrently_removed_line_is_not_found() {
        let store = Arc::new(ScriptedStore::default());
        let service = CartService::with_clock(store.clone(), FixedClock::on(today()));
        let caller = Caller::customer(UserId::new());
        let medicine = Medicine::new("Dolo 650", Money::from_rupees(30), 10);
        store.inner.insert_medicine(medicine.clone()).await;
        let line = service.add_to_cart(&caller, add(&medicine, 2)).await.unwrap();

        store.remove_line_after_read();
        let update = UpdateCartLine {
            quantity: 4,
            prescription_id: None,
            notes: None,
        };
        assert!(matches!(
            service.update_cart_line(&caller, line.id, update).await,
            Err(DomainError::NotFound { entity: "Cart item", .. })
        ));
        assert_eq!(service.cart_item_count(&caller).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_other_users_lines_are_invisible() {
        let (store, service) = service();
        let alice = Caller::customer(UserId::new());
        let bob = Caller::customer(UserId::new());
        let medicine = Medicine::new("Dolo 650", Money::from_rupees(30), 10);
        store.insert_medicine(medicine.clone()).await;
        let line = service.add_to_cart(&alice, add(&medicine, 1)).await.unwrap();

        assert!(matches!(
            service.remove_cart_line(&bob, line.id).await,
            Err(DomainError::NotFound { .. })
        ));
        assert_eq!(service.cart_item_count(&alice).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_summary_of_empty_cart_is_zero() {
        let (_store, service) = service();
        let summary = service
            .get_cart_summary(&Caller::customer(UserId::new()))
            .await
            .unwrap();
        assert_eq!(summary.total_items, 0);
        assert_eq!(summary.total_amount, Money::ZERO);
        assert_eq!(summary.delivery_fee, Money::ZERO);
        assert!(!summary.has_prescription_items);
        assert_eq!(
            summary.prescription_validation_status,
            PrescriptionValidationStatus::Valid
        );
    }

    #[tokio::test]
    async fn test_summary_reports_invalid_prescription() {
        let (store, service) = service();
        let owner = UserId::new();
        let caller = Caller::customer(owner);
        let medicine = Medicine::new("Augmentin", Money::from_rupees(200), 20)
            .with_prescription_required();
        store.insert_medicine(medicine.clone()).await;
        let prescription = Prescription::verified(owner).with_valid_until(today());
        store.insert_prescription(prescription.clone()).await;

        let mut request = add(&medicine, 2);
        request.prescription_id = Some(prescription.id);
        service.add_to_cart(&caller, request).await.unwrap();

        let summary = service.get_cart_summary(&caller).await.unwrap();
        assert!(summary.has_prescription_items);
        assert_eq!(
            summary.prescription_validation_status,
            PrescriptionValidationStatus::Valid
        );
        assert_eq!(summary.subtotal, Money::from_rupees(400));
        assert_eq!(summary.total_amount, Money::from_rupees(522));

        // The prescription runs out after the line was added.
        let later = CartService::with_clock(
            store.clone(),
            FixedClock::on(today().succ_opt().unwrap()),
        );
        let summary = later.get_cart_summary(&caller).await.unwrap();
        assert_eq!(
            summary.prescription_validation_status,
            PrescriptionValidationStatus::Invalid
        );
        let result = later.validate_cart(&caller).await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["Augmentin: Prescription expired".to_string()]);
    }
}
