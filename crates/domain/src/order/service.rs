//! Order service: creation from carts or item lists, and the status lifecycle.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use common::{MedicineId, OrderId, PrescriptionId};

use crate::auth::{Caller, Capability};
use crate::cart::{self, CartValidator};
use crate::clock::{Clock, SystemClock};
use crate::error::DomainError;
use crate::pricing;
use crate::prescription::{GateDecision, PrescriptionGate};
use crate::store::{Store, StoreError};

use super::lifecycle::{self, estimated_delivery_minutes};
use super::models::{
    CancellationRequest, Checkout, DeliveryAssignment, Order, OrderFilter, OrderItemRequest,
    OrderLine, OrderStats, OrderTracking, OrderUpdate, StatusChange, StatusUpdateRequest,
};
use super::number::{self, MAX_NUMBER_ATTEMPTS};
use super::state::{OrderStatus, PaymentStatus};

/// Compare-and-set attempts for a status update before reporting a conflict.
const MAX_UPDATE_ATTEMPTS: usize = 3;

const MAX_INSTRUCTIONS_LEN: usize = 500;

/// Service for creating orders and moving them through their lifecycle.
///
/// Order creation checks every line, prices the order, then hands one
/// atomic write (order plus stock decrements) to the store. Status changes
/// are planned against a fresh read and written with a compare-and-set on
/// the status that was read.
pub struct OrderService<S: Store + ?Sized, C: Clock = SystemClock> {
    store: Arc<S>,
    clock: C,
}

impl<S: Store + ?Sized> OrderService<S> {
    /// Creates a new order service using the system clock.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: Store + ?Sized, C: Clock> OrderService<S, C> {
    pub fn with_clock(store: Arc<S>, clock: C) -> Self {
        Self { store, clock }
    }

    /// Creates an order directly from a list of items.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(
        &self,
        caller: &Caller,
        items: Vec<OrderItemRequest>,
        checkout: Checkout,
    ) -> Result<Order, DomainError> {
        let result = self.create_direct(caller, items, checkout).await;
        record_creation(&result);
        result
    }

    /// Converts the caller's cart into an order and removes the ordered lines.
    ///
    /// With `validate_prescriptions` the full cart report is produced first
    /// and any error aborts with `CartValidationFailed`. Either way each
    /// line is re-checked (stock, expiry, prescription) before committing.
    #[tracing::instrument(skip(self))]
    pub async fn create_order_from_cart(
        &self,
        caller: &Caller,
        checkout: Checkout,
        validate_prescriptions: bool,
    ) -> Result<Order, DomainError> {
        let result = self
            .create_from_cart(caller, checkout, validate_prescriptions)
            .await;
        record_creation(&result);
        result
    }

    /// Moves an order along the status graph. Requires `ManageOrders`.
    #[tracing::instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        caller: &Caller,
        order_id: OrderId,
        request: StatusUpdateRequest,
    ) -> Result<Order, DomainError> {
        caller.require(Capability::ManageOrders)?;
        let now = self.clock.now();
        let (_, order) = self
            .apply(order_id, |order| {
                lifecycle::plan_transition(order, &request, caller.user_id, now)
            })
            .await?;

        metrics::counter!("order_status_transitions_total", "to" => order.status.as_str())
            .increment(1);
        if order.status == OrderStatus::Cancelled {
            metrics::counter!("orders_cancelled_total").increment(1);
        }
        tracing::info!(
            order_id = %order.id,
            status = %order.status,
            payment_status = %order.payment_status,
            "Order status updated"
        );
        Ok(order)
    }

    /// Cancels an order. Allowed for its owner and for `ManageOrders`.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        caller: &Caller,
        order_id: OrderId,
        request: CancellationRequest,
    ) -> Result<Order, DomainError> {
        let now = self.clock.now();
        let (_, order) = self
            .apply(order_id, |order| {
                caller.require_owner_or(order.user_id, Capability::ManageOrders)?;
                lifecycle::plan_cancellation(order, &request, caller.user_id, now)
            })
            .await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        metrics::counter!("order_status_transitions_total", "to" => OrderStatus::Cancelled.as_str())
            .increment(1);
        tracing::info!(
            order_id = %order.id,
            payment_status = %order.payment_status,
            "Order cancelled"
        );
        Ok(order)
    }

    /// Assigns a delivery partner. Requires `ManageDelivery`.
    #[tracing::instrument(skip(self))]
    pub async fn assign_delivery(
        &self,
        caller: &Caller,
        order_id: OrderId,
        assignment: DeliveryAssignment,
    ) -> Result<Order, DomainError> {
        caller.require(Capability::ManageDelivery)?;
        let now = self.clock.now();
        let (before, order) = self
            .apply(order_id, |order| {
                lifecycle::plan_delivery_assignment(order, &assignment, caller.user_id, now)
            })
            .await?;

        if order.status != before {
            metrics::counter!("order_status_transitions_total", "to" => order.status.as_str())
                .increment(1);
        }
        tracing::info!(
            order_id = %order.id,
            delivery_partner_id = %assignment.delivery_partner_id,
            status = %order.status,
            "Delivery assigned"
        );
        Ok(order)
    }

    /// Returns an order visible to the caller.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order, DomainError> {
        let order = self.fetch(order_id).await?;
        caller.require_owner_or(order.user_id, Capability::ViewAllOrders)?;
        Ok(order)
    }

    /// Lists orders newest first.
    ///
    /// Customers see their own orders; `ViewAllOrders` sees everyone's.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(
        &self,
        caller: &Caller,
        status: Option<OrderStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Order>, DomainError> {
        if limit == 0 || limit > OrderFilter::MAX_LIMIT {
            return Err(DomainError::InvalidInput(format!(
                "limit must be between 1 and {}",
                OrderFilter::MAX_LIMIT
            )));
        }
        let filter = OrderFilter {
            user_id: (!caller.can(Capability::ViewAllOrders)).then_some(caller.user_id),
            status,
            limit,
            offset,
        };
        Ok(self.store.list_orders(filter).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_order_tracking(
        &self,
        caller: &Caller,
        order_id: OrderId,
    ) -> Result<OrderTracking, DomainError> {
        let order = self.get_order(caller, order_id).await?;
        Ok(order.into())
    }

    /// Order counts and revenue. Requires `ViewStats`.
    #[tracing::instrument(skip(self))]
    pub async fn order_stats(&self, caller: &Caller) -> Result<OrderStats, DomainError> {
        caller.require(Capability::ViewStats)?;
        Ok(self.store.order_stats().await?)
    }

    async fn create_direct(
        &self,
        caller: &Caller,
        items: Vec<OrderItemRequest>,
        checkout: Checkout,
    ) -> Result<Order, DomainError> {
        if items.is_empty() {
            return Err(DomainError::InvalidInput(
                "Order must contain at least one item".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.medicine_id) {
                return Err(DomainError::InvalidInput(format!(
                    "Medicine {} appears more than once",
                    item.medicine_id
                )));
            }
            cart::check_quantity(item.quantity)?;
        }
        check_checkout(&checkout)?;

        let today = self.clock.today();
        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            lines.push(
                self.resolve_line(caller, item.medicine_id, item.quantity, item.prescription_id, today)
                    .await?,
            );
        }
        self.commit(caller, lines, checkout, today).await
    }

    async fn create_from_cart(
        &self,
        caller: &Caller,
        checkout: Checkout,
        validate_prescriptions: bool,
    ) -> Result<Order, DomainError> {
        check_checkout(&checkout)?;

        let cart = self.store.get_or_create_cart(caller.user_id).await?;
        let cart_lines = self.store.list_lines(cart.id).await?;
        if cart_lines.is_empty() {
            return Err(DomainError::InvalidInput("Cart is empty".to_string()));
        }

        let today = self.clock.today();
        if validate_prescriptions {
            let result = CartValidator::new(&*self.store, today)
                .validate(&cart_lines)
                .await?;
            if !result.is_valid {
                return Err(DomainError::CartValidationFailed {
                    errors: result.errors,
                    prescription_issues: result.prescription_issues,
                });
            }
        }

        let mut lines = Vec::with_capacity(cart_lines.len());
        for line in &cart_lines {
            lines.push(
                self.resolve_line(caller, line.medicine_id, line.quantity, line.prescription_id, today)
                    .await?,
            );
        }
        let order = self.commit(caller, lines, checkout, today).await?;

        // Only the ordered lines go; anything added meanwhile stays in the cart.
        // The order stands even if they cannot be removed.
        if let Err(err) = self.store.delete_lines(cart.id, &cart_lines).await {
            tracing::warn!(
                cart_id = %cart.id,
                error = %err,
                "Failed to remove ordered lines from cart"
            );
        }
        Ok(order)
    }

    /// Checks one requested line and freezes its price.
    async fn resolve_line(
        &self,
        caller: &Caller,
        medicine_id: MedicineId,
        quantity: u32,
        prescription_id: Option<PrescriptionId>,
        today: NaiveDate,
    ) -> Result<OrderLine, DomainError> {
        let medicine = self
            .store
            .get_medicine(medicine_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Medicine", medicine_id))?;

        if !medicine.has_stock_for(quantity) {
            return Err(DomainError::InsufficientStock {
                medicine: medicine.name,
                available: medicine.stock_quantity,
                requested: quantity,
            });
        }
        if medicine.is_expired(today) {
            return Err(DomainError::InvalidInput(format!(
                "{} has expired",
                medicine.name
            )));
        }

        let (decision, prescription) = PrescriptionGate::new(&*self.store)
            .check(&medicine, prescription_id, today)
            .await?;
        if let Some(prescription) = &prescription
            && prescription.user_id != caller.user_id
        {
            return Err(DomainError::Forbidden(
                "prescription belongs to another user".to_string(),
            ));
        }
        if let GateDecision::Blocked(issue) = decision {
            return Err(DomainError::PrescriptionInvalid {
                medicine: medicine.name,
                issue,
            });
        }

        Ok(OrderLine::new(
            medicine.id,
            medicine.name,
            quantity,
            medicine.price,
            prescription_id,
        ))
    }

    /// Prices the lines and persists the order with a fresh order number.
    async fn commit(
        &self,
        caller: &Caller,
        lines: Vec<OrderLine>,
        checkout: Checkout,
        today: NaiveDate,
    ) -> Result<Order, DomainError> {
        let totals = pricing::price(lines.iter().map(|line| (line.unit_price, line.quantity)));
        let now = self.clock.now();
        let mut order = Order {
            id: OrderId::new(),
            user_id: caller.user_id,
            order_number: String::new(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: checkout.payment_method,
            estimated_delivery_minutes: Some(estimated_delivery_minutes(&lines)),
            lines,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            delivery_fee: totals.delivery_fee,
            total_amount: totals.total_amount,
            delivery_address: checkout.delivery_address,
            delivery_instructions: checkout.delivery_instructions,
            delivery_partner_id: None,
            tracking_number: None,
            actual_delivery_date: None,
            cancellation_reason: None,
            status_history: vec![StatusChange {
                status: OrderStatus::Pending,
                at: now,
                note: Some("Order placed".to_string()),
                changed_by: Some(caller.user_id),
            }],
            created_at: now,
            updated_at: now,
        };

        for _ in 0..MAX_NUMBER_ATTEMPTS {
            let candidate = number::generate(today);
            if self.store.order_number_exists(&candidate).await? {
                continue;
            }
            order.order_number = candidate;

            match self.store.create_order(&order).await {
                Ok(()) => {
                    tracing::info!(
                        order_id = %order.id,
                        order_number = %order.order_number,
                        total = %order.total_amount,
                        lines = order.lines.len(),
                        "Order created"
                    );
                    return Ok(order);
                }
                Err(StoreError::Duplicate(_)) => continue,
                Err(StoreError::InsufficientStock {
                    medicine_id,
                    available,
                    requested,
                }) => {
                    tracing::warn!(%medicine_id, available, requested, "Stock ran out during order commit");
                    let medicine = order
                        .lines
                        .iter()
                        .find(|line| line.medicine_id == medicine_id)
                        .map_or_else(|| medicine_id.to_string(), |line| line.medicine_name.clone());
                    return Err(DomainError::InsufficientStock {
                        medicine,
                        available,
                        requested,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(DomainError::Conflict(
            "could not allocate a unique order number".to_string(),
        ))
    }

    async fn fetch(&self, order_id: OrderId) -> Result<Order, DomainError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Order", order_id))
    }

    /// Reads the order, plans an update and writes it if the status is unchanged.
    ///
    /// A lost race re-reads and re-plans, so the rules always see current state.
    /// Returns the status the winning write started from with the updated order.
    async fn apply<F>(&self, order_id: OrderId, plan: F) -> Result<(OrderStatus, Order), DomainError>
    where
        F: Fn(&Order) -> Result<OrderUpdate, DomainError>,
    {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let order = self.fetch(order_id).await?;
            let update = plan(&order)?;
            match self
                .store
                .update_status_fields(order_id, order.status, &update)
                .await
            {
                Ok(updated) => return Ok((order.status, updated)),
                Err(StoreError::StatusConflict { actual, .. }) => {
                    tracing::warn!(%order_id, %actual, "Order changed concurrently, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(DomainError::Conflict(format!(
            "order {order_id} is being modified concurrently"
        )))
    }
}

fn check_checkout(checkout: &Checkout) -> Result<(), DomainError> {
    checkout.delivery_address.validate()?;
    if checkout
        .delivery_instructions
        .as_deref()
        .is_some_and(|text| text.chars().count() > MAX_INSTRUCTIONS_LEN)
    {
        return Err(DomainError::InvalidInput(format!(
            "delivery instructions must be at most {MAX_INSTRUCTIONS_LEN} characters"
        )));
    }
    Ok(())
}

fn record_creation(result: &Result<Order, DomainError>) {
    match result {
        Ok(order) => {
            metrics::counter!("orders_created_total").increment(1);
            metrics::histogram!("order_total_amount").record(order.total_amount.as_f64());
        }
        Err(err) => {
            metrics::counter!("order_creation_failures_total", "reason" => err.kind())
                .increment(1);
        }
    }
}
