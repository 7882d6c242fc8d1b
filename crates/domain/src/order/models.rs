use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use common::{DeliveryPartnerId, MedicineId, OrderId, PrescriptionId, UserId};
use serde::{Deserialize, Serialize};

use crate::pricing::Totals;
use crate::value_objects::{DeliveryAddress, Money, PaymentMethod};

use super::state::{OrderStatus, PaymentStatus};

/// A purchased medicine, frozen at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub medicine_id: MedicineId,
    pub medicine_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
    pub prescription_id: Option<PrescriptionId>,
}

impl OrderLine {
    pub fn new(
        medicine_id: MedicineId,
        medicine_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
        prescription_id: Option<PrescriptionId>,
    ) -> Self {
        Self {
            medicine_id,
            medicine_name: medicine_name.into(),
            quantity,
            unit_price,
            total_price: unit_price.multiply(quantity),
            prescription_id,
        }
    }
}

/// One entry of an order's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
    pub changed_by: Option<UserId>,
}

/// An order. Lines and totals never change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub lines: Vec<OrderLine>,
    pub subtotal: Money,
    pub tax_amount: Money,
    pub delivery_fee: Money,
    pub total_amount: Money,
    pub delivery_address: DeliveryAddress,
    pub delivery_instructions: Option<String>,
    pub delivery_partner_id: Option<DeliveryPartnerId>,
    pub tracking_number: Option<String>,
    pub estimated_delivery_minutes: Option<u32>,
    pub actual_delivery_date: Option<NaiveDate>,
    pub cancellation_reason: Option<String>,
    pub status_history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn totals(&self) -> Totals {
        Totals {
            subtotal: self.subtotal,
            tax_amount: self.tax_amount,
            delivery_fee: self.delivery_fee,
            total_amount: self.total_amount,
        }
    }

    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    /// Applies a committed update to this in-memory copy.
    pub fn apply(&mut self, update: &OrderUpdate) {
        self.status = update.status;
        self.payment_status = update.payment_status;
        if let Some(minutes) = update.estimated_delivery_minutes {
            self.estimated_delivery_minutes = Some(minutes);
        }
        if let Some(date) = update.actual_delivery_date {
            self.actual_delivery_date = Some(date);
        }
        if let Some(partner) = update.delivery_partner_id {
            self.delivery_partner_id = Some(partner);
        }
        if let Some(tracking) = &update.tracking_number {
            self.tracking_number = Some(tracking.clone());
        }
        if let Some(reason) = &update.cancellation_reason {
            self.cancellation_reason = Some(reason.clone());
        }
        if let Some(entry) = &update.history_entry {
            self.status_history.push(entry.clone());
        }
        self.updated_at = update.updated_at;
    }
}

/// Mutable fields written by a compare-and-set on the order status.
///
/// `None` fields keep their stored value. When `restock` is set the store
/// returns every line's quantity to stock in the same atomic unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub estimated_delivery_minutes: Option<u32>,
    pub actual_delivery_date: Option<NaiveDate>,
    pub delivery_partner_id: Option<DeliveryPartnerId>,
    pub tracking_number: Option<String>,
    pub cancellation_reason: Option<String>,
    pub history_entry: Option<StatusChange>,
    pub restock: bool,
    pub updated_at: DateTime<Utc>,
}

impl OrderUpdate {
    /// An update that keeps the order's status and payment status.
    pub fn unchanged(order: &Order, now: DateTime<Utc>) -> Self {
        Self {
            status: order.status,
            payment_status: order.payment_status,
            estimated_delivery_minutes: None,
            actual_delivery_date: None,
            delivery_partner_id: None,
            tracking_number: None,
            cancellation_reason: None,
            history_entry: None,
            restock: false,
            updated_at: now,
        }
    }
}

/// Requested quantity of one medicine in a direct order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub medicine_id: MedicineId,
    pub quantity: u32,
    #[serde(default)]
    pub prescription_id: Option<PrescriptionId>,
}

/// Checkout details shared by both order creation paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub delivery_address: DeliveryAddress,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub delivery_instructions: Option<String>,
}

/// A status change requested by pharmacy staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub estimated_delivery_minutes: Option<u32>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub reason: String,
    #[serde(default)]
    pub refund_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAssignment {
    pub delivery_partner_id: DeliveryPartnerId,
    pub estimated_delivery_minutes: u32,
    #[serde(default)]
    pub tracking_number: Option<String>,
}

/// Filter for order listings. Results are newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderFilter {
    pub user_id: Option<UserId>,
    pub status: Option<OrderStatus>,
    pub limit: u32,
    pub offset: u32,
}

impl OrderFilter {
    pub const MAX_LIMIT: u32 = 100;

    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            status: None,
            limit: 50,
            offset: 0,
        }
    }

    pub fn all() -> Self {
        Self {
            user_id: None,
            status: None,
            limit: Self::MAX_LIMIT,
            offset: 0,
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.is_none_or(|user| order.user_id == user)
            && self.status.is_none_or(|status| order.status == status)
    }
}

/// Delivery-facing view of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTracking {
    pub order_id: OrderId,
    pub order_number: String,
    pub status: OrderStatus,
    pub tracking_number: Option<String>,
    pub delivery_partner_id: Option<DeliveryPartnerId>,
    pub estimated_delivery_minutes: Option<u32>,
    pub status_history: Vec<StatusChange>,
    pub delivery_address: DeliveryAddress,
}

impl From<Order> for OrderTracking {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number,
            status: order.status,
            tracking_number: order.tracking_number,
            delivery_partner_id: order.delivery_partner_id,
            estimated_delivery_minutes: order.estimated_delivery_minutes,
            status_history: order.status_history,
            delivery_address: order.delivery_address,
        }
    }
}

/// Order counts and revenue across all users.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderStats {
    pub total_orders: u64,
    pub by_status: BTreeMap<OrderStatus, u64>,
    /// Sum of totals for orders that were neither cancelled nor returned.
    pub total_revenue: Money,
    pub average_order_value: Money,
}

impl OrderStats {
    pub fn from_orders<'a, I>(orders: I) -> Self
    where
        I: IntoIterator<Item = &'a Order>,
    {
        let mut stats = OrderStats::default();
        let mut revenue_orders = 0u64;
        for order in orders {
            stats.total_orders += 1;
            *stats.by_status.entry(order.status).or_insert(0) += 1;
            if !matches!(order.status, OrderStatus::Cancelled | OrderStatus::Returned) {
                stats.total_revenue += order.total_amount;
                revenue_orders += 1;
            }
        }
        stats.average_order_value = stats.total_revenue.average_over(revenue_orders);
        stats
    }
}
