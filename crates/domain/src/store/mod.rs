//! Persistence ports consumed by the cart and order services.
//!
//! Each trait is a narrow view of one collaborator. Implementations must be
//! thread-safe and make every method a single atomic unit.

mod memory;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use common::{CartId, CartLineId, MedicineId, OrderId, PrescriptionId, UserId};
use thiserror::Error;

use crate::cart::{Cart, CartLine, LineUpdate, LineUpsert};
use crate::catalog::Medicine;
use crate::order::{Order, OrderFilter, OrderStats, OrderStatus, OrderUpdate};
use crate::prescription::Prescription;

pub use memory::InMemoryStore;

/// Errors reported by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A conditional stock decrement found too few units.
    #[error("Insufficient stock for medicine {medicine_id}: available {available}, requested {requested}")]
    InsufficientStock {
        medicine_id: MedicineId,
        available: u32,
        requested: u32,
    },

    /// The order's status changed between read and write.
    #[error("Status conflict for order {order_id}: expected {expected}, found {actual}")]
    StatusConflict {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    /// A uniqueness constraint was violated.
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// An upsert would push a line above its limit.
    #[error("Quantity {requested} exceeds limit {limit}")]
    QuantityLimit { limit: u32, requested: u32 },

    /// The backend itself failed (connection, serialization, ...).
    #[error("Backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Read access to medicines plus stock adjustments.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_medicine(&self, id: MedicineId) -> Result<Option<Medicine>>;

    /// Inserts or replaces a catalog entry.
    async fn put_medicine(&self, medicine: Medicine) -> Result<()>;

    /// Removes `quantity` units if at least that many are in stock.
    ///
    /// Fails with `InsufficientStock` and leaves stock unchanged otherwise.
    async fn decrement_stock(&self, id: MedicineId, quantity: u32) -> Result<()>;

    /// Returns `quantity` units to stock.
    async fn restock(&self, id: MedicineId, quantity: u32) -> Result<()>;
}

#[async_trait]
pub trait PrescriptionStore: Send + Sync {
    async fn get_prescription(&self, id: PrescriptionId) -> Result<Option<Prescription>>;

    async fn put_prescription(&self, prescription: Prescription) -> Result<()>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the user's cart, creating an empty one on first access.
    async fn get_or_create_cart(&self, user_id: UserId) -> Result<Cart>;

    /// Lines in the order they were first added.
    async fn list_lines(&self, cart_id: CartId) -> Result<Vec<CartLine>>;

    async fn get_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<Option<CartLine>>;

    /// Inserts the line for `upsert.medicine_id` or updates the existing one
    /// in a single read-modify-write.
    ///
    /// Fails with `QuantityLimit` when the resulting quantity exceeds
    /// `upsert.max_quantity`, leaving the line unchanged.
    async fn upsert_line(&self, cart_id: CartId, upsert: LineUpsert) -> Result<CartLine>;

    /// Updates the line with `line_id` in place.
    ///
    /// Returns `None` if the line no longer exists; it is never recreated.
    async fn update_line(
        &self,
        cart_id: CartId,
        line_id: CartLineId,
        update: LineUpdate,
    ) -> Result<Option<CartLine>>;

    /// Returns false if no such line exists in the cart.
    async fn delete_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<bool>;

    /// Deletes each given line that still has the same id and quantity.
    ///
    /// Lines added or changed since the snapshot stay. Returns the number deleted.
    async fn delete_lines(&self, cart_id: CartId, lines: &[CartLine]) -> Result<u64>;

    async fn clear(&self, cart_id: CartId) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists the order and decrements stock for every line, all or nothing.
    ///
    /// Fails with `Duplicate` if the order number is taken and with
    /// `InsufficientStock` if any line cannot be covered.
    async fn create_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn order_number_exists(&self, order_number: &str) -> Result<bool>;

    /// Writes `update` only if the order is still in `expected` status.
    ///
    /// Fails with `StatusConflict` otherwise. Returns the updated order.
    async fn update_status_fields(
        &self,
        id: OrderId,
        expected: OrderStatus,
        update: &OrderUpdate,
    ) -> Result<Order>;

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>>;

    async fn order_stats(&self) -> Result<OrderStats>;
}

/// Every port at once, for services that span carts, catalog and orders.
pub trait Store: CatalogStore + PrescriptionStore + CartStore + OrderStore {}

impl<T: CatalogStore + PrescriptionStore + CartStore + OrderStore> Store for T {}
