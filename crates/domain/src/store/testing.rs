//! A store wrapper that injects interleavings and failures into unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use common::{CartId, CartLineId, MedicineId, OrderId, PrescriptionId, UserId};

use super::{CartStore, CatalogStore, InMemoryStore, OrderStore, PrescriptionStore, Result, StoreError};
use crate::cart::{Cart, CartLine, LineUpdate, LineUpsert};
use crate::catalog::Medicine;
use crate::order::{Order, OrderFilter, OrderStats, OrderStatus, OrderUpdate};
use crate::prescription::Prescription;

#[derive(Debug, Default)]
struct Script {
    remove_line_after_read: bool,
    upsert_before_create_order: Option<(CartId, LineUpsert)>,
    fail_delete_lines: bool,
}

/// Delegates to an [`InMemoryStore`], running scripted actions at chosen points.
#[derive(Debug, Default)]
pub(crate) struct ScriptedStore {
    pub(crate) inner: InMemoryStore,
    script: Mutex<Script>,
}

impl ScriptedStore {
    /// The next `get_line` returns the line and then deletes it.
    pub(crate) fn remove_line_after_read(&self) {
        self.script().remove_line_after_read = true;
    }

    /// The next `create_order` first writes `upsert` into the cart.
    pub(crate) fn upsert_before_create_order(&self, cart_id: CartId, upsert: LineUpsert) {
        self.script().upsert_before_create_order = Some((cart_id, upsert));
    }

    /// Every `delete_lines` fails with a backend error.
    pub(crate) fn fail_delete_lines(&self) {
        self.script().fail_delete_lines = true;
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

#[async_trait]
impl CatalogStore for ScriptedStore {
    async fn get_medicine(&self, id: MedicineId) -> Result<Option<Medicine>> {
        self.inner.get_medicine(id).await
    }

    async fn put_medicine(&self, medicine: Medicine) -> Result<()> {
        self.inner.put_medicine(medicine).await
    }

    async fn decrement_stock(&self, id: MedicineId, quantity: u32) -> Result<()> {
        self.inner.decrement_stock(id, quantity).await
    }

    async fn restock(&self, id: MedicineId, quantity: u32) -> Result<()> {
        self.inner.restock(id, quantity).await
    }
}

#[async_trait]
impl PrescriptionStore for ScriptedStore {
    async fn get_prescription(&self, id: PrescriptionId) -> Result<Option<Prescription>> {
        self.inner.get_prescription(id).await
    }

    async fn put_prescription(&self, prescription: Prescription) -> Result<()> {
        self.inner.put_prescription(prescription).await
    }
}

#[async_trait]
impl CartStore for ScriptedStore {
    async fn get_or_create_cart(&self, user_id: UserId) -> Result<Cart> {
        self.inner.get_or_create_cart(user_id).await
    }

    async fn list_lines(&self, cart_id: CartId) -> Result<Vec<CartLine>> {
        self.inner.list_lines(cart_id).await
    }

    async fn get_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<Option<CartLine>> {
        let line = self.inner.get_line(cart_id, line_id).await?;
        let remove = std::mem::take(&mut self.script().remove_line_after_read);
        if remove {
            self.inner.delete_line(cart_id, line_id).await?;
        }
        Ok(line)
    }

    async fn upsert_line(&self, cart_id: CartId, upsert: LineUpsert) -> Result<CartLine> {
        self.inner.upsert_line(cart_id, upsert).await
    }

    async fn update_line(
        &self,
        cart_id: CartId,
        line_id: CartLineId,
        update: LineUpdate,
    ) -> Result<Option<CartLine>> {
        self.inner.update_line(cart_id, line_id, update).await
    }

    async fn delete_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<bool> {
        self.inner.delete_line(cart_id, line_id).await
    }

    async fn delete_lines(&self, cart_id: CartId, lines: &[CartLine]) -> Result<u64> {
        if self.script().fail_delete_lines {
            return Err(StoreError::backend(std::io::Error::other(
                "cart line removal failed",
            )));
        }
        self.inner.delete_lines(cart_id, lines).await
    }

    async fn clear(&self, cart_id: CartId) -> Result<()> {
        self.inner.clear(cart_id).await
    }
}

#[async_trait]
impl OrderStore for ScriptedStore {
    async fn create_order(&self, order: &Order) -> Result<()> {
        let pending = self.script().upsert_before_create_order.take();
        if let Some((cart_id, upsert)) = pending {
            self.inner.upsert_line(cart_id, upsert).await?;
        }
        self.inner.create_order(order).await
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        self.inner.get_order(id).await
    }

    async fn order_number_exists(&self, order_number: &str) -> Result<bool> {
        self.inner.order_number_exists(order_number).await
    }

    async fn update_status_fields(
        &self,
        id: OrderId,
        expected: OrderStatus,
        update: &OrderUpdate,
    ) -> Result<Order> {
        self.inner.update_status_fields(id, expected, update).await
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>> {
        self.inner.list_orders(filter).await
    }

    async fn order_stats(&self) -> Result<OrderStats> {
        self.inner.order_stats().await
    }
}
