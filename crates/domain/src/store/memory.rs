use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{CartId, CartLineId, MedicineId, OrderId, PrescriptionId, UserId};
use tokio::sync::RwLock;

use super::{CartStore, CatalogStore, OrderStore, PrescriptionStore, Result, StoreError};
use crate::cart::{Cart, CartLine, LineUpdate, LineUpsert};
use crate::catalog::Medicine;
use crate::order::{Order, OrderFilter, OrderStats, OrderStatus, OrderUpdate};
use crate::prescription::Prescription;

#[derive(Debug, Default)]
struct State {
    medicines: HashMap<MedicineId, Medicine>,
    prescriptions: HashMap<PrescriptionId, Prescription>,
    carts: HashMap<UserId, Cart>,
    lines: HashMap<CartId, Vec<CartLine>>,
    orders: HashMap<OrderId, Order>,
    order_numbers: HashMap<String, OrderId>,
}

impl State {
    fn decrement(&mut self, id: MedicineId, quantity: u32) -> Result<()> {
        let medicine = self
            .medicines
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Medicine", id))?;
        if medicine.stock_quantity < quantity {
            return Err(StoreError::InsufficientStock {
                medicine_id: id,
                available: medicine.stock_quantity,
                requested: quantity,
            });
        }
        medicine.stock_quantity -= quantity;
        Ok(())
    }

    fn restock(&mut self, id: MedicineId, quantity: u32) -> Result<()> {
        let medicine = self
            .medicines
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Medicine", id))?;
        medicine.stock_quantity = medicine.stock_quantity.saturating_add(quantity);
        Ok(())
    }
}

/// In-memory implementation of every store port.
///
/// All maps sit behind one lock, so each call is a single critical section
/// and multi-entity writes such as order creation are atomic.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_medicine(&self, medicine: Medicine) {
        self.state
            .write()
            .await
            .medicines
            .insert(medicine.id, medicine);
    }

    pub async fn insert_prescription(&self, prescription: Prescription) {
        self.state
            .write()
            .await
            .prescriptions
            .insert(prescription.id, prescription);
    }

    /// Current stock of a medicine, if it exists.
    pub async fn stock_of(&self, id: MedicineId) -> Option<u32> {
        self.state
            .read()
            .await
            .medicines
            .get(&id)
            .map(|medicine| medicine.stock_quantity)
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn get_medicine(&self, id: MedicineId) -> Result<Option<Medicine>> {
        Ok(self.state.read().await.medicines.get(&id).cloned())
    }

    async fn put_medicine(&self, medicine: Medicine) -> Result<()> {
        self.insert_medicine(medicine).await;
        Ok(())
    }

    async fn decrement_stock(&self, id: MedicineId, quantity: u32) -> Result<()> {
        self.state.write().await.decrement(id, quantity)
    }

    async fn restock(&self, id: MedicineId, quantity: u32) -> Result<()> {
        self.state.write().await.restock(id, quantity)
    }
}

#[async_trait]
impl PrescriptionStore for InMemoryStore {
    async fn get_prescription(&self, id: PrescriptionId) -> Result<Option<Prescription>> {
        Ok(self.state.read().await.prescriptions.get(&id).cloned())
    }

    async fn put_prescription(&self, prescription: Prescription) -> Result<()> {
        self.insert_prescription(prescription).await;
        Ok(())
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn get_or_create_cart(&self, user_id: UserId) -> Result<Cart> {
        let mut state = self.state.write().await;
        let cart = state
            .carts
            .entry(user_id)
            .or_insert_with(|| Cart::new(user_id, Utc::now()))
            .clone();
        Ok(cart)
    }

    async fn list_lines(&self, cart_id: CartId) -> Result<Vec<CartLine>> {
        Ok(self
            .state
            .read()
            .await
            .lines
            .get(&cart_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<Option<CartLine>> {
        Ok(self
            .state
            .read()
            .await
            .lines
            .get(&cart_id)
            .and_then(|lines| lines.iter().find(|line| line.id == line_id))
            .cloned())
    }

    async fn upsert_line(&self, cart_id: CartId, upsert: LineUpsert) -> Result<CartLine> {
        let mut state = self.state.write().await;
        let lines = state.lines.entry(cart_id).or_default();

        let existing = lines
            .iter_mut()
            .find(|line| line.medicine_id == upsert.medicine_id);
        let current = existing.as_ref().map_or(0, |line| line.quantity);
        let quantity = upsert.change.apply(current);
        if quantity > upsert.max_quantity {
            return Err(StoreError::QuantityLimit {
                limit: upsert.max_quantity,
                requested: quantity,
            });
        }

        let line = match existing {
            Some(line) => {
                line.quantity = quantity;
                if upsert.prescription_id.is_some() {
                    line.prescription_id = upsert.prescription_id;
                }
                if upsert.notes.is_some() {
                    line.notes = upsert.notes;
                }
                line.clone()
            }
            None => {
                let line = CartLine {
                    id: CartLineId::new(),
                    cart_id,
                    medicine_id: upsert.medicine_id,
                    quantity,
                    prescription_id: upsert.prescription_id,
                    notes: upsert.notes,
                    added_at: Utc::now(),
                };
                lines.push(line.clone());
                line
            }
        };

        if let Some(cart) = state.carts.values_mut().find(|cart| cart.id == cart_id) {
            cart.updated_at = Utc::now();
        }
        Ok(line)
    }

    async fn update_line(
        &self,
        cart_id: CartId,
        line_id: CartLineId,
        update: LineUpdate,
    ) -> Result<Option<CartLine>> {
        let mut state = self.state.write().await;
        let Some(line) = state
            .lines
            .get_mut(&cart_id)
            .and_then(|lines| lines.iter_mut().find(|line| line.id == line_id))
        else {
            return Ok(None);
        };
        line.quantity = update.quantity;
        if update.prescription_id.is_some() {
            line.prescription_id = update.prescription_id;
        }
        if update.notes.is_some() {
            line.notes = update.notes;
        }
        let line = line.clone();

        if let Some(cart) = state.carts.values_mut().find(|cart| cart.id == cart_id) {
            cart.updated_at = Utc::now();
        }
        Ok(Some(line))
    }

    async fn delete_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(lines) = state.lines.get_mut(&cart_id) else {
            return Ok(false);
        };
        let before = lines.len();
        lines.retain(|line| line.id != line_id);
        Ok(lines.len() != before)
    }

    async fn delete_lines(&self, cart_id: CartId, taken: &[CartLine]) -> Result<u64> {
        let mut state = self.state.write().await;
        let Some(lines) = state.lines.get_mut(&cart_id) else {
            return Ok(0);
        };
        let before = lines.len();
        lines.retain(|line| {
            !taken
                .iter()
                .any(|old| old.id == line.id && old.quantity == line.quantity)
        });
        Ok((before - lines.len()) as u64)
    }

    async fn clear(&self, cart_id: CartId) -> Result<()> {
        self.state.write().await.lines.remove(&cart_id);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.write().await;

        if state.order_numbers.contains_key(&order.order_number) {
            return Err(StoreError::Duplicate(format!(
                "order number {}",
                order.order_number
            )));
        }

        // Decrement line by line and undo on the first shortfall.
        for (done, line) in order.lines.iter().enumerate() {
            if let Err(err) = state.decrement(line.medicine_id, line.quantity) {
                for applied in &order.lines[..done] {
                    state.restock(applied.medicine_id, applied.quantity)?;
                }
                return Err(err);
            }
        }

        state
            .order_numbers
            .insert(order.order_number.clone(), order.id);
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn order_number_exists(&self, order_number: &str) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .order_numbers
            .contains_key(order_number))
    }

    async fn update_status_fields(
        &self,
        id: OrderId,
        expected: OrderStatus,
        update: &OrderUpdate,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get(&id)
            .ok_or_else(|| StoreError::not_found("Order", id))?;
        if order.status != expected {
            return Err(StoreError::StatusConflict {
                order_id: id,
                expected,
                actual: order.status,
            });
        }

        if update.restock {
            let lines = order.lines.clone();
            for line in &lines {
                state.restock(line.medicine_id, line.quantity)?;
            }
        }

        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Order", id))?;
        order.apply(update);
        Ok(order.clone())
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| filter.matches(order))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect())
    }

    async fn order_stats(&self) -> Result<OrderStats> {
        Ok(OrderStats::from_orders(self.state.read().await.orders.values()))
    }
}
