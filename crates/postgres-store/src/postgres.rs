use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use common::{CartId, CartLineId, MedicineId, OrderId, PrescriptionId, UserId};
use domain::cart::{LineUpdate, LineUpsert, QuantityChange};
use domain::order::{OrderFilter, OrderUpdate};
use domain::store::Result;
use domain::{
    Cart, CartLine, CartStore, CatalogStore, Medicine, Money, Order, OrderStats, OrderStatus,
    OrderStore, Prescription, PrescriptionStore, StoreError,
};
use sqlx::{PgConnection, PgPool, postgres::PgRow};
use uuid::Uuid;

use crate::error::{DecodeError, db, decode, is_constraint, to_i32, to_u32};
use crate::rows::{
    self, CART_ITEM_COLUMNS, HISTORY_COLUMNS, MEDICINE_COLUMNS, ORDER_COLUMNS, ORDER_ITEM_COLUMNS,
};

/// PostgreSQL-backed implementation of every store port.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Loads full orders (lines and history attached) for the given rows.
    async fn attach_details(conn: &mut PgConnection, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let mut orders = rows.iter().map(rows::order).collect::<Result<Vec<_>>>()?;
        if orders.is_empty() {
            return Ok(orders);
        }
        let ids: Vec<Uuid> = orders.iter().map(|order| order.id.as_uuid()).collect();

        let item_rows = sqlx::query(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) \
             ORDER BY order_id, line_no"
        ))
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?;

        let history_rows = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM order_status_history WHERE order_id = ANY($1) \
             ORDER BY order_id, id"
        ))
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?;

        let index: HashMap<OrderId, usize> = orders
            .iter()
            .enumerate()
            .map(|(position, order)| (order.id, position))
            .collect();
        for row in &item_rows {
            let (order_id, line) = rows::order_line(row)?;
            if let Some(&position) = index.get(&order_id) {
                orders[position].lines.push(line);
            }
        }
        for row in &history_rows {
            let (order_id, change) = rows::status_change(row)?;
            if let Some(&position) = index.get(&order_id) {
                orders[position].status_history.push(change);
            }
        }
        Ok(orders)
    }

    async fn load_order(conn: &mut PgConnection, id: OrderId) -> Result<Option<Order>> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_all(&mut *conn)
            .await
            .map_err(db)?;
        Ok(Self::attach_details(conn, rows).await?.into_iter().next())
    }

    /// Conditionally removes stock; reports the shortfall when it cannot.
    async fn take_stock(conn: &mut PgConnection, id: MedicineId, quantity: u32) -> Result<()> {
        let requested = to_i32("quantity", quantity)?;
        let updated = sqlx::query(
            "UPDATE medicines SET stock_quantity = stock_quantity - $2 \
             WHERE id = $1 AND stock_quantity >= $2",
        )
        .bind(id.as_uuid())
        .bind(requested)
        .execute(&mut *conn)
        .await
        .map_err(db)?;
        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let available: Option<i32> =
            sqlx::query_scalar("SELECT stock_quantity FROM medicines WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&mut *conn)
                .await
                .map_err(db)?;
        tracing::debug!(
            medicine_id = %id,
            requested,
            ?available,
            "Conditional stock update matched no row"
        );
        match available {
            None => Err(StoreError::not_found("Medicine", id)),
            Some(available) => Err(StoreError::InsufficientStock {
                medicine_id: id,
                available: to_u32("stock_quantity", available)?,
                requested: quantity,
            }),
        }
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn get_medicine(&self, id: MedicineId) -> Result<Option<Medicine>> {
        let row = sqlx::query(&format!("SELECT {MEDICINE_COLUMNS} FROM medicines WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::medicine).transpose()
    }

    async fn put_medicine(&self, medicine: Medicine) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO medicines (id, name, generic_name, manufacturer, price,
                                   prescription_required, stock_quantity, min_stock_level, expiry_date)
            VALUES ($1, $2, $3, $4, $5::NUMERIC / 100, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                generic_name = EXCLUDED.generic_name,
                manufacturer = EXCLUDED.manufacturer,
                price = EXCLUDED.price,
                prescription_required = EXCLUDED.prescription_required,
                stock_quantity = EXCLUDED.stock_quantity,
                min_stock_level = EXCLUDED.min_stock_level,
                expiry_date = EXCLUDED.expiry_date
            "#,
        )
        .bind(medicine.id.as_uuid())
        .bind(&medicine.name)
        .bind(&medicine.generic_name)
        .bind(&medicine.manufacturer)
        .bind(medicine.price.paise())
        .bind(medicine.prescription_required)
        .bind(to_i32("stock_quantity", medicine.stock_quantity)?)
        .bind(to_i32("min_stock_level", medicine.min_stock_level)?)
        .bind(medicine.expiry_date)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn decrement_stock(&self, id: MedicineId, quantity: u32) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        Self::take_stock(&mut conn, id, quantity).await
    }

    async fn restock(&self, id: MedicineId, quantity: u32) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE medicines SET stock_quantity = stock_quantity + $2 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(to_i32("quantity", quantity)?)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("Medicine", id));
        }
        Ok(())
    }
}

#[async_trait]
impl PrescriptionStore for PostgresStore {
    async fn get_prescription(&self, id: PrescriptionId) -> Result<Option<Prescription>> {
        let row = sqlx::query(
            "SELECT id, user_id, status, valid_until, prescribed_medicines \
             FROM prescriptions WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.as_ref().map(rows::prescription).transpose()
    }

    async fn put_prescription(&self, prescription: Prescription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prescriptions (id, user_id, status, valid_until, prescribed_medicines)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                status = EXCLUDED.status,
                valid_until = EXCLUDED.valid_until,
                prescribed_medicines = EXCLUDED.prescribed_medicines
            "#,
        )
        .bind(prescription.id.as_uuid())
        .bind(prescription.user_id.as_uuid())
        .bind(prescription.status.as_str())
        .bind(prescription.valid_until)
        .bind(&prescription.prescribed_medicines)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn get_or_create_cart(&self, user_id: UserId) -> Result<Cart> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO carts (id, user_id, created_at, updated_at) VALUES ($1, $2, $3, $3) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(CartId::new().as_uuid())
        .bind(user_id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        let row = sqlx::query(
            "SELECT id, user_id, created_at, updated_at FROM carts WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;
        rows::cart(&row)
    }

    async fn list_lines(&self, cart_id: CartId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(&format!(
            "SELECT {CART_ITEM_COLUMNS} FROM cart_items WHERE cart_id = $1 ORDER BY seq"
        ))
        .bind(cart_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(rows::cart_line).collect()
    }

    async fn get_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<Option<CartLine>> {
        let row = sqlx::query(&format!(
            "SELECT {CART_ITEM_COLUMNS} FROM cart_items WHERE cart_id = $1 AND id = $2"
        ))
        .bind(cart_id.as_uuid())
        .bind(line_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.as_ref().map(rows::cart_line).transpose()
    }

    async fn upsert_line(&self, cart_id: CartId, upsert: LineUpsert) -> Result<CartLine> {
        let (quantity, increment) = match upsert.change {
            QuantityChange::Add(amount) => (amount, true),
            QuantityChange::Set(quantity) => (quantity, false),
        };
        let mut tx = self.pool.begin().await.map_err(db)?;

        // The conflict arm locks the existing row, so concurrent adds serialize here.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO cart_items (id, cart_id, medicine_id, quantity, prescription_id, notes, added_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (cart_id, medicine_id) DO UPDATE SET
                quantity = CASE WHEN $8 THEN cart_items.quantity + EXCLUDED.quantity
                                ELSE EXCLUDED.quantity END,
                prescription_id = COALESCE(EXCLUDED.prescription_id, cart_items.prescription_id),
                notes = COALESCE(EXCLUDED.notes, cart_items.notes)
            RETURNING {CART_ITEM_COLUMNS}
            "#
        ))
        .bind(CartLineId::new().as_uuid())
        .bind(cart_id.as_uuid())
        .bind(upsert.medicine_id.as_uuid())
        .bind(to_i32("quantity", quantity)?)
        .bind(upsert.prescription_id.map(|id| id.as_uuid()))
        .bind(&upsert.notes)
        .bind(Utc::now())
        .bind(increment)
        .fetch_one(&mut *tx)
        .await
        .map_err(db)?;
        let line = rows::cart_line(&row)?;

        if line.quantity > upsert.max_quantity {
            tx.rollback().await.map_err(db)?;
            return Err(StoreError::QuantityLimit {
                limit: upsert.max_quantity,
                requested: line.quantity,
            });
        }

        sqlx::query("UPDATE carts SET updated_at = $2 WHERE id = $1")
            .bind(cart_id.as_uuid())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(line)
    }

    async fn update_line(
        &self,
        cart_id: CartId,
        line_id: CartLineId,
        update: LineUpdate,
    ) -> Result<Option<CartLine>> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE cart_items SET
                quantity = $3,
                prescription_id = COALESCE($4, prescription_id),
                notes = COALESCE($5, notes)
            WHERE cart_id = $1 AND id = $2
            RETURNING {CART_ITEM_COLUMNS}
            "#
        ))
        .bind(cart_id.as_uuid())
        .bind(line_id.as_uuid())
        .bind(to_i32("quantity", update.quantity)?)
        .bind(update.prescription_id.map(|id| id.as_uuid()))
        .bind(&update.notes)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let line = rows::cart_line(&row)?;

        sqlx::query("UPDATE carts SET updated_at = $2 WHERE id = $1")
            .bind(cart_id.as_uuid())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(Some(line))
    }

    async fn delete_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND id = $2")
            .bind(cart_id.as_uuid())
            .bind(line_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn delete_lines(&self, cart_id: CartId, lines: &[CartLine]) -> Result<u64> {
        let ids: Vec<Uuid> = lines.iter().map(|line| line.id.as_uuid()).collect();
        let quantities = lines
            .iter()
            .map(|line| to_i32("quantity", line.quantity))
            .collect::<Result<Vec<_>>>()?;
        let deleted = sqlx::query(
            r#"
            DELETE FROM cart_items c
            USING UNNEST($2::UUID[], $3::INT[]) AS taken(id, quantity)
            WHERE c.cart_id = $1 AND c.id = taken.id AND c.quantity = taken.quantity
            "#,
        )
        .bind(cart_id.as_uuid())
        .bind(&ids)
        .bind(&quantities)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(deleted.rows_affected())
    }

    async fn clear(&self, cart_id: CartId) -> Result<()> {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        // Dropping the transaction on any error below rolls back every decrement.
        for line in &order.lines {
            Self::take_stock(&mut tx, line.medicine_id, line.quantity).await?;
        }

        let address = serde_json::to_value(&order.delivery_address)
            .map_err(|err| decode(DecodeError::Serialization(err)))?;
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, order_number, status, payment_status, payment_method,
                                subtotal, tax_amount, delivery_fee, total_amount, delivery_address,
                                delivery_instructions, delivery_partner_id, tracking_number,
                                estimated_delivery_minutes, actual_delivery_date, cancellation_reason,
                                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6,
                    $7::NUMERIC / 100, $8::NUMERIC / 100, $9::NUMERIC / 100, $10::NUMERIC / 100,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.payment_method.as_str())
        .bind(order.subtotal.paise())
        .bind(order.tax_amount.paise())
        .bind(order.delivery_fee.paise())
        .bind(order.total_amount.paise())
        .bind(address)
        .bind(&order.delivery_instructions)
        .bind(order.delivery_partner_id.map(|id| id.as_uuid()))
        .bind(&order.tracking_number)
        .bind(
            order
                .estimated_delivery_minutes
                .map(|minutes| to_i32("estimated_delivery_minutes", minutes))
                .transpose()?,
        )
        .bind(order.actual_delivery_date)
        .bind(&order.cancellation_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_constraint(&err, "unique_order_number") {
                return StoreError::Duplicate(format!("order number {}", order.order_number));
            }
            db(err)
        })?;

        for (line_no, line) in order.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, line_no, medicine_id, medicine_name, quantity,
                                         unit_price, total_price, prescription_id)
                VALUES ($1, $2, $3, $4, $5, $6::NUMERIC / 100, $7::NUMERIC / 100, $8)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(i32::try_from(line_no).unwrap_or(i32::MAX))
            .bind(line.medicine_id.as_uuid())
            .bind(&line.medicine_name)
            .bind(to_i32("quantity", line.quantity)?)
            .bind(line.unit_price.paise())
            .bind(line.total_price.paise())
            .bind(line.prescription_id.map(|id| id.as_uuid()))
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        for change in &order.status_history {
            sqlx::query(
                "INSERT INTO order_status_history (order_id, status, changed_at, note, changed_by) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(order.id.as_uuid())
            .bind(change.status.as_str())
            .bind(change.at)
            .bind(&change.note)
            .bind(change.changed_by.map(|id| id.as_uuid()))
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        Self::load_order(&mut conn, id).await
    }

    async fn order_number_exists(&self, order_number: &str) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE order_number = $1)")
            .bind(order_number)
            .fetch_one(&self.pool)
            .await
            .map_err(db)
    }

    async fn update_status_fields(
        &self,
        id: OrderId,
        expected: OrderStatus,
        update: &OrderUpdate,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let updated = sqlx::query(
            r#"
            UPDATE orders SET
                status = $3,
                payment_status = $4,
                estimated_delivery_minutes = COALESCE($5, estimated_delivery_minutes),
                actual_delivery_date = COALESCE($6, actual_delivery_date),
                delivery_partner_id = COALESCE($7, delivery_partner_id),
                tracking_number = COALESCE($8, tracking_number),
                cancellation_reason = COALESCE($9, cancellation_reason),
                updated_at = $10
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(update.status.as_str())
        .bind(update.payment_status.as_str())
        .bind(
            update
                .estimated_delivery_minutes
                .map(|minutes| to_i32("estimated_delivery_minutes", minutes))
                .transpose()?,
        )
        .bind(update.actual_delivery_date)
        .bind(update.delivery_partner_id.map(|id| id.as_uuid()))
        .bind(&update.tracking_number)
        .bind(&update.cancellation_reason)
        .bind(update.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        if updated.rows_affected() == 0 {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                    .bind(id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db)?;
            tracing::debug!(order_id = %id, %expected, ?actual, "Status compare-and-set missed");
            return match actual {
                None => Err(StoreError::not_found("Order", id)),
                Some(actual) => Err(StoreError::StatusConflict {
                    order_id: id,
                    expected,
                    actual: rows::parse("status", actual)?,
                }),
            };
        }

        if update.restock {
            sqlx::query(
                r#"
                UPDATE medicines m SET stock_quantity = m.stock_quantity + oi.quantity
                FROM order_items oi
                WHERE oi.order_id = $1 AND oi.medicine_id = m.id
                "#,
            )
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        if let Some(change) = &update.history_entry {
            sqlx::query(
                "INSERT INTO order_status_history (order_id, status, changed_at, note, changed_by) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(id.as_uuid())
            .bind(change.status.as_str())
            .bind(change.at)
            .bind(&change.note)
            .bind(change.changed_by.map(|id| id.as_uuid()))
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        let order = Self::load_order(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::not_found("Order", id))?;
        tx.commit().await.map_err(db)?;
        Ok(order)
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE ($1::UUID IS NULL OR user_id = $1) AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY created_at DESC, id \
             LIMIT $3 OFFSET $4"
        ))
        .bind(filter.user_id.map(|id| id.as_uuid()))
        .bind(filter.status.map(|status| status.as_str()))
        .bind(i64::from(filter.limit))
        .bind(i64::from(filter.offset))
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?;
        Self::attach_details(&mut conn, rows).await
    }

    async fn order_stats(&self) -> Result<OrderStats> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*), COALESCE(SUM((total_amount * 100)::BIGINT), 0)::BIGINT \
             FROM orders GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut stats = OrderStats::default();
        let mut revenue_orders = 0u64;
        for (status, count, revenue) in rows {
            let status: OrderStatus = rows::parse("status", status)?;
            let count = u64::try_from(count).unwrap_or_default();
            stats.total_orders += count;
            stats.by_status.insert(status, count);
            if !matches!(status, OrderStatus::Cancelled | OrderStatus::Returned) {
                stats.total_revenue += Money::from_paise(revenue);
                revenue_orders += count;
            }
        }
        stats.average_order_value = stats.total_revenue.average_over(revenue_orders);
        Ok(stats)
    }
}
