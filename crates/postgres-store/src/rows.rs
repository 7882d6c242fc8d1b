//! Row decoding. Money columns are selected as whole paise (`BIGINT`).

use std::str::FromStr;

use common::{
    CartId, CartLineId, DeliveryPartnerId, MedicineId, OrderId, PrescriptionId, UserId,
};
use domain::order::{OrderLine, StatusChange};
use domain::{
    Cart, CartLine, DeliveryAddress, Medicine, Money, Order, Prescription, StoreError,
};
use sqlx::{Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{DecodeError, db, decode, to_u32};

pub(crate) const MEDICINE_COLUMNS: &str = "id, name, generic_name, manufacturer, \
     (price * 100)::BIGINT AS price_paise, prescription_required, stock_quantity, \
     min_stock_level, expiry_date";

pub(crate) const CART_ITEM_COLUMNS: &str =
    "id, cart_id, medicine_id, quantity, prescription_id, notes, added_at";

pub(crate) const ORDER_COLUMNS: &str = "id, user_id, order_number, status, payment_status, \
     payment_method, (subtotal * 100)::BIGINT AS subtotal_paise, \
     (tax_amount * 100)::BIGINT AS tax_paise, (delivery_fee * 100)::BIGINT AS fee_paise, \
     (total_amount * 100)::BIGINT AS total_paise, delivery_address, delivery_instructions, \
     delivery_partner_id, tracking_number, estimated_delivery_minutes, actual_delivery_date, \
     cancellation_reason, created_at, updated_at";

pub(crate) const ORDER_ITEM_COLUMNS: &str = "order_id, medicine_id, medicine_name, quantity, \
     (unit_price * 100)::BIGINT AS unit_paise, (total_price * 100)::BIGINT AS line_paise, \
     prescription_id";

pub(crate) const HISTORY_COLUMNS: &str = "order_id, status, changed_at, note, changed_by";

pub(crate) fn parse<T: FromStr>(column: &'static str, value: String) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|_| decode(DecodeError::InvalidValue { column, value }))
}

fn money(row: &PgRow, column: &str) -> Result<Money, StoreError> {
    Ok(Money::from_paise(row.try_get::<i64, _>(column).map_err(db)?))
}

fn optional_id<T: From<Uuid>>(row: &PgRow, column: &str) -> Result<Option<T>, StoreError> {
    Ok(row
        .try_get::<Option<Uuid>, _>(column)
        .map_err(db)?
        .map(T::from))
}

fn id<T: From<Uuid>>(row: &PgRow, column: &str) -> Result<T, StoreError> {
    Ok(T::from(row.try_get::<Uuid, _>(column).map_err(db)?))
}

pub(crate) fn medicine(row: &PgRow) -> Result<Medicine, StoreError> {
    Ok(Medicine {
        id: id::<MedicineId>(row, "id")?,
        name: row.try_get("name").map_err(db)?,
        generic_name: row.try_get("generic_name").map_err(db)?,
        manufacturer: row.try_get("manufacturer").map_err(db)?,
        price: money(row, "price_paise")?,
        prescription_required: row.try_get("prescription_required").map_err(db)?,
        stock_quantity: to_u32("stock_quantity", row.try_get("stock_quantity").map_err(db)?)?,
        min_stock_level: to_u32("min_stock_level", row.try_get("min_stock_level").map_err(db)?)?,
        expiry_date: row.try_get("expiry_date").map_err(db)?,
    })
}

pub(crate) fn prescription(row: &PgRow) -> Result<Prescription, StoreError> {
    Ok(Prescription {
        id: id::<PrescriptionId>(row, "id")?,
        user_id: id::<UserId>(row, "user_id")?,
        status: parse("status", row.try_get("status").map_err(db)?)?,
        valid_until: row.try_get("valid_until").map_err(db)?,
        prescribed_medicines: row.try_get("prescribed_medicines").map_err(db)?,
    })
}

pub(crate) fn cart(row: &PgRow) -> Result<Cart, StoreError> {
    Ok(Cart {
        id: id::<CartId>(row, "id")?,
        user_id: id::<UserId>(row, "user_id")?,
        created_at: row.try_get("created_at").map_err(db)?,
        updated_at: row.try_get("updated_at").map_err(db)?,
    })
}

pub(crate) fn cart_line(row: &PgRow) -> Result<CartLine, StoreError> {
    Ok(CartLine {
        id: id::<CartLineId>(row, "id")?,
        cart_id: id::<CartId>(row, "cart_id")?,
        medicine_id: id::<MedicineId>(row, "medicine_id")?,
        quantity: to_u32("quantity", row.try_get("quantity").map_err(db)?)?,
        prescription_id: optional_id::<PrescriptionId>(row, "prescription_id")?,
        notes: row.try_get("notes").map_err(db)?,
        added_at: row.try_get("added_at").map_err(db)?,
    })
}

/// Decodes an order row. Lines and history are attached by the caller.
pub(crate) fn order(row: &PgRow) -> Result<Order, StoreError> {
    let address: serde_json::Value = row.try_get("delivery_address").map_err(db)?;
    let delivery_address: DeliveryAddress = serde_json::from_value(address)
        .map_err(|err| decode(DecodeError::Serialization(err)))?;
    let estimate: Option<i32> = row.try_get("estimated_delivery_minutes").map_err(db)?;

    Ok(Order {
        id: id::<OrderId>(row, "id")?,
        user_id: id::<UserId>(row, "user_id")?,
        order_number: row.try_get("order_number").map_err(db)?,
        status: parse("status", row.try_get("status").map_err(db)?)?,
        payment_status: parse("payment_status", row.try_get("payment_status").map_err(db)?)?,
        payment_method: parse("payment_method", row.try_get("payment_method").map_err(db)?)?,
        lines: Vec::new(),
        subtotal: money(row, "subtotal_paise")?,
        tax_amount: money(row, "tax_paise")?,
        delivery_fee: money(row, "fee_paise")?,
        total_amount: money(row, "total_paise")?,
        delivery_address,
        delivery_instructions: row.try_get("delivery_instructions").map_err(db)?,
        delivery_partner_id: optional_id::<DeliveryPartnerId>(row, "delivery_partner_id")?,
        tracking_number: row.try_get("tracking_number").map_err(db)?,
        estimated_delivery_minutes: estimate
            .map(|minutes| to_u32("estimated_delivery_minutes", minutes))
            .transpose()?,
        actual_delivery_date: row.try_get("actual_delivery_date").map_err(db)?,
        cancellation_reason: row.try_get("cancellation_reason").map_err(db)?,
        status_history: Vec::new(),
        created_at: row.try_get("created_at").map_err(db)?,
        updated_at: row.try_get("updated_at").map_err(db)?,
    })
}

pub(crate) fn order_line(row: &PgRow) -> Result<(OrderId, OrderLine), StoreError> {
    let line = OrderLine {
        medicine_id: id::<MedicineId>(row, "medicine_id")?,
        medicine_name: row.try_get("medicine_name").map_err(db)?,
        quantity: to_u32("quantity", row.try_get("quantity").map_err(db)?)?,
        unit_price: money(row, "unit_paise")?,
        total_price: money(row, "line_paise")?,
        prescription_id: optional_id::<PrescriptionId>(row, "prescription_id")?,
    };
    Ok((id::<OrderId>(row, "order_id")?, line))
}

pub(crate) fn status_change(row: &PgRow) -> Result<(OrderId, StatusChange), StoreError> {
    let change = StatusChange {
        status: parse("status", row.try_get("status").map_err(db)?)?,
        at: row.try_get("changed_at").map_err(db)?,
        note: row.try_get("note").map_err(db)?,
        changed_by: optional_id::<UserId>(row, "changed_by")?,
    };
    Ok((id::<OrderId>(row, "order_id")?, change))
}
