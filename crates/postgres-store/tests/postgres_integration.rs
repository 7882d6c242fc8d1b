//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p postgres-store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use common::UserId;
use domain::cart::{LineUpdate, LineUpsert, QuantityChange};
use domain::{
    AddToCart, Caller, CancellationRequest, CartService, CartStore, CatalogStore, Checkout,
    DeliveryAddress, DomainError, FixedClock, Medicine, Money, OrderItemRequest, OrderService,
    OrderStatus, OrderStore, PaymentMethod, Prescription, PrescriptionStore, Role,
    StatusUpdateRequest, StoreError,
};
use domain::order::{OrderFilter, OrderUpdate};
use postgres_store::PostgresStore;
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_commerce_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> Arc<PostgresStore> {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE order_status_history, order_items, orders, cart_items, carts, \
         prescriptions, medicines",
    )
    .execute(&pool)
    .await
    .unwrap();

    Arc::new(PostgresStore::new(pool))
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
}

fn checkout() -> Checkout {
    Checkout {
        delivery_address: DeliveryAddress {
            street: "221 MG Road".to_string(),
            city: "Pune".to_string(),
            state: "Maharashtra".to_string(),
            postal_code: "411001".to_string(),
            country: "India".to_string(),
            landmark: Some("Opposite the metro station".to_string()),
            contact_phone: "9822012345".to_string(),
            contact_name: "Asha".to_string(),
        },
        payment_method: PaymentMethod::CreditCard,
        delivery_instructions: None,
    }
}

fn item(medicine: &Medicine, quantity: u32) -> OrderItemRequest {
    OrderItemRequest {
        medicine_id: medicine.id,
        quantity,
        prescription_id: None,
    }
}

fn orders(store: &Arc<PostgresStore>) -> OrderService<PostgresStore, FixedClock> {
    OrderService::with_clock(store.clone(), FixedClock::on(today()))
}

async fn stock_of(store: &PostgresStore, medicine: &Medicine) -> u32 {
    store
        .get_medicine(medicine.id)
        .await
        .unwrap()
        .unwrap()
        .stock_quantity
}

#[tokio::test]
#[serial]
async fn test_medicine_round_trips_with_exact_price() {
    let store = get_test_store().await;
    let medicine = Medicine::new("Dolo 650", Money::from_paise(3_099), 40)
        .with_generic_name("Paracetamol")
        .with_expiry_date(NaiveDate::from_ymd_opt(2027, 3, 31).unwrap());

    store.put_medicine(medicine.clone()).await.unwrap();

    let loaded = store.get_medicine(medicine.id).await.unwrap().unwrap();
    assert_eq!(loaded, medicine);
    assert!(store.get_medicine(Default::default()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_decrement_stock_refuses_to_go_negative() {
    let store = get_test_store().await;
    let medicine = Medicine::new("Pan 40", Money::from_rupees(12), 5);
    store.put_medicine(medicine.clone()).await.unwrap();

    store.decrement_stock(medicine.id, 3).await.unwrap();
    let err = store.decrement_stock(medicine.id, 3).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InsufficientStock {
            available: 2,
            requested: 3,
            ..
        }
    ));
    assert_eq!(stock_of(&store, &medicine).await, 2);

    store.restock(medicine.id, 8).await.unwrap();
    assert_eq!(stock_of(&store, &medicine).await, 10);
}

#[tokio::test]
#[serial]
async fn test_prescription_round_trip() {
    let store = get_test_store().await;
    let prescription = Prescription::verified(UserId::new())
        .with_valid_until(today())
        .with_medicines(["amoxicillin", "Ibuprofen"]);

    store.put_prescription(prescription.clone()).await.unwrap();

    let loaded = store.get_prescription(prescription.id).await.unwrap().unwrap();
    assert_eq!(loaded, prescription);
}

#[tokio::test]
#[serial]
async fn test_cart_upsert_merges_and_enforces_limit() {
    let store = get_test_store().await;
    let user = UserId::new();
    let cart = store.get_or_create_cart(user).await.unwrap();
    assert_eq!(store.get_or_create_cart(user).await.unwrap().id, cart.id);

    let medicine = Medicine::new("Cetzine", Money::from_rupees(20), 500);
    store.put_medicine(medicine.clone()).await.unwrap();

    let upsert = |change| LineUpsert {
        medicine_id: medicine.id,
        change,
        prescription_id: None,
        notes: None,
        max_quantity: 100,
    };

    let first = store
        .upsert_line(cart.id, upsert(QuantityChange::Add(60)))
        .await
        .unwrap();
    let err = store
        .upsert_line(cart.id, upsert(QuantityChange::Add(50)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::QuantityLimit {
            limit: 100,
            requested: 110
        }
    ));

    let merged = store
        .upsert_line(cart.id, upsert(QuantityChange::Add(40)))
        .await
        .unwrap();
    assert_eq!(merged.id, first.id);
    assert_eq!(merged.quantity, 100);

    let lines = store.list_lines(cart.id).await.unwrap();
    assert_eq!(lines.len(), 1);

    assert!(store.delete_line(cart.id, first.id).await.unwrap());
    assert!(!store.delete_line(cart.id, first.id).await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_update_line_by_id_and_snapshot_delete() {
    let store = get_test_store().await;
    let cart = store.get_or_create_cart(UserId::new()).await.unwrap();
    let first = Medicine::new("Cetzine", Money::from_rupees(20), 500);
    let second = Medicine::new("Allegra", Money::from_rupees(90), 500);
    store.put_medicine(first.clone()).await.unwrap();
    store.put_medicine(second.clone()).await.unwrap();

    let add = |medicine: &Medicine, quantity| LineUpsert {
        medicine_id: medicine.id,
        change: QuantityChange::Add(quantity),
        prescription_id: None,
        notes: None,
        max_quantity: 100,
    };
    let line = store.upsert_line(cart.id, add(&first, 2)).await.unwrap();
    store.upsert_line(cart.id, add(&second, 1)).await.unwrap();

    let update = LineUpdate {
        quantity: 5,
        prescription_id: None,
        notes: Some("Night dose".to_string()),
    };
    let updated = store
        .update_line(cart.id, line.id, update.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.quantity, 5);
    assert_eq!(updated.notes.as_deref(), Some("Night dose"));

    let snapshot = store.list_lines(cart.id).await.unwrap();
    store.upsert_line(cart.id, add(&second, 1)).await.unwrap();
    assert_eq!(store.delete_lines(cart.id, &snapshot).await.unwrap(), 1);

    let left = store.list_lines(cart.id).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].medicine_id, second.id);
    assert_eq!(left[0].quantity, 2);

    assert!(store.update_line(cart.id, line.id, update).await.unwrap().is_none());
    assert_eq!(store.list_lines(cart.id).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_checkout_from_cart_persists_order_and_clears_cart() {
    let store = get_test_store().await;
    let customer = Caller::customer(UserId::new());
    let medicine = Medicine::new("Crocin Advance", Money::from_rupees(100), 30);
    store.put_medicine(medicine.clone()).await.unwrap();

    let carts = CartService::with_clock(store.clone(), FixedClock::on(today()));
    carts
        .add_to_cart(
            &customer,
            AddToCart {
                medicine_id: medicine.id,
                quantity: 3,
                prescription_id: None,
                notes: Some("Strip of 15".to_string()),
            },
        )
        .await
        .unwrap();

    let order = orders(&store)
        .create_order_from_cart(&customer, checkout(), true)
        .await
        .unwrap();
    assert_eq!(order.total_amount, Money::from_rupees(404));

    let loaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded, order);
    assert_eq!(stock_of(&store, &medicine).await, 27);
    assert!(carts.get_cart(&customer).await.unwrap().lines.is_empty());
}

#[tokio::test]
#[serial]
async fn test_failed_order_rolls_back_earlier_decrements() {
    let store = get_test_store().await;
    let customer = Caller::customer(UserId::new());
    let plenty = Medicine::new("Plenty", Money::from_rupees(10), 50);
    let scarce = Medicine::new("Scarce", Money::from_rupees(10), 1);
    store.put_medicine(plenty.clone()).await.unwrap();
    store.put_medicine(scarce.clone()).await.unwrap();

    // Build the order by hand so the shortfall is hit inside the transaction.
    let order = orders(&store)
        .create_order(&customer, vec![item(&plenty, 5)], checkout())
        .await
        .unwrap();
    let mut conflicting = order.clone();
    conflicting.id = Default::default();
    conflicting.order_number = "ORD-20261014-ROLLBACK".to_string();
    let mut short_line = conflicting.lines[0].clone();
    short_line.medicine_id = scarce.id;
    short_line.quantity = 2;
    conflicting.lines.push(short_line);

    let err = store.create_order(&conflicting).await.unwrap_err();
    assert!(matches!(err, StoreError::InsufficientStock { .. }));
    assert_eq!(stock_of(&store, &plenty).await, 45);
    assert_eq!(stock_of(&store, &scarce).await, 1);
    assert!(store.get_order(conflicting.id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_duplicate_order_number_is_reported() {
    let store = get_test_store().await;
    let customer = Caller::customer(UserId::new());
    let medicine = Medicine::new("Shelcal", Money::from_rupees(100), 10);
    store.put_medicine(medicine.clone()).await.unwrap();

    let order = orders(&store)
        .create_order(&customer, vec![item(&medicine, 1)], checkout())
        .await
        .unwrap();
    assert!(store.order_number_exists(&order.order_number).await.unwrap());

    let mut copy = order.clone();
    copy.id = Default::default();
    let err = store.create_order(&copy).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
    assert_eq!(stock_of(&store, &medicine).await, 9);
}

#[tokio::test]
#[serial]
async fn test_status_update_is_compare_and_set() {
    let store = get_test_store().await;
    let customer = Caller::customer(UserId::new());
    let medicine = Medicine::new("Limcee", Money::from_rupees(30), 10);
    store.put_medicine(medicine.clone()).await.unwrap();
    let order = orders(&store)
        .create_order(&customer, vec![item(&medicine, 2)], checkout())
        .await
        .unwrap();

    let mut update = OrderUpdate::unchanged(&order, Utc::now());
    update.status = OrderStatus::Confirmed;
    let updated = store
        .update_status_fields(order.id, OrderStatus::Pending, &update)
        .await
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Confirmed);

    let err = store
        .update_status_fields(order.id, OrderStatus::Pending, &update)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::StatusConflict {
            expected: OrderStatus::Pending,
            actual: OrderStatus::Confirmed,
            ..
        }
    ));

    let err = store
        .update_status_fields(Default::default(), OrderStatus::Pending, &update)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
#[serial]
async fn test_cancel_before_dispatch_restocks_once() {
    let store = get_test_store().await;
    let customer = Caller::customer(UserId::new());
    let medicine = Medicine::new("Allegra 120", Money::from_rupees(200), 10);
    store.put_medicine(medicine.clone()).await.unwrap();
    let service = orders(&store);
    let order = service
        .create_order(&customer, vec![item(&medicine, 4)], checkout())
        .await
        .unwrap();
    assert_eq!(stock_of(&store, &medicine).await, 6);

    let request = CancellationRequest {
        reason: "Ordered twice".to_string(),
        refund_requested: false,
    };
    let cancelled = service
        .cancel_order(&customer, order.id, request.clone())
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Ordered twice"));
    assert_eq!(cancelled.status_history.len(), 2);
    assert_eq!(stock_of(&store, &medicine).await, 10);

    let err = service
        .cancel_order(&customer, order.id, request)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    assert_eq!(stock_of(&store, &medicine).await, 10);
}

#[tokio::test]
#[serial]
async fn test_listing_and_stats() {
    let store = get_test_store().await;
    let admin = Caller::new(UserId::new(), Role::Admin);
    let alice = Caller::customer(UserId::new());
    let bob = Caller::customer(UserId::new());
    let medicine = Medicine::new("Becosules", Money::from_rupees(100), 100);
    store.put_medicine(medicine.clone()).await.unwrap();
    let service = orders(&store);

    let first = service
        .create_order(&alice, vec![item(&medicine, 3)], checkout())
        .await
        .unwrap();
    service
        .create_order(&alice, vec![item(&medicine, 6)], checkout())
        .await
        .unwrap();
    service
        .create_order(&bob, vec![item(&medicine, 1)], checkout())
        .await
        .unwrap();
    service
        .update_order_status(
            &admin,
            first.id,
            StatusUpdateRequest {
                status: OrderStatus::Cancelled,
                estimated_delivery_minutes: None,
                note: Some("Customer called".to_string()),
            },
        )
        .await
        .unwrap();

    let alice_orders = store
        .list_orders(OrderFilter::for_user(alice.user_id))
        .await
        .unwrap();
    assert_eq!(alice_orders.len(), 2);
    assert!(alice_orders.iter().all(|order| !order.lines.is_empty()));

    let mut cancelled = OrderFilter::all();
    cancelled.status = Some(OrderStatus::Cancelled);
    let cancelled = store.list_orders(cancelled).await.unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, first.id);

    let stats = service.order_stats(&admin).await.unwrap();
    assert_eq!(stats.total_orders, 3);
    assert_eq!(stats.by_status.get(&OrderStatus::Pending), Some(&2));
    assert_eq!(stats.by_status.get(&OrderStatus::Cancelled), Some(&1));
    // 600 + 108 GST (free delivery) and 100 + 18 + 50
    assert_eq!(stats.total_revenue, Money::from_rupees(876));
    assert_eq!(stats.average_order_value, Money::from_rupees(438));
}
