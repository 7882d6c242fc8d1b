//! Domain layer for the medicine commerce core.
//!
//! This crate provides:
//! - Value objects (money in paise, payment methods, delivery addresses)
//! - Persistence ports and an in-memory adapter
//! - The pricing engine and the prescription gate
//! - Cart management and whole-cart validation
//! - Order creation and the order status lifecycle
//! - Caller roles and capability checks

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod clock;
pub mod error;
pub mod order;
pub mod prescription;
pub mod pricing;
pub mod store;
pub mod value_objects;

pub use auth::{Caller, Capability, Role};
pub use cart::{
    AddToCart, Cart, CartLine, CartLineView, CartService, CartSummary, CartView,
    PrescriptionValidationStatus, UpdateCartLine, ValidationResult,
};
pub use catalog::Medicine;
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::DomainError;
pub use order::{
    CancellationRequest, Checkout, DeliveryAssignment, Order, OrderItemRequest, OrderLine,
    OrderService, OrderStats, OrderStatus, OrderTracking, PaymentStatus, StatusChange,
    StatusUpdateRequest,
};
pub use prescription::{Prescription, PrescriptionIssue, PrescriptionIssueKind, PrescriptionStatus};
pub use pricing::Totals;
pub use store::{
    CartStore, CatalogStore, InMemoryStore, OrderStore, PrescriptionStore, Store, StoreError,
};
pub use value_objects::{DeliveryAddress, Money, PaymentMethod};
