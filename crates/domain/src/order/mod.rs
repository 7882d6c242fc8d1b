//! Orders: creation, status lifecycle and queries.

mod lifecycle;
mod models;
mod number;
mod service;
mod state;

pub use lifecycle::{
    DELIVERY_ESTIMATE_RANGE, MAX_CANCELLATION_REASON_LEN, estimated_delivery_minutes,
    plan_cancellation, plan_delivery_assignment, plan_transition,
};
pub use models::{
    CancellationRequest, Checkout, DeliveryAssignment, Order, OrderFilter, OrderItemRequest,
    OrderLine, OrderStats, OrderTracking, OrderUpdate, StatusChange, StatusUpdateRequest,
};
pub use number::generate as generate_order_number;
pub use service::OrderService;
pub use state::{OrderStatus, PaymentStatus};
