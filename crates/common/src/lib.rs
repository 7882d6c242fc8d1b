//! Shared identifier types used across the workspace.

mod types;

pub use types::{CartId, CartLineId, DeliveryPartnerId, MedicineId, OrderId, PrescriptionId, UserId};
