//! Shopping carts: line management, live pricing and validation.

mod models;
mod service;
mod validation;

pub use models::*;
pub use service::{AddToCart, CartService, UpdateCartLine};
pub(crate) use service::check_quantity;
pub use validation::{CartValidator, EXPIRY_WARNING_DAYS};
