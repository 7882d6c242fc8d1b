//! PostgreSQL implementation of the domain store ports.

mod error;
mod postgres;
mod rows;

pub use error::DecodeError;
pub use postgres::PostgresStore;
