use chrono::NaiveDate;
use uuid::Uuid;

/// Attempts at finding a free order number before giving up.
pub const MAX_NUMBER_ATTEMPTS: usize = 5;

/// Builds a human-readable order number: `ORD-YYYYMMDD-XXXXXXXX`.
///
/// The suffix is eight random uppercase hex digits; callers still check
/// uniqueness against the store.
pub fn generate(today: NaiveDate) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
    format!("ORD-{}-{}", today.format("%Y%m%d"), suffix)
}
