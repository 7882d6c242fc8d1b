//! Value objects shared by carts and orders.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DomainError;

/// Money amount represented in paise (1/100 rupee) to avoid floating point drift.
///
/// Every amount carries exactly two decimal places. Serialized as a decimal
/// string such as `"404.00"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money {
    paise: i64,
}

impl Money {
    /// Zero.
    pub const ZERO: Money = Money::from_paise(0);

    /// Creates a new amount from paise.
    pub const fn from_paise(paise: i64) -> Self {
        Self { paise }
    }

    /// Creates a new amount from a whole rupee value.
    pub const fn from_rupees(rupees: i64) -> Self {
        Self {
            paise: rupees * 100,
        }
    }

    /// Returns the amount in paise.
    pub fn paise(&self) -> i64 {
        self.paise
    }

    /// Returns the whole rupee portion.
    pub fn rupees(&self) -> i64 {
        self.paise / 100
    }

    /// Returns the paise remainder after whole rupees.
    pub fn paise_part(&self) -> i64 {
        self.paise.abs() % 100
    }

    /// Approximate value in rupees, for metrics only.
    pub fn as_f64(&self) -> f64 {
        self.paise as f64 / 100.0
    }

    pub fn is_positive(&self) -> bool {
        self.paise > 0
    }

    pub fn is_zero(&self) -> bool {
        self.paise == 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            paise: self.paise * i64::from(quantity),
        }
    }

    /// Applies a rate expressed in basis points (1800 = 18%), rounding half
    /// away from zero to the nearest paisa.
    pub fn apply_rate(&self, basis_points: i64) -> Money {
        let scaled = self.paise * basis_points;
        let rounded = if scaled >= 0 {
            (scaled + 5_000) / 10_000
        } else {
            (scaled - 5_000) / 10_000
        };
        Money { paise: rounded }
    }

    /// Divides evenly across `count` parts, rounding half up. Zero parts yields zero.
    pub fn average_over(&self, count: u64) -> Money {
        if count == 0 {
            return Money::ZERO;
        }
        let count = count as i64;
        Money {
            paise: (self.paise + count / 2) / count,
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.paise < 0 {
            write!(f, "-{}.{:02}", self.rupees().abs(), self.paise_part())
        } else {
            write!(f, "{}.{:02}", self.rupees(), self.paise_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            paise: self.paise + rhs.paise,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            paise: self.paise - rhs.paise,
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.paise += rhs.paise;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

/// Error returned when a decimal amount string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid money amount: {0:?}")]
pub struct ParseMoneyError(String);

impl FromStr for Money {
    type Err = ParseMoneyError;

    /// Parses `"12"`, `"12.3"` or `"12.34"`. More than two decimals is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMoneyError(s.to_string());
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (whole, fraction) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty()
            || fraction.len() > 2
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(err());
        }

        let whole: i64 = whole.parse().map_err(|_| err())?;
        let fraction: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| err())? * 10,
            _ => fraction.parse().map_err(|_| err())?,
        };

        let paise = whole
            .checked_mul(100)
            .and_then(|p| p.checked_add(fraction))
            .ok_or_else(err)?;
        Ok(Money::from_paise(if negative { -paise } else { paise }))
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// How the customer intends to pay. Payment itself is processed elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    CreditCard,
    DebitCard,
    Upi,
    NetBanking,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::Upi => "upi",
            PaymentMethod::NetBanking => "net_banking",
            PaymentMethod::Wallet => "wallet",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash_on_delivery" => Ok(PaymentMethod::CashOnDelivery),
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "debit_card" => Ok(PaymentMethod::DebitCard),
            "upi" => Ok(PaymentMethod::Upi),
            "net_banking" => Ok(PaymentMethod::NetBanking),
            "wallet" => Ok(PaymentMethod::Wallet),
            other => Err(DomainError::InvalidInput(format!(
                "unknown payment method: {other}"
            ))),
        }
    }
}

fn default_country() -> String {
    "India".to_string()
}

/// Delivery address captured on the order at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub landmark: Option<String>,
    pub contact_phone: String,
    pub contact_name: String,
}

impl DeliveryAddress {
    /// Checks required fields and length limits.
    pub fn validate(&self) -> Result<(), DomainError> {
        check_len("street", &self.street, 1, 255)?;
        check_len("city", &self.city, 1, 100)?;
        check_len("state", &self.state, 1, 100)?;
        check_len("postal_code", &self.postal_code, 1, 20)?;
        check_len("country", &self.country, 0, 100)?;
        if let Some(landmark) = &self.landmark {
            check_len("landmark", landmark, 0, 255)?;
        }
        check_len("contact_phone", &self.contact_phone, 10, 15)?;
        check_len("contact_name", &self.contact_name, 1, 100)?;
        Ok(())
    }
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), DomainError> {
    let len = value.trim().chars().count();
    if len < min || len > max {
        return Err(DomainError::InvalidInput(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(())
}
