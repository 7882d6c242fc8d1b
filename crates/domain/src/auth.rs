//! Caller identity and capability checks.
//!
//! Authentication (token issuance and verification) happens outside this
//! crate; services receive an already authenticated [`Caller`] and check its
//! role before any write.

use std::str::FromStr;

use common::UserId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Role carried by an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Pharmacist,
    DeliveryPartner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Pharmacist => "pharmacist",
            Role::DeliveryPartner => "delivery_partner",
            Role::Admin => "admin",
        }
    }

    /// Returns true if this role holds the capability.
    pub fn grants(&self, capability: Capability) -> bool {
        match capability {
            Capability::ManageOrders | Capability::ViewAllOrders => {
                matches!(self, Role::Pharmacist | Role::Admin)
            }
            Capability::ManageDelivery => matches!(self, Role::DeliveryPartner | Role::Admin),
            Capability::ViewStats => matches!(self, Role::Admin),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "pharmacist" => Ok(Role::Pharmacist),
            "delivery_partner" => Ok(Role::DeliveryPartner),
            "admin" => Ok(Role::Admin),
            other => Err(DomainError::InvalidInput(format!("unknown role: {other}"))),
        }
    }
}

/// Privileged operations beyond acting on one's own cart and orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Move orders through the status graph and cancel any order.
    ManageOrders,
    /// Assign delivery partners and tracking numbers.
    ManageDelivery,
    /// Read orders owned by other users.
    ViewAllOrders,
    /// Read aggregate order statistics.
    ViewStats,
}

impl Capability {
    fn as_str(&self) -> &'static str {
        match self {
            Capability::ManageOrders => "manage orders",
            Capability::ManageDelivery => "manage deliveries",
            Capability::ViewAllOrders => "view all orders",
            Capability::ViewStats => "view order statistics",
        }
    }
}

/// An authenticated user making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn customer(user_id: UserId) -> Self {
        Self::new(user_id, Role::Customer)
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.role.grants(capability)
    }

    /// Fails with `Forbidden` unless the caller holds the capability.
    pub fn require(&self, capability: Capability) -> Result<(), DomainError> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(DomainError::Forbidden(format!(
                "role {} may not {}",
                self.role,
                capability.as_str()
            )))
        }
    }

    /// Passes when the caller owns the resource or holds the capability.
    pub fn require_owner_or(
        &self,
        owner: UserId,
        capability: Capability,
    ) -> Result<(), DomainError> {
        if self.user_id == owner || self.can(capability) {
            Ok(())
        } else {
            Err(DomainError::Forbidden("access denied".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        assert!(!Role::Customer.grants(Capability::ManageOrders));
        assert!(Role::Pharmacist.grants(Capability::ManageOrders));
        assert!(!Role::Pharmacist.grants(Capability::ManageDelivery));
        assert!(Role::DeliveryPartner.grants(Capability::ManageDelivery));
        assert!(!Role::DeliveryPartner.grants(Capability::ViewStats));
        assert!(Role::Admin.grants(Capability::ManageOrders));
        assert!(Role::Admin.grants(Capability::ManageDelivery));
        assert!(Role::Admin.grants(Capability::ViewStats));
    }

    #[test]
    fn test_require_owner_or_capability() {
        let owner = UserId::new();
        let customer = Caller::customer(owner);
        assert!(customer.require_owner_or(owner, Capability::ViewAllOrders).is_ok());

        let stranger = Caller::customer(UserId::new());
        assert!(matches!(
            stranger.require_owner_or(owner, Capability::ViewAllOrders),
            Err(DomainError::Forbidden(_))
        ));

        let pharmacist = Caller::new(UserId::new(), Role::Pharmacist);
        assert!(pharmacist.require_owner_or(owner, Capability::ViewAllOrders).is_ok());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("delivery_partner".parse::<Role>().unwrap(), Role::DeliveryPartner);
        assert!("root".parse::<Role>().is_err());
    }
}
