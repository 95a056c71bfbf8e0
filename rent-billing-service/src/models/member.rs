//! Organization membership roles.

use super::UnknownVariant;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Owner,
    Accountant,
    Manager,
    Tenant,
}

impl OrgRole {
    /// Roles allowed to void invoices.
    pub const INVOICE_VOIDERS: &'static [OrgRole] = &[OrgRole::Owner, OrgRole::Accountant];

    pub fn can_void_invoices(&self) -> bool {
        Self::INVOICE_VOIDERS.contains(self)
    }
}

impl FromStr for OrgRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(OrgRole::Owner),
            "accountant" => Ok(OrgRole::Accountant),
            "manager" => Ok(OrgRole::Manager),
            "tenant" => Ok(OrgRole::Tenant),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_owner_and_accountant_void() {
        assert!(OrgRole::Owner.can_void_invoices());
        assert!(OrgRole::Accountant.can_void_invoices());
        assert!(!OrgRole::Manager.can_void_invoices());
        assert!(!OrgRole::Tenant.can_void_invoices());
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!("superuser".parse::<OrgRole>().is_err());
        assert!("Owner".parse::<OrgRole>().is_err());
        assert_eq!("accountant".parse::<OrgRole>(), Ok(OrgRole::Accountant));
    }
}
