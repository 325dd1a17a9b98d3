//! Role-based permission checks.

use crate::domain::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Sets ceilings, commits epochs and administers roles.
    Supervisor,
    /// Manages programs and seeds epoch rewards.
    Distributor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Supervisor => "supervisor",
            Role::Distributor => "distributor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supervisor" => Ok(Role::Supervisor),
            "distributor" => Ok(Role::Distributor),
            other => Err(format!("unknown role {:?}", other)),
        }
    }
}

/// Permission policy injected into the engine.
pub trait AccessPolicy: Send + Sync {
    fn has_role(&self, account: &Address, role: Role) -> bool;

    /// Returns false if the account already held the role.
    fn grant(&mut self, account: &Address, role: Role) -> bool;

    /// Returns false if the account did not hold the role.
    fn revoke(&mut self, account: &Address, role: Role) -> bool;

    /// All (account, role) pairs, for snapshots.
    fn members(&self) -> Vec<(Address, Role)>;
}

/// In-memory role table.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: BTreeMap<Role, BTreeSet<Address>>,
}

impl RoleRegistry {
    /// A registry whose only member is `supervisor`.
    pub fn new(supervisor: Address) -> Self {
        let mut registry = Self::default();
        registry.grant(&supervisor, Role::Supervisor);
        registry
    }

    pub fn from_members(members: Vec<(Address, Role)>) -> Self {
        let mut registry = Self::default();
        for (account, role) in members {
            registry.grant(&account, role);
        }
        registry
    }
}

impl AccessPolicy for RoleRegistry {
    fn has_role(&self, account: &Address, role: Role) -> bool {
        self.roles.get(&role).is_some_and(|m| m.contains(account))
    }

    fn grant(&mut self, account: &Address, role: Role) -> bool {
        self.roles.entry(role).or_default().insert(account.clone())
    }

    fn revoke(&mut self, account: &Address, role: Role) -> bool {
        self.roles
            .get_mut(&role)
            .is_some_and(|m| m.remove(account))
    }

    fn members(&self) -> Vec<(Address, Role)> {
        self.roles
            .iter()
            .flat_map(|(role, accounts)| accounts.iter().map(|a| (a.clone(), *role)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_revoke() {
        let sup = Address::new("0xsup".to_string());
        let dist = Address::new("0xdist".to_string());
        let mut reg = RoleRegistry::new(sup.clone());

        assert!(reg.has_role(&sup, Role::Supervisor));
        assert!(!reg.has_role(&sup, Role::Distributor));

        assert!(reg.grant(&dist, Role::Distributor));
        assert!(!reg.grant(&dist, Role::Distributor));
        assert!(reg.has_role(&dist, Role::Distributor));

        assert!(reg.revoke(&dist, Role::Distributor));
        assert!(!reg.revoke(&dist, Role::Distributor));
        assert!(!reg.has_role(&dist, Role::Distributor));
    }

    #[test]
    fn test_members_roundtrip() {
        let mut reg = RoleRegistry::new(Address::new("0xsup".to_string()));
        reg.grant(&Address::new("0xdist".to_string()), Role::Distributor);
        let restored = RoleRegistry::from_members(reg.members());
        assert_eq!(restored.members(), reg.members());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("distributor".parse::<Role>(), Ok(Role::Distributor));
        assert!("admin".parse::<Role>().is_err());
    }
}
