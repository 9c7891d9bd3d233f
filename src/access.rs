//! Role assignment and the guards every ledger call passes before it mutates
use super::error::LedgerError;
use super::types::Address;
use std::fmt;

/// Capacity of a ledger's owner set.
pub const OWNER_SLOTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Farmer,
    Auditor,
    Warehouse,
    Distributor,
    Supermarket,
}

/// One address per role, fixed when the ledger is constructed.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct RoleBook {
    #[n(0)]
    farmer: Address,
    #[n(1)]
    auditor: Address,
    #[n(2)]
    warehouse: Address,
    #[n(3)]
    distributor: Address,
    #[n(4)]
    supermarket: Address,
}

/// Addresses allowed to append location updates. Independent of roles.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
#[cbor(array)]
pub struct Owners(#[n(0)] Vec<Address>);

/// The checks a ledger call can be gated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Only(Role),
    FarmerOrAuditor,
    ContractOwners,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Farmer,
        Role::Auditor,
        Role::Warehouse,
        Role::Distributor,
        Role::Supermarket,
    ];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Farmer => "farmer",
            Role::Auditor => "auditor",
            Role::Warehouse => "warehouse",
            Role::Distributor => "distributor",
            Role::Supermarket => "supermarket",
        };
        f.write_str(name)
    }
}

impl RoleBook {
    /// Role slots are disjoint, so one address may hold at most one role.
    pub fn new(
        farmer: Address,
        auditor: Address,
        warehouse: Address,
        distributor: Address,
        supermarket: Address,
    ) -> Result<Self, LedgerError> {
        let book = Self {
            farmer,
            auditor,
            warehouse,
            distributor,
            supermarket,
        };

        for (i, a) in Role::ALL.iter().enumerate() {
            for b in &Role::ALL[i + 1..] {
                if book.holder(*a) == book.holder(*b) {
                    return Err(LedgerError::OverlappingRoles(book.holder(*a).clone()));
                }
            }
        }

        Ok(book)
    }

    pub fn holder(&self, role: Role) -> &Address {
        match role {
            Role::Farmer => &self.farmer,
            Role::Auditor => &self.auditor,
            Role::Warehouse => &self.warehouse,
            Role::Distributor => &self.distributor,
            Role::Supermarket => &self.supermarket,
        }
    }

    pub fn role_of(&self, caller: &Address) -> Option<Role> {
        Role::ALL.into_iter().find(|r| self.holder(*r) == caller)
    }

    pub fn only(&self, role: Role, caller: &Address) -> Result<(), LedgerError> {
        if self.holder(role) != caller {
            return Err(LedgerError::Unauthorized {
                required: role,
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    pub fn only_farmer_or_auditor(&self, caller: &Address) -> Result<(), LedgerError> {
        if caller != &self.farmer && caller != &self.auditor {
            return Err(LedgerError::NotFarmerOrAuditor {
                caller: caller.clone(),
            });
        }
        Ok(())
    }
}

impl Owners {
    /// Replaces the whole set. Duplicate slots are allowed.
    pub fn set(&mut self, owners: [Address; OWNER_SLOTS]) {
        self.0 = owners.into();
    }

    pub fn contains(&self, caller: &Address) -> bool {
        self.0.iter().any(|owner| owner == caller)
    }

    pub fn only_owners(&self, caller: &Address) -> Result<(), LedgerError> {
        if !self.contains(caller) {
            return Err(LedgerError::NotOwner {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.0
    }
}

impl Guard {
    pub fn check(
        &self,
        caller: &Address,
        roles: &RoleBook,
        owners: &Owners,
    ) -> Result<(), LedgerError> {
        match self {
            Guard::Only(role) => roles.only(*role, caller),
            Guard::FarmerOrAuditor => roles.only_farmer_or_auditor(caller),
            Guard::ContractOwners => owners.only_owners(caller),
        }
    }
}
