//! The order ledger: one order's metadata, lifecycle state and append-only logs
use super::access::{Guard, OWNER_SLOTS, Owners, Role, RoleBook};
use super::error::LedgerError;
use super::types::{Address, Bytes32, HistoryRecord, Location, Meta, OrderState, TimeStamp};
use chrono::Utc;
use std::fmt;
use std::str::FromStr;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct OrderLedger {
    #[n(0)]
    id: Address,
    #[n(1)]
    creator: Address,
    #[n(2)]
    roles: RoleBook,
    #[n(3)]
    meta: Meta,
    #[n(4)]
    state: OrderState,
    #[n(5)]
    sub_state: u8, // carried, never transitioned
    #[n(6)]
    history: Vec<HistoryRecord>,
    #[n(7)]
    location_history: Vec<Location>,
    #[n(8)]
    owners: Owners,
}

/// Every state changing call a ledger accepts, apart from owner and location
/// bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Approve,
    Validated,
    StoreAuditDocument,
    WarehouseReceivedOrder,
    WarehouseReleasedOrder,
    ReceivedAndInTransit,
    ConfirmDelivery,
    Revoke,
}

/// One row of the lifecycle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub guard: Guard,
    /// `None` means any open state.
    pub requires: Option<OrderState>,
    pub label: Option<&'static str>,
    /// `None` leaves the state where it is.
    pub next: Option<OrderState>,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Approve,
        Action::Validated,
        Action::StoreAuditDocument,
        Action::WarehouseReceivedOrder,
        Action::WarehouseReleasedOrder,
        Action::ReceivedAndInTransit,
        Action::ConfirmDelivery,
        Action::Revoke,
    ];

    pub fn transition(self) -> Transition {
        use OrderState::*;

        let (guard, requires, label, next) = match self {
            Action::Approve => (
                Guard::Only(Role::Farmer),
                Some(Ordered),
                Some("Approved"),
                Some(Approved),
            ),
            Action::Validated => (
                Guard::Only(Role::Auditor),
                Some(Approved),
                Some("Audited"),
                Some(Audited),
            ),
            Action::StoreAuditDocument => (
                Guard::Only(Role::Auditor),
                Some(Audited),
                Some("Stored document"),
                None,
            ),
            Action::WarehouseReceivedOrder => (
                Guard::Only(Role::Warehouse),
                Some(Audited),
                Some("Received"),
                Some(AtWarehouse),
            ),
            Action::WarehouseReleasedOrder => (
                Guard::Only(Role::Warehouse),
                Some(AtWarehouse),
                Some("Released"),
                Some(WarehouseReleased),
            ),
            Action::ReceivedAndInTransit => (
                Guard::Only(Role::Distributor),
                Some(WarehouseReleased),
                Some("In Transit"),
                Some(InTransit),
            ),
            Action::ConfirmDelivery => (
                Guard::Only(Role::Supermarket),
                Some(InTransit),
                Some("Confirmed Delivery"),
                Some(Delivered),
            ),
            Action::Revoke => (Guard::FarmerOrAuditor, None, None, Some(Revoked)),
        };

        Transition {
            guard,
            requires,
            label,
            next,
        }
    }

    /// The ledger call name, as clients address it.
    pub fn name(self) -> &'static str {
        match self {
            Action::Approve => "approve",
            Action::Validated => "validated",
            Action::StoreAuditDocument => "storeAuditDocument",
            Action::WarehouseReceivedOrder => "warehouseReceivedOrder",
            Action::WarehouseReleasedOrder => "warehouseReleasedOrder",
            Action::ReceivedAndInTransit => "receivedAndInTransit",
            Action::ConfirmDelivery => "confirmDelivery",
            Action::Revoke => "revoke",
        }
    }
}

impl FromStr for Action {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| LedgerError::UnknownAction(s.to_string()))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl OrderLedger {
    /// A fresh ledger always starts out `Ordered` with empty logs.
    pub fn new(
        id: Address,
        product: Bytes32,
        amount: u64,
        creator: Address,
        roles: RoleBook,
    ) -> Self {
        Self {
            id,
            creator,
            roles,
            meta: Meta {
                product,
                amount,
                revoked: false,
            },
            state: OrderState::Ordered,
            sub_state: 0,
            history: vec![],
            location_history: vec![],
            owners: Owners::default(),
        }
    }

    pub fn id(&self) -> &Address {
        &self.id
    }
    pub fn creator(&self) -> &Address {
        &self.creator
    }
    pub fn roles(&self) -> &RoleBook {
        &self.roles
    }
    pub fn meta(&self) -> &Meta {
        &self.meta
    }
    pub fn state(&self) -> OrderState {
        self.state
    }
    pub fn sub_state(&self) -> u8 {
        self.sub_state
    }
    pub fn owners(&self) -> &Owners {
        &self.owners
    }
    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }
    pub fn history_length(&self) -> u64 {
        self.history.len() as u64
    }
    pub fn history_record(&self, index: u64) -> Result<&HistoryRecord, LedgerError> {
        self.history
            .get(index as usize)
            .ok_or(LedgerError::IndexOutOfRange {
                index,
                count: self.history_length(),
            })
    }
    pub fn location_history(&self) -> &[Location] {
        &self.location_history
    }
    pub fn location_length(&self) -> u64 {
        self.location_history.len() as u64
    }
    pub fn location(&self, index: u64) -> Result<&Location, LedgerError> {
        self.location_history
            .get(index as usize)
            .ok_or(LedgerError::IndexOutOfRange {
                index,
                count: self.location_length(),
            })
    }

    /// Check the guard and the source state, then mutate. Nothing is touched
    /// unless both checks pass.
    pub fn apply(
        &mut self,
        action: Action,
        caller: &Address,
        now: TimeStamp<Utc>,
    ) -> Result<(), LedgerError> {
        let transition = action.transition();

        transition.guard.check(caller, &self.roles, &self.owners)?;

        match transition.requires {
            Some(required) if self.state != required => {
                return Err(LedgerError::InvalidState {
                    expected: required.name(),
                    actual: self.state,
                });
            }
            None if self.state.is_closed() => {
                return Err(LedgerError::InvalidState {
                    expected: "an open order",
                    actual: self.state,
                });
            }
            _ => {}
        }

        if let Some(label) = transition.label {
            self.add_record(caller, label, now);
        }
        if let Some(next) = transition.next {
            self.state = next;
        }
        if action == Action::Revoke {
            self.meta.revoked = true;
        }

        tracing::debug!(order = %self.id, %caller, %action, state = ?self.state, "ledger transition");
        Ok(())
    }

    pub fn approve(&mut self, caller: &Address, now: TimeStamp<Utc>) -> Result<(), LedgerError> {
        self.apply(Action::Approve, caller, now)
    }
    pub fn validated(&mut self, caller: &Address, now: TimeStamp<Utc>) -> Result<(), LedgerError> {
        self.apply(Action::Validated, caller, now)
    }
    pub fn store_audit_document(
        &mut self,
        caller: &Address,
        now: TimeStamp<Utc>,
    ) -> Result<(), LedgerError> {
        self.apply(Action::StoreAuditDocument, caller, now)
    }
    pub fn warehouse_received_order(
        &mut self,
        caller: &Address,
        now: TimeStamp<Utc>,
    ) -> Result<(), LedgerError> {
        self.apply(Action::WarehouseReceivedOrder, caller, now)
    }
    pub fn warehouse_released_order(
        &mut self,
        caller: &Address,
        now: TimeStamp<Utc>,
    ) -> Result<(), LedgerError> {
        self.apply(Action::WarehouseReleasedOrder, caller, now)
    }
    pub fn received_and_in_transit(
        &mut self,
        caller: &Address,
        now: TimeStamp<Utc>,
    ) -> Result<(), LedgerError> {
        self.apply(Action::ReceivedAndInTransit, caller, now)
    }
    pub fn confirm_delivery(
        &mut self,
        caller: &Address,
        now: TimeStamp<Utc>,
    ) -> Result<(), LedgerError> {
        self.apply(Action::ConfirmDelivery, caller, now)
    }
    pub fn revoke(&mut self, caller: &Address, now: TimeStamp<Utc>) -> Result<(), LedgerError> {
        self.apply(Action::Revoke, caller, now)
    }

    /// Replace the owner set. Any caller may do this; see DESIGN.md.
    pub fn set_owners(&mut self, owners: [Address; OWNER_SLOTS], caller: &Address) {
        if caller != &self.creator && self.roles.role_of(caller).is_none() {
            tracing::warn!(order = %self.id, %caller, "owner set replaced by an address with no role");
        }
        self.owners.set(owners);
    }

    pub fn update_location(
        &mut self,
        latitude: Bytes32,
        longitude: Bytes32,
        caller: &Address,
    ) -> Result<(), LedgerError> {
        Guard::ContractOwners.check(caller, &self.roles, &self.owners)?;

        self.location_history.push(Location {
            latitude,
            longitude,
            actor: caller.clone(),
        });
        Ok(())
    }

    // the only path onto `history`. stamps never go backwards.
    fn add_record(&mut self, caller: &Address, label: &str, now: TimeStamp<Utc>) {
        let timestamp = match self.history.last() {
            Some(last) if last.timestamp > now => last.timestamp.clone(),
            _ => now,
        };

        self.history.push(HistoryRecord {
            actor: caller.clone(),
            action: label.to_string(),
            timestamp,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Cast {
        farmer: Address,
        auditor: Address,
        warehouse: Address,
        distributor: Address,
        supermarket: Address,
    }

    fn cast() -> Cast {
        Cast {
            farmer: Address::new_account().unwrap(),
            auditor: Address::new_account().unwrap(),
            warehouse: Address::new_account().unwrap(),
            distributor: Address::new_account().unwrap(),
            supermarket: Address::new_account().unwrap(),
        }
    }

    fn ledger(cast: &Cast) -> OrderLedger {
        let roles = RoleBook::new(
            cast.farmer.clone(),
            cast.auditor.clone(),
            cast.warehouse.clone(),
            cast.distributor.clone(),
            cast.supermarket.clone(),
        )
        .unwrap();

        OrderLedger::new(
            Address::new_account().unwrap(),
            Bytes32::from_text("Avocado").unwrap(),
            120,
            Address::new_account().unwrap(),
            roles,
        )
    }

    #[test]
    fn full_lifecycle_records_each_step() {
        let c = cast();
        let mut order = ledger(&c);

        order.approve(&c.farmer, TimeStamp::new()).unwrap();
        order.validated(&c.auditor, TimeStamp::new()).unwrap();
        order.store_audit_document(&c.auditor, TimeStamp::new()).unwrap();
        assert_eq!(order.state(), OrderState::Audited);
        order.warehouse_received_order(&c.warehouse, TimeStamp::new()).unwrap();
        order.warehouse_released_order(&c.warehouse, TimeStamp::new()).unwrap();
        order.received_and_in_transit(&c.distributor, TimeStamp::new()).unwrap();
        order.confirm_delivery(&c.supermarket, TimeStamp::new()).unwrap();

        assert_eq!(order.state(), OrderState::Delivered);
        let labels: Vec<_> = order.history().iter().map(|r| r.action.as_str()).collect();
        assert_eq!(
            labels,
            [
                "Approved",
                "Audited",
                "Stored document",
                "Received",
                "Released",
                "In Transit",
                "Confirmed Delivery"
            ]
        );
        assert_eq!(order.history()[3].actor, c.warehouse);
    }

    #[test]
    fn wrong_role_leaves_ledger_untouched() {
        let c = cast();
        let mut order = ledger(&c);
        let before = order.clone();

        let err = order.approve(&c.auditor, TimeStamp::new()).unwrap_err();

        assert!(err.is_authorization());
        assert_eq!(order, before);
    }

    #[test]
    fn wrong_state_leaves_ledger_untouched() {
        let c = cast();
        let mut order = ledger(&c);
        let before = order.clone();

        let err = order.validated(&c.auditor, TimeStamp::new()).unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InvalidState {
                expected: "Approved",
                actual: OrderState::Ordered
            }
        ));
        assert_eq!(order, before);
    }

    #[test]
    fn revoke_sets_flag_without_history() {
        let c = cast();
        let mut order = ledger(&c);
        order.approve(&c.farmer, TimeStamp::new()).unwrap();

        order.revoke(&c.auditor, TimeStamp::new()).unwrap();

        assert_eq!(order.state(), OrderState::Revoked);
        assert!(order.meta().revoked);
        assert_eq!(order.history_length(), 1);
    }

    #[test]
    fn closed_orders_cannot_be_revoked() {
        let c = cast();
        let mut order = ledger(&c);
        order.revoke(&c.farmer, TimeStamp::new()).unwrap();

        assert!(order.revoke(&c.farmer, TimeStamp::new()).is_err());
        assert!(order.approve(&c.farmer, TimeStamp::new()).is_err());
    }

    #[test]
    fn history_timestamps_never_decrease() {
        let c = cast();
        let mut order = ledger(&c);
        let later = TimeStamp::new();
        let earlier = TimeStamp::from(later.to_datetime_utc() - chrono::Duration::seconds(30));

        order.approve(&c.farmer, later.clone()).unwrap();
        order.validated(&c.auditor, earlier).unwrap();

        assert_eq!(order.history()[1].timestamp, later);
    }

    #[test]
    fn location_updates_require_ownership() {
        let c = cast();
        let mut order = ledger(&c);
        let lat = Bytes32::from_text("52.3676").unwrap();
        let lon = Bytes32::from_text("4.9041").unwrap();

        assert!(order.update_location(lat, lon, &c.distributor).is_err());
        assert_eq!(order.location_length(), 0);

        order.set_owners(std::array::from_fn(|_| c.distributor.clone()), &c.distributor);
        order.update_location(lat, lon, &c.distributor).unwrap();

        assert_eq!(order.location(0).unwrap().actor, c.distributor);
        assert!(order.location(1).is_err());
        // location updates do not touch the lifecycle
        assert_eq!(order.state(), OrderState::Ordered);
        assert_eq!(order.history_length(), 0);
    }

    #[test]
    fn actions_parse_from_call_names() {
        for action in Action::ALL {
            assert_eq!(action.name().parse::<Action>().unwrap(), action);
        }
        assert!("ship".parse::<Action>().is_err());
    }

    #[test]
    fn ledger_cbor_roundtrip() {
        let c = cast();
        let mut order = ledger(&c);
        order.approve(&c.farmer, TimeStamp::new()).unwrap();

        let encoded = minicbor::to_vec(&order).unwrap();
        let decoded: OrderLedger = minicbor::decode(&encoded).unwrap();

        assert_eq!(order, decoded);
    }
}
