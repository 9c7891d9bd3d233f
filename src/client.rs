//! The call surface a gateway drives, and its local sled binding
use super::access::{OWNER_SLOTS, RoleBook};
use super::error::{GatewayError, LedgerError};
use super::ledger::Action;
use super::registry::Registry;
use super::types::{Address, Bytes32, HistoryRecord, Location, Meta, OrderState};
use async_trait::async_trait;
use std::path::Path;

/// Remote ledger and registry calls, one method per call a client may issue.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn amount(&self) -> Result<u64, GatewayError>;
    async fn order_at(&self, index: u64) -> Result<Address, GatewayError>;
    async fn create(
        &self,
        product: Bytes32,
        amount: u64,
        creator: &Address,
    ) -> Result<Address, GatewayError>;

    async fn meta(&self, order: &Address) -> Result<Meta, GatewayError>;
    async fn state(&self, order: &Address) -> Result<OrderState, GatewayError>;
    async fn history_length(&self, order: &Address) -> Result<u64, GatewayError>;
    async fn history(&self, order: &Address, index: u64) -> Result<HistoryRecord, GatewayError>;
    async fn location_length(&self, order: &Address) -> Result<u64, GatewayError>;
    async fn location(&self, order: &Address, index: u64) -> Result<Location, GatewayError>;

    async fn set_owners(
        &self,
        order: &Address,
        owners: [Address; OWNER_SLOTS],
        caller: &Address,
    ) -> Result<(), GatewayError>;
    async fn invoke(
        &self,
        order: &Address,
        action: Action,
        caller: &Address,
    ) -> Result<(), GatewayError>;
    async fn update_location(
        &self,
        order: &Address,
        latitude: Bytes32,
        longitude: Bytes32,
        caller: &Address,
    ) -> Result<(), GatewayError>;
}

/// A registry living in a local sled database.
#[derive(Clone)]
pub struct LocalLedger {
    registry: Registry,
}

// storage faults are the local stand in for a failed remote call. everything
// else is a rejection by the ledger itself.
fn lift(call: &'static str, e: LedgerError) -> GatewayError {
    match e {
        LedgerError::Storage(e) => GatewayError::Transport {
            call,
            reason: e.to_string(),
        },
        other => GatewayError::Rejected(other),
    }
}

impl LocalLedger {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Open the database named by an endpoint such as `sled://ledger-data`.
    pub fn connect(
        endpoint: &str,
        registry: Address,
        roles: RoleBook,
    ) -> Result<Self, LedgerError> {
        let path = endpoint.strip_prefix("sled://").unwrap_or(endpoint);
        let db = sled::open(Path::new(path))?;

        tracing::info!(%endpoint, %registry, "connected to ledger store");
        Ok(Self::new(Registry::open(&db, registry, roles)?))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // sled blocks the calling thread, so every call runs on the blocking
    // pool and the caller's timeout stays in force while it is in flight.
    async fn blocking<T, F>(&self, call: &'static str, f: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnOnce(&Registry) -> Result<T, LedgerError> + Send + 'static,
    {
        let registry = self.registry.clone();

        tokio::task::spawn_blocking(move || f(&registry))
            .await
            .map_err(|e| GatewayError::Transport {
                call,
                reason: e.to_string(),
            })?
            .map_err(|e| lift(call, e))
    }
}

#[async_trait]
impl LedgerClient for LocalLedger {
    async fn amount(&self) -> Result<u64, GatewayError> {
        self.blocking("getAmount", |registry| registry.amount()).await
    }

    async fn order_at(&self, index: u64) -> Result<Address, GatewayError> {
        self.blocking("orders", move |registry| registry.orders(index))
            .await
    }

    async fn create(
        &self,
        product: Bytes32,
        amount: u64,
        creator: &Address,
    ) -> Result<Address, GatewayError> {
        let creator = creator.clone();
        self.blocking("create", move |registry| {
            registry.create(product, amount, &creator)
        })
        .await
    }

    async fn meta(&self, order: &Address) -> Result<Meta, GatewayError> {
        let order = order.clone();
        self.blocking("meta", move |registry| registry.meta(&order))
            .await
    }

    async fn state(&self, order: &Address) -> Result<OrderState, GatewayError> {
        let order = order.clone();
        self.blocking("state", move |registry| registry.state(&order))
            .await
    }

    async fn history_length(&self, order: &Address) -> Result<u64, GatewayError> {
        let order = order.clone();
        self.blocking("getHistoryLength", move |registry| {
            registry.history_length(&order)
        })
        .await
    }

    async fn history(&self, order: &Address, index: u64) -> Result<HistoryRecord, GatewayError> {
        let order = order.clone();
        self.blocking("history", move |registry| registry.history(&order, index))
            .await
    }

    async fn location_length(&self, order: &Address) -> Result<u64, GatewayError> {
        let order = order.clone();
        self.blocking("getLocationLength", move |registry| {
            registry.location_length(&order)
        })
        .await
    }

    async fn location(&self, order: &Address, index: u64) -> Result<Location, GatewayError> {
        let order = order.clone();
        self.blocking("locationHistory", move |registry| {
            registry.location(&order, index)
        })
        .await
    }

    async fn set_owners(
        &self,
        order: &Address,
        owners: [Address; OWNER_SLOTS],
        caller: &Address,
    ) -> Result<(), GatewayError> {
        let (order, caller) = (order.clone(), caller.clone());
        self.blocking("setOwners", move |registry| {
            registry.set_owners(&order, owners, &caller)
        })
        .await
    }

    async fn invoke(
        &self,
        order: &Address,
        action: Action,
        caller: &Address,
    ) -> Result<(), GatewayError> {
        let (order, caller) = (order.clone(), caller.clone());
        self.blocking(action.name(), move |registry| {
            registry.apply(&order, action, &caller)
        })
        .await
    }

    async fn update_location(
        &self,
        order: &Address,
        latitude: Bytes32,
        longitude: Bytes32,
        caller: &Address,
    ) -> Result<(), GatewayError> {
        let (order, caller) = (order.clone(), caller.clone());
        self.blocking("updateLocation", move |registry| {
            registry.update_location(&order, latitude, longitude, &caller)
        })
        .await
    }
}
