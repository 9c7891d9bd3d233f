//! Gateway: hydrates ledgers into order views, pages through the registry,
//! dispatches lifecycle actions and announces changes to subscribers.
//!
//! Every remote call is bounded by the configured timeout. Reads that fail
//! with a transient error are retried; writes never are.
use super::access::OWNER_SLOTS;
use super::client::LedgerClient;
use super::config::GatewayConfig;
use super::error::{ConfigError, GatewayError};
use super::ledger::Action;
use super::types::{Address, Bytes32, HistoryRecord, Location, Meta, OrderState};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OnceCell, broadcast};
use tokio_util::sync::CancellationToken;

/// Immutable snapshot of one ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: Address,
    pub meta: Meta,
    pub state: OrderState,
    pub history: Vec<HistoryRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    NewOrder,
    OrderUpdated(Order),
}

/// Source of the account the gateway acts as.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self) -> Result<Address, GatewayError>;
}

/// An account fixed at startup.
pub struct StaticIdentity(pub Address);

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn resolve(&self) -> Result<Address, GatewayError> {
        Ok(self.0.clone())
    }
}

pub struct Gateway<C> {
    client: Arc<C>,
    identity: Arc<dyn IdentityProvider>,
    account: OnceCell<Address>,
    config: GatewayConfig,
    events: broadcast::Sender<GatewayEvent>,
}

impl<C: LedgerClient> Gateway<C> {
    /// Fails on a config that `GatewayConfig::validate` rejects.
    pub fn new(
        client: Arc<C>,
        identity: Arc<dyn IdentityProvider>,
        config: GatewayConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);

        Ok(Self {
            client,
            identity,
            account: OnceCell::new(),
            config,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// The acting account. Resolved on first use; concurrent first callers
    /// share a single resolution.
    pub async fn account(&self) -> Result<Address, GatewayError> {
        self.account
            .get_or_try_init(|| self.identity.resolve())
            .await
            .cloned()
    }

    async fn timed<T>(
        &self,
        call: &'static str,
        fut: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        let after = self.config.call_timeout;
        tokio::time::timeout(after, fut)
            .await
            .map_err(|_| GatewayError::Timeout { call, after })?
    }

    async fn read<T, F, Fut>(&self, call: &'static str, f: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            match self.timed(call, f()).await {
                Err(e) if e.is_transient() && attempt < self.config.read_retries => {
                    attempt += 1;
                    tracing::warn!(call, attempt, error = %e, "retrying ledger read");
                }
                other => return other,
            }
        }
    }

    async fn read_history(&self, order: &Address) -> Result<Vec<HistoryRecord>, GatewayError> {
        let length = self
            .read("getHistoryLength", || self.client.history_length(order))
            .await?;

        try_join_all((0..length).map(|i| self.read("history", move || self.client.history(order, i))))
            .await
    }

    /// Assemble meta, state and full history into one snapshot. If any read
    /// fails the whole hydration fails.
    pub async fn hydrate(&self, order: &Address) -> Result<Order, GatewayError> {
        let reads = tokio::try_join!(
            self.read("meta", || self.client.meta(order)),
            self.read("state", || self.client.state(order)),
            self.read_history(order),
        );

        match reads {
            Ok((meta, state, history)) => Ok(Order {
                id: order.clone(),
                meta,
                state,
                history,
            }),
            Err(e) => Err(GatewayError::Hydration {
                order: order.clone(),
                source: Box::new(e),
            }),
        }
    }

    async fn hydrate_index(&self, index: u64) -> Result<Order, GatewayError> {
        let address = self.read("orders", || self.client.order_at(index)).await?;
        self.hydrate(&address).await
    }

    /// Hydrate the orders at `[start, min(total, start + page_size))`, in
    /// index order.
    pub async fn list(&self, start: u64, page_size: u64) -> Result<OrderPage, GatewayError> {
        let total = self.read("getAmount", || self.client.amount()).await?;
        if total == 0 {
            return Ok(OrderPage {
                orders: vec![],
                total: 0,
            });
        }

        let end = total.min(start.saturating_add(page_size));
        let orders = try_join_all((start..end).map(|index| async move {
            self.hydrate_index(index)
                .await
                .map_err(|e| GatewayError::Page {
                    index,
                    source: Box::new(e),
                })
        }))
        .await?;

        tracing::debug!(start, end, total, "listed orders");
        Ok(OrderPage { orders, total })
    }

    pub async fn list_default(&self, start: u64) -> Result<OrderPage, GatewayError> {
        self.list(start, self.config.page_size).await
    }

    /// Like [`Gateway::list`], but gives up with `Cancelled` once `token`
    /// fires. A cancelled page is never returned truncated.
    pub async fn list_with_cancel(
        &self,
        start: u64,
        page_size: u64,
        token: &CancellationToken,
    ) -> Result<OrderPage, GatewayError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(GatewayError::Cancelled),
            page = self.list(start, page_size) => page,
        }
    }

    /// Run one lifecycle action as the acting account and return the
    /// refreshed order. Subscribers see the update only on success.
    pub async fn perform_action(
        &self,
        order: &Address,
        action: Action,
    ) -> Result<Order, GatewayError> {
        let caller = self.account().await?;

        // Widens the owner set to the acting account before every action so
        // it can also record locations. This is not an authorization model.
        let owners: [Address; OWNER_SLOTS] = std::array::from_fn(|_| caller.clone());
        self.timed("setOwners", self.client.set_owners(order, owners, &caller))
            .await?;

        self.timed(action.name(), self.client.invoke(order, action, &caller))
            .await?;

        let refreshed = self.hydrate(order).await?;
        if self
            .events
            .send(GatewayEvent::OrderUpdated(refreshed.clone()))
            .is_err()
        {
            tracing::debug!(%order, "no subscribers for order update");
        }

        tracing::info!(%order, %action, %caller, state = ?refreshed.state, "action performed");
        Ok(refreshed)
    }

    /// Dispatch by ledger call name, e.g. `"confirmDelivery"`.
    pub async fn perform_named(&self, order: &Address, action: &str) -> Result<Order, GatewayError> {
        let action: Action = action.parse()?;
        self.perform_action(order, action).await
    }

    /// Fire and log: failures are logged and swallowed, nothing is published.
    pub async fn perform_action_best_effort(&self, order: &Address, action: Action) -> Option<Order> {
        match self.perform_action(order, action).await {
            Ok(order) => Some(order),
            Err(e) => {
                tracing::error!(%order, %action, error = %e, "action failed");
                None
            }
        }
    }

    /// Create an order as the acting account and announce it.
    pub async fn create_order(&self, product: &str, quantity: u64) -> Result<Address, GatewayError> {
        let caller = self.account().await?;
        let product = Bytes32::from_text(product)?;

        let created = self
            .timed("create", self.client.create(product, quantity, &caller))
            .await?;

        if self.events.send(GatewayEvent::NewOrder).is_err() {
            tracing::debug!(order = %created, "no subscribers for new order");
        }

        tracing::info!(order = %created, %product, quantity, "order created");
        Ok(created)
    }

    pub async fn update_location(
        &self,
        order: &Address,
        latitude: &str,
        longitude: &str,
    ) -> Result<(), GatewayError> {
        let caller = self.account().await?;
        let latitude = Bytes32::from_text(latitude)?;
        let longitude = Bytes32::from_text(longitude)?;

        self.timed(
            "updateLocation",
            self.client.update_location(order, latitude, longitude, &caller),
        )
        .await
    }

    pub async fn locations(&self, order: &Address) -> Result<Vec<Location>, GatewayError> {
        let length = self
            .read("getLocationLength", || self.client.location_length(order))
            .await?;

        try_join_all(
            (0..length).map(|i| self.read("locationHistory", move || self.client.location(order, i))),
        )
        .await
    }
}
