use crate::access::Role;
use crate::types::{Address, OrderState};
use std::time::Duration;

/// Rejections raised by a ledger or the registry hosting it. None of these
/// leave a partial mutation behind.
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("{caller} is not authorised to act as {required}")]
    Unauthorized { required: Role, caller: Address },
    #[error("{caller} is neither the farmer nor the auditor of this order")]
    NotFarmerOrAuditor { caller: Address },
    #[error("{caller} is not in the owner set of this order")]
    NotOwner { caller: Address },
    #[error("Order is {actual:?}, call requires {expected}")]
    InvalidState {
        expected: &'static str,
        actual: OrderState,
    },
    #[error("Registry index {index} is out of range, {count} orders recorded")]
    IndexOutOfRange { index: u64, count: u64 },
    #[error("No order ledger at {0}")]
    UnknownOrder(Address),
    #[error("Role addresses must be distinct, {0} holds more than one role")]
    OverlappingRoles(Address),
    #[error("'{0}' is not a valid address")]
    InvalidAddress(String),
    #[error("Symbol is {0} bytes, at most 32 fit")]
    SymbolTooLong(usize),
    #[error("Unknown order state {0}")]
    UnknownState(u8),
    #[error("Unknown ledger action '{0}'")]
    UnknownAction(String),
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode ledger record: {0}")]
    Encoding(String),
    #[error("Failed to decode ledger record: {0}")]
    Decoding(#[from] minicbor::decode::Error),
}

impl LedgerError {
    /// Authorization failures: role mismatch or owner set membership.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::NotFarmerOrAuditor { .. } | Self::NotOwner { .. }
        )
    }
}

impl From<sled::transaction::TransactionError<LedgerError>> for LedgerError {
    fn from(value: sled::transaction::TransactionError<LedgerError>) -> Self {
        match value {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => Self::Storage(e),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Ledger rejected the call: {0}")]
    Rejected(#[from] LedgerError),
    #[error("Transport failure during {call}: {reason}")]
    Transport { call: &'static str, reason: String },
    #[error("{call} did not answer within {after:?}")]
    Timeout { call: &'static str, after: Duration },
    #[error("Failed to hydrate order {order}: {source}")]
    Hydration {
        order: Address,
        #[source]
        source: Box<GatewayError>,
    },
    #[error("Page entry {index} failed: {source}")]
    Page {
        index: u64,
        #[source]
        source: Box<GatewayError>,
    },
    #[error("Page fetch was cancelled")]
    Cancelled,
    #[error("Could not resolve the acting account: {0}")]
    Identity(String),
}

impl GatewayError {
    /// Transport and timeout failures may succeed on a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("No registry deployed on network {0}")]
    UnknownNetwork(String),
    #[error("Neither REGISTRY_ADDRESS nor a network table was provided")]
    MissingRegistry,
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("Role address {0} is not set")]
    MissingRole(&'static str),
    #[error("Malformed registry artifact: {0}")]
    Artifact(#[from] serde_json::Error),
    #[error("Failed to read registry artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
