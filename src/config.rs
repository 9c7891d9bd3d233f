//! Gateway configuration, read from the environment
use super::access::RoleBook;
use super::error::ConfigError;
use super::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Ledger store endpoint, `sled://<path>` or a bare path
    pub endpoint: String,
    /// Selects the registry from the artifact's network table
    pub network_id: String,
    /// Explicit registry address, wins over the network table
    pub registry_address: Option<Address>,
    /// Deployment artifact carrying `networks.<id>.address`
    pub artifact_path: Option<PathBuf>,
    /// Upper bound for a single remote call
    pub call_timeout: Duration,
    /// Extra attempts for reads that fail with a transient error
    pub read_retries: u32,
    pub page_size: u64,
    pub event_capacity: usize,
}

/// Per network registry deployments.
#[derive(Debug, Clone, Default)]
pub struct NetworkTable(HashMap<String, Address>);

#[derive(Deserialize)]
struct Artifact {
    #[serde(default)]
    networks: HashMap<String, Deployment>,
}

#[derive(Deserialize)]
struct Deployment {
    address: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: "sled://ledger-data".to_string(),
            network_id: "5777".to_string(),
            registry_address: None,
            artifact_path: None,
            call_timeout: Duration::from_millis(5_000),
            read_retries: 2,
            page_size: 20,
            event_capacity: 64,
        }
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let registry_address = match lookup("REGISTRY_ADDRESS") {
            Some(raw) => Some(Address::parse(&raw)?),
            None => None,
        };

        let config = Self {
            endpoint: lookup("LEDGER_ENDPOINT").unwrap_or(defaults.endpoint),
            network_id: lookup("LEDGER_NETWORK_ID").unwrap_or(defaults.network_id),
            registry_address,
            artifact_path: lookup("REGISTRY_ARTIFACT").map(PathBuf::from),
            call_timeout: Duration::from_millis(parsed(
                &lookup,
                "LEDGER_CALL_TIMEOUT_MS",
                defaults.call_timeout.as_millis() as u64,
            )?),
            read_retries: parsed(&lookup, "LEDGER_READ_RETRIES", defaults.read_retries)?,
            page_size: parsed(&lookup, "GATEWAY_PAGE_SIZE", defaults.page_size)?,
            event_capacity: parsed(&lookup, "GATEWAY_EVENT_CAPACITY", defaults.event_capacity)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "LEDGER_CALL_TIMEOUT_MS",
                reason: "call timeout cannot be 0".into(),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "GATEWAY_PAGE_SIZE",
                reason: "page size cannot be 0".into(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "GATEWAY_EVENT_CAPACITY",
                reason: "event capacity cannot be 0".into(),
            });
        }
        Ok(())
    }

    /// The explicit address if one is set, otherwise the artifact entry for
    /// `network_id`.
    pub fn resolve_registry(&self) -> Result<Address, ConfigError> {
        if let Some(address) = &self.registry_address {
            return Ok(address.clone());
        }

        let path = self.artifact_path.as_ref().ok_or(ConfigError::MissingRegistry)?;
        let table = NetworkTable::load(path)?;

        Ok(table.lookup(&self.network_id)?.clone())
    }
}

impl NetworkTable {
    pub fn from_artifact(json: &str) -> Result<Self, ConfigError> {
        let artifact: Artifact = serde_json::from_str(json)?;

        let mut table = HashMap::with_capacity(artifact.networks.len());
        for (network, deployment) in artifact.networks {
            table.insert(network, Address::parse(&deployment.address)?);
        }

        Ok(Self(table))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_artifact(&std::fs::read_to_string(path)?)
    }

    pub fn lookup(&self, network_id: &str) -> Result<&Address, ConfigError> {
        self.0
            .get(network_id)
            .ok_or_else(|| ConfigError::UnknownNetwork(network_id.to_string()))
    }
}

/// Role holders from `ROLE_FARMER`, `ROLE_AUDITOR`, `ROLE_WAREHOUSE`,
/// `ROLE_DISTRIBUTOR` and `ROLE_SUPERMARKET`.
pub fn roles_from_env() -> Result<RoleBook, ConfigError> {
    roles_from_lookup(|key| std::env::var(key).ok())
}

pub fn roles_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<RoleBook, ConfigError> {
    let role = |key: &'static str| -> Result<Address, ConfigError> {
        let raw = lookup(key).ok_or(ConfigError::MissingRole(key))?;
        Ok(Address::parse(&raw)?)
    };

    Ok(RoleBook::new(
        role("ROLE_FARMER")?,
        role("ROLE_AUDITOR")?,
        role("ROLE_WAREHOUSE")?,
        role("ROLE_DISTRIBUTOR")?,
        role("ROLE_SUPERMARKET")?,
    )?)
}
