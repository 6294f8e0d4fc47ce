#![forbid(unsafe_code)]

pub mod config;

use snowops_os::{ContractService, SystemClock};
use snowops_storage::{CallContext, SqliteContractStore, StorageError};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub use config::AdapterConfig;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("contract store: {0}")]
    Storage(#[from] StorageError),
    #[error("tracing setup: {detail}")]
    Tracing { detail: String },
}

/// Installs the process-wide subscriber. A filter that fails to parse falls
/// back to `info`.
pub fn init_tracing(filter: &str) -> Result<(), AdapterError> {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| AdapterError::Tracing {
            detail: e.to_string(),
        })
}

pub fn open_store(config: &AdapterConfig) -> Result<SqliteContractStore, AdapterError> {
    let store = if config.is_in_memory() {
        SqliteContractStore::in_memory()?
    } else {
        SqliteContractStore::open(&config.db_path, config.db_busy_timeout())?
    };
    info!(
        db_path = %config.db_path,
        busy_timeout_ms = config.db_busy_timeout_ms,
        "contract store opened"
    );
    Ok(store)
}

pub type SnowopsContractService = ContractService<SqliteContractStore, SystemClock>;

/// The contract service wired to its SQLite store and the process config.
pub struct AdapterRuntime {
    config: AdapterConfig,
    service: SnowopsContractService,
}

impl AdapterRuntime {
    pub fn from_config(config: AdapterConfig) -> Result<Self, AdapterError> {
        let store = open_store(&config)?;
        Ok(Self {
            config,
            service: ContractService::new(store, SystemClock),
        })
    }

    pub fn default_from_env() -> Result<Self, AdapterError> {
        Self::from_config(AdapterConfig::from_env())
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn service(&self) -> &SnowopsContractService {
        &self.service
    }

    /// Fresh per-request context bounded by the configured request timeout.
    pub fn call_context(&self) -> CallContext {
        CallContext::with_timeout(self.config.request_timeout())
    }
}
