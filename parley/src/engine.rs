use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use parley_common::{
    event::{EventDispatcher, EventHandler},
    internal,
    pmode::{MemoryPolicySet, PMode},
};
use parley_delivery::{DeliveryConfig, DeliveryCoordinator};
use parley_store::{ProcessingStateStore, StoreConfig, StoreError};
use serde::Deserialize;
use thiserror::Error;

const CONFIG_ENV: &str = "PARLEY_CONFIG";

fn default_host_name() -> String {
    "localhost".to_string()
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid P-Mode {id}: {reason}")]
    InvalidPMode { id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Engine configuration, read from a RON document
///
/// ```ron
/// Engine (
///     store: Memory(capacity: Some(10000)),
///     delivery: (max_cached_methods: Some(16)),
///     host_name: "gateway.example.com",
///     pmodes: [],
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Engine {
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    delivery: DeliveryConfig,
    /// Used in generated message ids
    #[serde(default = "default_host_name")]
    host_name: String,
    #[serde(alias = "pmode", default)]
    pmodes: Vec<PMode>,
}

impl Engine {
    /// Read the engine configuration from `path`
    ///
    /// # Errors
    /// If the file cannot be read or is not a valid configuration
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;
        Self::from_ron(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
    }

    /// Parse the engine configuration from a RON document
    ///
    /// # Errors
    /// If the document is not a valid configuration
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    pub const fn store_config(&self) -> &StoreConfig {
        &self.store
    }

    pub const fn delivery_config(&self) -> &DeliveryConfig {
        &self.delivery
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn pmodes(&self) -> &[PMode] {
        &self.pmodes
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.host_name.trim().is_empty() {
            return Err(EngineError::Configuration(
                "host_name cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for pmode in &self.pmodes {
            if pmode.id.is_empty() {
                return Err(EngineError::InvalidPMode {
                    id: String::new(),
                    reason: "id cannot be empty".to_string(),
                });
            }
            if !seen.insert(pmode.id.as_str()) {
                return Err(EngineError::InvalidPMode {
                    id: pmode.id.clone(),
                    reason: "defined more than once".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Build every component described by this configuration
    ///
    /// # Errors
    /// If the configuration is invalid or the backing store cannot be
    /// initialised
    pub async fn init(self) -> Result<Gateway, EngineError> {
        self.validate()?;

        let backend = self.store.into_backing_store().await?;
        let store = ProcessingStateStore::new(backend, self.host_name);

        let pmode_count = self.pmodes.len();
        let policies = Arc::new(MemoryPolicySet::from(self.pmodes));
        let events = Arc::new(EventDispatcher::new());

        let coordinator = Arc::new(DeliveryCoordinator::new(
            &self.delivery,
            store.clone(),
            policies.clone(),
            events.clone(),
        ));

        internal!(
            level = INFO,
            "Engine initialised for {} with {pmode_count} P-Modes",
            store.host_name()
        );

        Ok(Gateway {
            store,
            policies,
            events,
            coordinator,
        })
    }
}

/// The running engine
#[derive(Debug, Clone)]
pub struct Gateway {
    store: ProcessingStateStore,
    policies: Arc<MemoryPolicySet>,
    events: Arc<EventDispatcher>,
    coordinator: Arc<DeliveryCoordinator>,
}

impl Gateway {
    pub const fn store(&self) -> &ProcessingStateStore {
        &self.store
    }

    pub const fn policies(&self) -> &Arc<MemoryPolicySet> {
        &self.policies
    }

    pub const fn coordinator(&self) -> &Arc<DeliveryCoordinator> {
        &self.coordinator
    }

    /// Register a handler for lifecycle events
    pub fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        self.events.register(handler);
    }

    /// Release every cached delivery method
    pub fn shutdown(&self) {
        internal!(level = INFO, "Shutting down...");
        self.coordinator.shutdown();
    }
}

/// Find the configuration file using the following precedence:
/// 1. `PARLEY_CONFIG` environment variable
/// 2. ./parley.config.ron (current working directory)
/// 3. /etc/parley/parley.config.ron (system-wide config)
///
/// # Errors
/// If `PARLEY_CONFIG` names a missing file, or no candidate exists
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    locate_config(
        std::env::var(CONFIG_ENV).ok().as_deref(),
        &[
            PathBuf::from("./parley.config.ron"),
            PathBuf::from("/etc/parley/parley.config.ron"),
        ],
    )
}

fn locate_config(env_path: Option<&str>, default_paths: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
