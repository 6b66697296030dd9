//! Error types for the scheduler crate.

use thiserror::Error;

/// Errors that can occur while building or running the scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A plugin named in a profile is not in the registry.
    #[error("Plugin not registered: {0}")]
    PluginNotFound(String),

    /// A plugin factory with the same name is already registered.
    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    /// A plugin is enabled at an extension point it does not implement.
    #[error("Plugin {plugin} does not implement extension point {extension_point}")]
    MissingExtension {
        /// Plugin name.
        plugin: String,
        /// Extension point name.
        extension_point: &'static str,
    },

    /// Plugin arguments could not be decoded.
    #[error("Invalid arguments for plugin {plugin}: {message}")]
    PluginArgs {
        /// Plugin name.
        plugin: String,
        /// Decode failure.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Scheduler cache rejected an operation.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Extender request failed.
    #[error("Extender {url} failed: {message}")]
    Extender {
        /// Extender URL prefix.
        url: String,
        /// Failure detail.
        message: String,
    },

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] kluster_sim_store::StoreError),
}

impl SchedulerError {
    /// Check if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Extender { .. } | Self::Store(_) | Self::Cache(_)
        )
    }
}

/// A specialized Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
