//! Configuration management for verdant.
//!
//! This module provides a unified configuration system that separates
//! secrets (from environment variables) from settings (from TOML files).
//!
//! # Configuration Sources
//!
//! ## Secrets (Environment Variables)
//! - `CHROMA_API_KEY` - Chroma API token
//! - `CHROMA_TENANT` - Chroma tenant
//! - `CHROMA_DATABASE` - Chroma database
//!
//! ## Settings (TOML File)
//! Located at `~/.config/verdant/config.toml`:
//! ```toml
//! [knowledge]
//! backend = "chroma"
//! collection = "plant_care_knowledge"
//! fallback_to_local = true
//!
//! [knowledge.ingest]
//! chunk_size = 10
//!
//! [logging]
//! level = "info"
//! ```

pub mod knowledge;
mod secrets;
mod settings;

pub use knowledge::{IngestDefaults, KnowledgeSettings, RetrievalDefaults};
pub use secrets::{ChromaCredentials, Secrets, SecretsError};
pub use settings::{
    IngestSection, KnowledgeBackend, KnowledgeSection, LoggingSettings, SearchSection, Settings,
    SettingsError,
};

/// Combined configuration containing both secrets and settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secrets loaded from environment variables
    pub secrets: Secrets,
    /// Settings loaded from TOML configuration file
    pub settings: Settings,
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Secrets error: {0}")]
    Secrets(#[from] SecretsError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Knowledge collection name is empty")]
    CollectionNotSet,
}

impl Config {
    /// Load configuration from all sources and validate it for the
    /// selected knowledge backend.
    pub fn load() -> Result<Self, ConfigError> {
        let secrets = Secrets::from_env();
        let settings = Settings::load()?;
        Self::from_parts(secrets, settings)
    }

    /// Validate an already assembled secrets/settings pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote backend is selected and either the
    /// collection name or one of the Chroma credentials is missing.
    pub fn from_parts(secrets: Secrets, settings: Settings) -> Result<Self, ConfigError> {
        let config = Self { secrets, settings };
        if config.settings.knowledge.backend == KnowledgeBackend::Chroma {
            if config.knowledge_settings().collection.is_empty() {
                return Err(ConfigError::CollectionNotSet);
            }
            config.secrets.chroma_credentials()?;
        }
        Ok(config)
    }

    /// Resolved knowledge settings with defaults filled in.
    pub fn knowledge_settings(&self) -> KnowledgeSettings {
        KnowledgeSettings::from(&self.settings.knowledge)
    }

    /// Chroma credentials, if all of them are configured.
    pub fn chroma_credentials(&self) -> Option<ChromaCredentials> {
        self.secrets.chroma_credentials().ok()
    }

    /// Configured log level.
    pub fn log_level(&self) -> &str {
        &self.settings.logging.level
    }
}
