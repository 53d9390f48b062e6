pub mod config;

pub use config::{
    ChromaCredentials, Config, ConfigError, IngestDefaults, KnowledgeBackend, KnowledgeSection,
    KnowledgeSettings, LoggingSettings, RetrievalDefaults, Secrets, Settings, SettingsError,
};
