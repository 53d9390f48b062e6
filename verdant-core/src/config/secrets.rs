//! Secrets configuration loaded from environment variables only.
//!
//! Credentials for the remote vector database are never stored in the
//! settings file. All of them are optional at load time; `Config::load`
//! decides which ones are required for the selected backend.

use std::env;

/// Secrets loaded exclusively from environment variables.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// Chroma API token (env: CHROMA_API_KEY)
    pub chroma_api_key: Option<String>,

    /// Chroma tenant (env: CHROMA_TENANT)
    pub chroma_tenant: Option<String>,

    /// Chroma database (env: CHROMA_DATABASE)
    pub chroma_database: Option<String>,
}

/// Resolved credentials for the remote vector store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromaCredentials {
    pub api_key: String,
    pub tenant: String,
    pub database: String,
}

/// Errors that can occur when loading secrets
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Missing required secret: {0}")]
    MissingSecret(&'static str),
}

impl Secrets {
    /// Load secrets from environment variables.
    ///
    /// This function also loads .env file if present (for development),
    /// but production should rely on actual environment variables.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self::from_env_inner()
    }

    /// Internal method to load from environment without loading .env
    pub(crate) fn from_env_inner() -> Self {
        Self {
            chroma_api_key: non_empty_var("CHROMA_API_KEY"),
            chroma_tenant: non_empty_var("CHROMA_TENANT"),
            chroma_database: non_empty_var("CHROMA_DATABASE"),
        }
    }

    /// Resolve the full credential set, failing on the first missing value.
    pub fn chroma_credentials(&self) -> Result<ChromaCredentials, SecretsError> {
        Ok(ChromaCredentials {
            api_key: self
                .chroma_api_key
                .clone()
                .ok_or(SecretsError::MissingSecret("CHROMA_API_KEY"))?,
            tenant: self
                .chroma_tenant
                .clone()
                .ok_or(SecretsError::MissingSecret("CHROMA_TENANT"))?,
            database: self
                .chroma_database
                .clone()
                .ok_or(SecretsError::MissingSecret("CHROMA_DATABASE"))?,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests that touch the process environment must not run concurrently
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        unsafe {
            env::remove_var("CHROMA_API_KEY");
            env::remove_var("CHROMA_TENANT");
            env::remove_var("CHROMA_DATABASE");
        }
    }

    #[test]
    fn test_secrets_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("CHROMA_API_KEY", "ck-test");
            env::set_var("CHROMA_TENANT", "tenant");
            env::set_var("CHROMA_DATABASE", "plants");
        }

        let secrets = Secrets::from_env_inner();
        let creds = secrets.chroma_credentials().unwrap();
        assert_eq!(creds.api_key, "ck-test");
        assert_eq!(creds.tenant, "tenant");
        assert_eq!(creds.database, "plants");
        clear_env();
    }

    #[test]
    fn test_blank_secret_is_missing() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("CHROMA_API_KEY", "   ");
        }

        let secrets = Secrets::from_env_inner();
        assert!(secrets.chroma_api_key.is_none());
        let err = secrets.chroma_credentials().unwrap_err();
        assert!(matches!(err, SecretsError::MissingSecret("CHROMA_API_KEY")));
        clear_env();
    }
}
