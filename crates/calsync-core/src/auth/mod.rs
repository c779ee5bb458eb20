//! OAuth credential lifecycle.

pub mod credential_store;
pub mod token_manager;

pub use credential_store::{
    Credential, CredentialStore, FileCredentialStore, KeyringCredentialStore,
    MemoryCredentialStore,
};
pub use token_manager::{
    OAuthClientConfig, RefreshGuards, TokenManager, TokenStatus, UserInfo,
};

use std::sync::Arc;

use crate::error::CoreError;
use crate::storage::{data_dir, Config, CredentialBackend};

/// Credential store selected by `sync.credential_backend`.
pub fn credential_store_for(config: &Config) -> Result<Arc<dyn CredentialStore>, CoreError> {
    Ok(match config.sync.credential_backend {
        CredentialBackend::File => {
            let file = format!("{}_token.json", config.google.account);
            Arc::new(FileCredentialStore::new(data_dir()?.join(file)))
        }
        CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::new(&config.google.account)),
    })
}

/// Token manager for the configured Google account.
pub fn token_manager_for(config: &Config) -> Result<TokenManager, CoreError> {
    let store = credential_store_for(config)?;
    Ok(TokenManager::new(
        OAuthClientConfig::google(&config.google),
        store,
        config.google.account.clone(),
        config.sync.request_timeout(),
    )?)
}
