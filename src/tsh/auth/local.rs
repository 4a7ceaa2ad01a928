//! Provider backed by the persisted local credential store.

use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::{debug, info};

use crate::tsh::error::TshError;
use crate::tsh::session::SshClientHandler;
use crate::tsh::store::{LocalKeyStore, StoredKey};

use super::traits::AuthStrategy;

/// Agent-like provider holding the credentials loaded from the local store.
///
/// Certificates are offered first for keys that have one; bare keys are
/// offered as plain public keys.
pub struct LocalAgentAuth {
    keys: Vec<StoredKey>,
}

impl LocalAgentAuth {
    /// Load every usable credential from `store`.
    pub async fn load(store: &LocalKeyStore) -> Result<Self, TshError> {
        let keys = store.load().await?;
        debug!(
            "Loaded {} credential(s) from {}",
            keys.len(),
            store.dir().display()
        );
        Ok(Self { keys })
    }

    pub fn from_keys(keys: Vec<StoredKey>) -> Self {
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl AuthStrategy for LocalAgentAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TshError> {
        for stored in &self.keys {
            let result = match &stored.certificate {
                Some(cert) => {
                    debug!("Trying stored certificate '{}'", stored.name);
                    handle
                        .authenticate_openssh_cert(username, Arc::clone(&stored.key), cert.clone())
                        .await
                }
                None => {
                    debug!("Trying stored key '{}'", stored.name);
                    let hash_alg = handle
                        .best_supported_rsa_hash()
                        .await
                        .ok()
                        .flatten()
                        .flatten();
                    let key = keys::PrivateKeyWithHashAlg::new(Arc::clone(&stored.key), hash_alg);
                    handle.authenticate_publickey(username, key).await
                }
            };

            match result {
                Ok(outcome) if outcome.success() => {
                    info!("Authenticated with stored credential '{}'", stored.name);
                    return Ok(true);
                }
                Ok(_) => debug!("Stored credential '{}' not accepted", stored.name),
                Err(e) => debug!("Stored credential '{}' failed: {}", stored.name, e),
            }
        }

        Ok(false)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
