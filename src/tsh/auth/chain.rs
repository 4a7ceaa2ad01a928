//! Ordered fallback chain of credential providers.

use async_trait::async_trait;
use russh::client;
use tracing::{debug, warn};

use crate::tsh::config::ChainPolicy;
use crate::tsh::error::TshError;
use crate::tsh::session::SshClientHandler;

use super::traits::AuthStrategy;
use super::{AgentAuth, CertificateAuth, LocalAgentAuth};

/// Read-only chain of providers, tried in order until one is accepted.
///
/// The order is always agent, local store, certificate. The certificate
/// provider is always present and always last since it is the only one that
/// does not depend on pre-existing local state.
pub struct AuthChain {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthChain {
    /// Compose already-constructed providers. Performs no I/O.
    ///
    /// `agent` and `local` are `None` only when a lenient policy dropped
    /// them after their stage failed.
    pub fn assemble(
        agent: Option<AgentAuth>,
        local: Option<LocalAgentAuth>,
        certificate: CertificateAuth,
    ) -> Self {
        let mut strategies: Vec<Box<dyn AuthStrategy>> = Vec::with_capacity(3);
        if let Some(agent) = agent {
            strategies.push(Box::new(agent));
        }
        if let Some(local) = local {
            strategies.push(Box::new(local));
        }
        strategies.push(Box::new(certificate));
        Self { strategies }
    }

    /// Provider names in the order they will be tried.
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl std::fmt::Debug for AuthChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthChain")
            .field("strategies", &self.names())
            .finish()
    }
}

/// Apply `policy` to the outcome of an optional chain stage.
///
/// Strict propagates the failure; lenient logs it and drops the provider.
pub fn admit<T>(policy: ChainPolicy, outcome: Result<T, TshError>) -> Result<Option<T>, TshError> {
    match (outcome, policy) {
        (Ok(provider), _) => Ok(Some(provider)),
        (Err(e), ChainPolicy::Strict) => Err(e),
        (Err(e), ChainPolicy::Lenient) => {
            warn!("Dropping {} provider from the chain: {}", e.stage(), e);
            Ok(None)
        }
    }
}

#[async_trait]
impl AuthStrategy for AuthChain {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TshError> {
        let mut last_error = None;

        for strategy in &self.strategies {
            debug!("Trying credential provider: {}", strategy.name());

            match strategy.authenticate(handle, username).await {
                Ok(true) => {
                    debug!("Authentication succeeded with provider: {}", strategy.name());
                    return Ok(true);
                }
                Ok(false) => {
                    debug!("Provider {} was rejected", strategy.name());
                    last_error = None;
                }
                Err(e) => {
                    debug!("Provider {} failed: {}", strategy.name(), e);
                    last_error = Some(e);
                }
            }
        }

        // The last provider's own failure is the most useful thing to report
        Err(last_error.unwrap_or_else(|| {
            TshError::Authentication(format!(
                "no provider was accepted for {} (tried {})",
                username,
                self.names().join(", ")
            ))
        }))
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}
