//! Credential provider trait definition.
//!
//! A provider is built once per invocation (the cheap, side-effect-free
//! descriptor) and exercised later by the transport through
//! [`AuthStrategy::authenticate`].

use async_trait::async_trait;
use russh::client;

use crate::tsh::error::TshError;
use crate::tsh::session::SshClientHandler;

/// Trait for SSH credential providers.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate with the SSH server.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - Credentials rejected, the next provider should be tried
    /// * `Err(error)` - The provider could not be exercised at all
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TshError>;

    /// Name of this provider, used for logging.
    fn name(&self) -> &'static str;
}
