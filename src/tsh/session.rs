//! SSH client handler.
//!
//! `SshClientHandler` is the russh client handler used for every hop (proxy
//! and target). It accepts all host keys, similar to
//! `StrictHostKeyChecking=no` in OpenSSH.

use russh::{client, keys};
use tracing::debug;

/// Client handler for russh that accepts all host keys.
pub struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        // TODO: verify against the proxy's host CA once it is exposed by the web API
        debug!("Accepting server key {:?}", server_public_key.algorithm());
        Ok(true)
    }
}
