//! SSH transport: connection, retry, authentication and the proxy hop.
//!
//! ## Connection lifecycle
//!
//! 1. **Address parsing**: `host[:port]`, default port 22.
//! 2. **Client configuration**: inactivity timeout, keepalive and
//!    compression preferences.
//! 3. **Connection**: TCP connect bounded by the connect timeout, retried with
//!    exponential backoff and jitter via `backon`.
//! 4. **Authentication**: the [`AuthChain`] is exercised against the handle.
//! 5. **Proxy hop** (optional): after authenticating to the proxy, the
//!    `proxy:<host:port>` subsystem is opened and the target SSH session runs
//!    over that channel. The chain is exercised again for the target.
//!
//! Authentication and certificate failures are never retried, since a retry
//! would prompt the operator again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use russh::{Disconnect, client};
use tracing::{debug, error, info, warn};

use crate::tsh::auth::{AuthChain, AuthStrategy};
use crate::tsh::config::{MAX_RETRY_DELAY, TransportSettings};
use crate::tsh::error::{TshError, is_retryable_error};
use crate::tsh::session::SshClientHandler;
use crate::tsh::types::{Identity, Target};

/// Build russh client configuration.
///
/// `persistent` disables the inactivity timeout, for interactive shells that
/// may sit idle.
pub(crate) fn build_client_config(
    timeout: Duration,
    compress: bool,
    persistent: bool,
) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    let inactivity_timeout = if persistent { None } else { Some(timeout) };

    Arc::new(client::Config {
        inactivity_timeout,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Parse address string into host and port components.
///
/// Uses `rsplit_once` so `[::1]:22` splits on the last colon.
///
/// ```ignore
/// let (host, port) = parse_address("example.com:2222")?;
/// assert_eq!(port, 2222);
///
/// let (_, port) = parse_address("192.168.1.1")?;
/// assert_eq!(port, 22);
/// ```
pub(crate) fn parse_address(address: &str) -> Result<(String, u16), String> {
    if let Some((host, port_str)) = address.rsplit_once(':') {
        let port = port_str
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {}", e))?;
        Ok((host.to_string(), port))
    } else {
        Ok((address.to_string(), 22))
    }
}

/// Name of the proxy subsystem that tunnels to `address`.
pub(crate) fn proxy_subsystem(address: &str) -> Result<String, String> {
    let (host, port) = parse_address(address)?;
    if host.is_empty() {
        return Err(format!("Invalid target address '{}': empty host", address));
    }
    Ok(format!("proxy:{}:{}", host, port))
}

/// An authenticated SSH session, possibly tunnelled through a proxy.
///
/// The proxy handle is held for as long as the target session lives.
pub struct RemoteSession {
    handle: client::Handle<SshClientHandler>,
    proxy: Option<client::Handle<SshClientHandler>>,
}

impl RemoteSession {
    pub fn handle(&self) -> &client::Handle<SshClientHandler> {
        &self.handle
    }

    pub fn is_proxied(&self) -> bool {
        self.proxy.is_some()
    }

    /// Disconnect the target, then the proxy.
    pub async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("Error during disconnect: {}", e);
        }
        if let Some(proxy) = self.proxy
            && let Err(e) = proxy.disconnect(Disconnect::ByApplication, "", "en").await
        {
            debug!("Error during proxy disconnect: {}", e);
        }
    }
}

/// Open an authenticated session to `target` on behalf of `operation`.
pub async fn open_session(
    operation: &'static str,
    identity: &Identity,
    target: &Target,
    chain: &AuthChain,
    settings: &TransportSettings,
    persistent: bool,
) -> Result<RemoteSession, TshError> {
    match target.proxy.as_deref() {
        None => {
            let handle = connect_with_retry(
                operation,
                &target.address,
                identity,
                chain,
                settings,
                persistent,
            )
            .await?;
            Ok(RemoteSession {
                handle,
                proxy: None,
            })
        }
        Some(proxy_address) => {
            let proxy =
                connect_with_retry(operation, proxy_address, identity, chain, settings, true)
                    .await?;
            let handle = connect_through(
                operation,
                &proxy,
                &target.address,
                identity,
                chain,
                settings,
                persistent,
            )
            .await?;
            info!(
                "Connected to {} through proxy {}",
                target.address, proxy_address
            );
            Ok(RemoteSession {
                handle,
                proxy: Some(proxy),
            })
        }
    }
}

/// Open an authenticated session directly to `address` (no hop).
pub async fn open_direct(
    operation: &'static str,
    identity: &Identity,
    address: &str,
    chain: &AuthChain,
    settings: &TransportSettings,
) -> Result<RemoteSession, TshError> {
    let handle = connect_with_retry(operation, address, identity, chain, settings, false).await?;
    Ok(RemoteSession {
        handle,
        proxy: None,
    })
}

/// Connect with retry logic using exponential backoff with jitter.
///
/// Only transient connection errors are retried.
async fn connect_with_retry(
    operation: &'static str,
    address: &str,
    identity: &Identity,
    chain: &AuthChain,
    settings: &TransportSettings,
    persistent: bool,
) -> Result<client::Handle<SshClientHandler>, TshError> {
    parse_address(address).map_err(|e| TshError::operation(operation, e))?;
    let attempt_counter = AtomicU32::new(0);

    let backoff = ExponentialBuilder::default()
        .with_min_delay(settings.retry_delay)
        .with_max_delay(MAX_RETRY_DELAY)
        .with_max_times(settings.max_retries as usize)
        .with_jitter();

    let result = (|| async {
        let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);

        if current_attempt > 0 {
            warn!(
                "SSH connection retry attempt {} to {}@{}",
                current_attempt, identity, address
            );
        }

        connect_and_authenticate(operation, address, identity, chain, settings, persistent).await
    })
    .retry(backoff)
    .when(|e: &TshError| {
        let retryable =
            matches!(e, TshError::Operation { .. }) && is_retryable_error(&e.to_string());
        if !retryable {
            warn!(
                "SSH connection to {}@{} failed with non-retryable error: {}",
                identity, address, e
            );
        }
        retryable
    })
    .notify(|err, dur| {
        warn!("SSH connection failed: {}. Retrying in {:?}", err, dur);
    })
    .await;

    let total_attempts = attempt_counter.load(Ordering::SeqCst);
    let retry_count = total_attempts.saturating_sub(1);

    match result {
        Ok(handle) => {
            if retry_count > 0 {
                info!(
                    "SSH connection to {}@{} succeeded after {} retry attempt(s)",
                    identity, address, retry_count
                );
            }
            Ok(handle)
        }
        Err(e) => {
            error!(
                "SSH connection to {}@{} failed after {} attempt(s). Last error: {}",
                identity, address, total_attempts, e
            );
            Err(e)
        }
    }
}

async fn connect_and_authenticate(
    operation: &'static str,
    address: &str,
    identity: &Identity,
    chain: &AuthChain,
    settings: &TransportSettings,
    persistent: bool,
) -> Result<client::Handle<SshClientHandler>, TshError> {
    let config = build_client_config(settings.connect_timeout, settings.compress, persistent);
    let (host, port) = parse_address(address).map_err(|e| TshError::operation(operation, e))?;

    let connect_future = client::connect(config, (host.as_str(), port), SshClientHandler);
    let mut handle = tokio::time::timeout(settings.connect_timeout, connect_future)
        .await
        .map_err(|_| {
            TshError::operation(
                operation,
                format!(
                    "Connection to {} timed out after {:?}",
                    address, settings.connect_timeout
                ),
            )
        })?
        .map_err(|e| {
            TshError::operation(operation, format!("Failed to connect to {}: {}", address, e))
        })?;

    authenticate(&mut handle, identity, chain).await?;
    Ok(handle)
}

async fn connect_through(
    operation: &'static str,
    proxy: &client::Handle<SshClientHandler>,
    address: &str,
    identity: &Identity,
    chain: &AuthChain,
    settings: &TransportSettings,
    persistent: bool,
) -> Result<client::Handle<SshClientHandler>, TshError> {
    let subsystem = proxy_subsystem(address).map_err(|e| TshError::operation(operation, e))?;

    let channel = proxy.channel_open_session().await.map_err(|e| {
        TshError::operation(operation, format!("Failed to open proxy channel: {}", e))
    })?;
    channel
        .request_subsystem(true, subsystem.as_str())
        .await
        .map_err(|e| {
            TshError::operation(
                operation,
                format!("Proxy refused subsystem {}: {}", subsystem, e),
            )
        })?;
    debug!("Opened proxy subsystem {}", subsystem);

    let config = build_client_config(settings.connect_timeout, settings.compress, persistent);
    let connect_future = client::connect_stream(config, channel.into_stream(), SshClientHandler);
    let mut handle = tokio::time::timeout(settings.connect_timeout, connect_future)
        .await
        .map_err(|_| {
            TshError::operation(
                operation,
                format!("SSH handshake with {} timed out", address),
            )
        })?
        .map_err(|e| {
            TshError::operation(
                operation,
                format!("SSH handshake with {} failed: {}", address, e),
            )
        })?;

    authenticate(&mut handle, identity, chain).await?;
    Ok(handle)
}

async fn authenticate(
    handle: &mut client::Handle<SshClientHandler>,
    identity: &Identity,
    chain: &AuthChain,
) -> Result<(), TshError> {
    if chain.authenticate(handle, identity.as_str()).await? {
        Ok(())
    } else {
        Err(TshError::Authentication(format!(
            "no provider was accepted for {}",
            identity
        )))
    }
}
