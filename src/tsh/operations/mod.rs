//! The four remote operations a dispatch can select.
//!
//! [`RemoteOperations`] is the seam between the dispatcher and the
//! transport. [`SshOperations`] is the real implementation; every operation
//! opens its own session, exercising the chain it was handed.

mod servers;
mod shell;
mod transfer;

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::tsh::auth::AuthChain;
use crate::tsh::client;
use crate::tsh::config::TransportSettings;
use crate::tsh::error::TshError;
use crate::tsh::types::{Identity, Target};

pub use servers::{LabelFilter, format_table};
pub use transfer::TransferSummary;

/// Remote operations invoked by the dispatcher.
///
/// Each call receives the chain unchanged and returns its own result, which
/// the dispatcher propagates verbatim.
#[async_trait]
pub trait RemoteOperations: Send + Sync {
    /// Interactive shell, or `command` when given.
    async fn connect(
        &self,
        identity: &Identity,
        target: &Target,
        command: Option<&str>,
        chain: &AuthChain,
    ) -> Result<(), TshError>;

    async fn upload(
        &self,
        identity: &Identity,
        target: &Target,
        local_source: &Path,
        remote_dest: &str,
        chain: &AuthChain,
    ) -> Result<(), TshError>;

    async fn download(
        &self,
        identity: &Identity,
        target: &Target,
        remote_source: &str,
        local_dest: &Path,
        recursive: bool,
        chain: &AuthChain,
    ) -> Result<(), TshError>;

    /// Print the nodes known to `proxy`, filtered by label.
    async fn list_servers(
        &self,
        identity: &Identity,
        proxy: Option<&str>,
        label: Option<&str>,
        value: Option<&str>,
        chain: &AuthChain,
    ) -> Result<(), TshError>;
}

/// Operations carried out over SSH.
#[derive(Debug, Clone, Default)]
pub struct SshOperations {
    transport: TransportSettings,
}

impl SshOperations {
    pub fn new(transport: TransportSettings) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &TransportSettings {
        &self.transport
    }
}

#[async_trait]
impl RemoteOperations for SshOperations {
    async fn connect(
        &self,
        identity: &Identity,
        target: &Target,
        command: Option<&str>,
        chain: &AuthChain,
    ) -> Result<(), TshError> {
        let interactive = command.is_none();
        let session =
            client::open_session("connect", identity, target, chain, &self.transport, interactive)
                .await?;

        let result = match command {
            Some(command) => shell::run_command(&session, command).await,
            None => shell::run_shell(&session).await,
        };
        session.close().await;
        result
    }

    async fn upload(
        &self,
        identity: &Identity,
        target: &Target,
        local_source: &Path,
        remote_dest: &str,
        chain: &AuthChain,
    ) -> Result<(), TshError> {
        transfer::check_upload_source(local_source).await?;
        let session =
            client::open_session("upload", identity, target, chain, &self.transport, false).await?;

        let result = transfer::upload(&session, local_source, remote_dest).await;
        session.close().await;
        let summary = result?;
        info!("Uploaded {}", summary);
        Ok(())
    }

    async fn download(
        &self,
        identity: &Identity,
        target: &Target,
        remote_source: &str,
        local_dest: &Path,
        recursive: bool,
        chain: &AuthChain,
    ) -> Result<(), TshError> {
        let session =
            client::open_session("download", identity, target, chain, &self.transport, false)
                .await?;

        let result = transfer::download(&session, remote_source, local_dest, recursive).await;
        session.close().await;
        let summary = result?;
        info!("Downloaded {}", summary);
        Ok(())
    }

    async fn list_servers(
        &self,
        identity: &Identity,
        proxy: Option<&str>,
        label: Option<&str>,
        value: Option<&str>,
        chain: &AuthChain,
    ) -> Result<(), TshError> {
        let Some(proxy) = proxy.filter(|p| !p.is_empty()) else {
            return Err(TshError::operation(
                "get-servers",
                "a proxy address is required (set --proxy)",
            ));
        };
        let filter =
            LabelFilter::new(label, value).map_err(|e| TshError::operation("get-servers", e))?;

        let session =
            client::open_direct("get-servers", identity, proxy, chain, &self.transport).await?;
        let result = servers::fetch_servers(&session).await;
        session.close().await;
        let servers = result?;

        let matching: Vec<_> = servers.into_iter().filter(|s| filter.matches(s)).collect();
        print!("{}", format_table(&matching));
        Ok(())
    }
}
