//! Command dispatcher.
//!
//! One invocation moves through:
//!
//! ```text
//! Idle -> Parsed -> AuthBuilt -> Dispatched -> Done | Failed
//! ```
//!
//! Bad input leaves the dispatcher in `Idle`. A chain construction failure
//! or a missing command moves it to `Failed` without invoking any
//! operation. Otherwise exactly one operation runs and its result is
//! returned unchanged.

use tracing::{debug, info};

use super::auth::{
    AuthChain, CertificateAuth, LocalAgentAuth, admit, connect_agent, password_from_console,
};
use super::cli::Cli;
use super::config::{Settings, TransportSettings};
use super::error::TshError;
use super::operations::RemoteOperations;
use super::store::LocalKeyStore;
use super::types::{Identity, OperationRequest};

/// Where the dispatcher is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Parsed,
    AuthBuilt,
    Dispatched,
    Done,
    Failed,
}

/// Drives one invocation from parsed arguments to a single remote operation.
pub struct Dispatcher<'a, O: RemoteOperations + ?Sized> {
    operations: &'a O,
    state: DispatchState,
}

impl<'a, O: RemoteOperations + ?Sized> Dispatcher<'a, O> {
    pub fn new(operations: &'a O) -> Self {
        Self {
            operations,
            state: DispatchState::Idle,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    fn transition(&mut self, next: DispatchState) {
        debug!("Dispatcher {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run the whole invocation.
    pub async fn run(&mut self, cli: Cli, transport: TransportSettings) -> Result<(), TshError> {
        let (settings, request) = cli.into_parts(transport)?;
        self.transition(DispatchState::Parsed);

        let chain = match build_chain(&settings).await {
            Ok(chain) => chain,
            Err(e) => {
                self.transition(DispatchState::Failed);
                return Err(e);
            }
        };
        self.transition(DispatchState::AuthBuilt);
        debug!("Authentication chain: {:?}", chain);

        let Some(request) = request else {
            self.transition(DispatchState::Failed);
            return Err(TshError::NoCommand);
        };

        self.transition(DispatchState::Dispatched);
        let name = request.name();
        let result = dispatch(self.operations, &settings.identity, request, &chain).await;

        match &result {
            Ok(()) => {
                info!("{} completed", name);
                self.transition(DispatchState::Done);
            }
            Err(e) => {
                debug!("{} failed: {}", name, e);
                self.transition(DispatchState::Failed);
            }
        }
        result
    }
}

/// Assemble the chain in order: agent, local store, certificate.
///
/// Under the strict policy any failure aborts immediately; resources
/// acquired by earlier stages are released when this returns.
pub async fn build_chain(settings: &Settings) -> Result<AuthChain, TshError> {
    let policy = settings.chain_policy;

    let agent = admit(policy, connect_agent(&settings.agent).await)?;

    let store = admit(policy, LocalKeyStore::open(&settings.store_dir).await)?;
    let local = match &store {
        Some(store) => admit(policy, LocalAgentAuth::load(store).await)?,
        None => None,
    };

    let prompt = password_from_console(&settings.identity);
    let certificate = CertificateAuth::new(
        store,
        settings.identity.clone(),
        Box::new(prompt),
        settings.web_proxy.clone(),
        settings.login_ttl,
    )
    .with_timeout(settings.transport.proxy_timeout);

    Ok(AuthChain::assemble(agent, local, certificate))
}

/// Invoke the one operation `request` selects.
pub async fn dispatch<O: RemoteOperations + ?Sized>(
    operations: &O,
    identity: &Identity,
    request: OperationRequest,
    chain: &AuthChain,
) -> Result<(), TshError> {
    match request {
        OperationRequest::Connect { target, command } => {
            operations
                .connect(identity, &target, command.as_deref(), chain)
                .await
        }
        OperationRequest::Upload {
            target,
            local_source,
            remote_dest,
        } => {
            operations
                .upload(identity, &target, &local_source, &remote_dest, chain)
                .await
        }
        OperationRequest::Download {
            target,
            remote_source,
            local_dest,
            recursive,
        } => {
            operations
                .download(identity, &target, &remote_source, &local_dest, recursive, chain)
                .await
        }
        OperationRequest::ListServers {
            proxy,
            label,
            value,
        } => {
            operations
                .list_servers(
                    identity,
                    proxy.as_deref(),
                    label.as_deref(),
                    value.as_deref(),
                    chain,
                )
                .await
        }
    }
}
