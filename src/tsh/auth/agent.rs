//! SSH agent connector and provider.

use std::io;

use async_trait::async_trait;
use russh::client;
use russh::keys::PublicKey;
use russh::keys::agent::client::AgentClient;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::tsh::config::{AgentEndpoint, AgentNetwork};
use crate::tsh::error::TshError;
use crate::tsh::session::SshClientHandler;

use super::traits::AuthStrategy;

/// Open agent connection over the transport named by the endpoint.
pub enum AgentConnection {
    #[cfg(unix)]
    Unix(AgentClient<tokio::net::UnixStream>),
    Tcp(AgentClient<TcpStream>),
}

impl AgentConnection {
    async fn request_identities(&mut self) -> Result<Vec<PublicKey>, russh::keys::Error> {
        match self {
            #[cfg(unix)]
            AgentConnection::Unix(client) => client.request_identities().await,
            AgentConnection::Tcp(client) => client.request_identities().await,
        }
    }
}

/// Open a connection to the SSH agent at `endpoint`.
///
/// No retries happen here. The connection stays open for as long as the
/// returned provider lives and closes when it is dropped.
pub async fn connect_agent(endpoint: &AgentEndpoint) -> Result<AgentAuth, TshError> {
    let connection_error = |source: io::Error| TshError::Connection {
        network: endpoint.network.to_string(),
        address: endpoint.address.clone(),
        source,
    };

    if endpoint.address.is_empty() {
        return Err(connection_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "agent address is empty (set --ssh-agent or SSH_AUTH_SOCK)",
        )));
    }

    let connection = match endpoint.network {
        AgentNetwork::Unix => connect_unix(&endpoint.address)
            .await
            .map_err(connection_error)?,
        AgentNetwork::Tcp => {
            let stream = TcpStream::connect(endpoint.address.as_str())
                .await
                .map_err(connection_error)?;
            AgentConnection::Tcp(AgentClient::connect(stream))
        }
    };

    debug!(
        "Connected to SSH agent at {}:{}",
        endpoint.network, endpoint.address
    );
    Ok(AgentAuth::new(connection, endpoint.clone()))
}

#[cfg(unix)]
async fn connect_unix(address: &str) -> io::Result<AgentConnection> {
    let stream = tokio::net::UnixStream::connect(address).await?;
    Ok(AgentConnection::Unix(AgentClient::connect(stream)))
}

#[cfg(not(unix))]
async fn connect_unix(_address: &str) -> io::Result<AgentConnection> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "unix sockets are not supported on this platform",
    ))
}

/// Credential provider backed by a running SSH agent.
///
/// Tries each identity the agent holds until one is accepted.
pub struct AgentAuth {
    connection: Mutex<AgentConnection>,
    endpoint: AgentEndpoint,
}

impl AgentAuth {
    /// Wrap an already open agent connection.
    pub fn new(connection: AgentConnection, endpoint: AgentEndpoint) -> Self {
        Self {
            connection: Mutex::new(connection),
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &AgentEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl AuthStrategy for AgentAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TshError> {
        let mut connection = self.connection.lock().await;

        let identities = connection.request_identities().await.map_err(|e| {
            TshError::Authentication(format!(
                "failed to list identities from agent {}:{}: {}",
                self.endpoint.network, self.endpoint.address, e
            ))
        })?;

        if identities.is_empty() {
            debug!("SSH agent holds no identities");
            return Ok(false);
        }

        for identity in identities {
            debug!("Trying SSH agent identity: {:?}", identity.comment());

            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();

            let result = match &mut *connection {
                #[cfg(unix)]
                AgentConnection::Unix(agent) => {
                    handle
                        .authenticate_publickey_with(username, identity, hash_alg, agent)
                        .await
                }
                AgentConnection::Tcp(agent) => {
                    handle
                        .authenticate_publickey_with(username, identity, hash_alg, agent)
                        .await
                }
            };

            match result {
                Ok(result) if result.success() => {
                    info!("Authenticated with SSH agent identity");
                    return Ok(true);
                }
                Ok(_) => {
                    debug!("Agent identity not accepted, trying next...");
                }
                Err(e) => {
                    debug!("Agent authentication error: {}, trying next...", e);
                }
            }
        }

        Ok(false)
    }

    fn name(&self) -> &'static str {
        "agent"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::tsh::session::tests::loopback_handle;

    const FAILURE: u8 = 5;
    const REQUEST_IDENTITIES: u8 = 11;
    const IDENTITIES_ANSWER: u8 = 12;

    fn endpoint(network: AgentNetwork, address: &str) -> AgentEndpoint {
        AgentEndpoint {
            network,
            address: address.to_string(),
        }
    }

    /// Provider connected over TCP to an agent that holds no identities.
    pub(crate) async fn empty_agent() -> AgentAuth {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut len = [0u8; 4];
            while stream.read_exact(&mut len).await.is_ok() {
                let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
                if stream.read_exact(&mut body).await.is_err() {
                    break;
                }
                let reply: &[u8] = match body.first() {
                    Some(&REQUEST_IDENTITIES) => &[0, 0, 0, 5, IDENTITIES_ANSWER, 0, 0, 0, 0],
                    _ => &[0, 0, 0, 1, FAILURE],
                };
                if stream.write_all(reply).await.is_err() {
                    break;
                }
            }
        });

        connect_agent(&endpoint(AgentNetwork::Tcp, &address))
            .await
            .unwrap()
    }

    #[test]
    fn test_agent_auth_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AgentAuth>();
    }

    #[allow(dead_code)]
    fn authenticate_future_is_send(
        auth: &AgentAuth,
        handle: &mut client::Handle<SshClientHandler>,
    ) {
        fn assert_send<F: std::future::Future + Send>(_: F) {}
        assert_send(auth.authenticate(handle, "alice"));
    }

    #[tokio::test]
    async fn test_agent_auth_name_and_endpoint() {
        let auth = empty_agent().await;
        assert_eq!(auth.name(), "agent");
        assert_eq!(auth.endpoint().network, AgentNetwork::Tcp);
    }

    #[tokio::test]
    async fn test_boxed_provider_declines_without_identities() {
        let strategy: Box<dyn AuthStrategy> = Box::new(empty_agent().await);
        let mut handle = loopback_handle().await;

        let accepted = strategy.authenticate(&mut handle, "alice").await.unwrap();
        assert!(!accepted);

        // The connection stays usable for the next hop
        let accepted = strategy.authenticate(&mut handle, "alice").await.unwrap();
        assert!(!accepted);
    }

    #[tokio::test]
    async fn test_agent_hang_up_is_authentication_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let auth = connect_agent(&endpoint(AgentNetwork::Tcp, &address))
            .await
            .unwrap();
        let mut handle = loopback_handle().await;

        let err = auth.authenticate(&mut handle, "alice").await.unwrap_err();
        assert_eq!(err.stage(), "authentication");
        assert!(err.to_string().contains(&address));
    }

    #[tokio::test]
    async fn test_empty_address_is_connection_error() {
        let result = connect_agent(&endpoint(AgentNetwork::Unix, "")).await;
        match result {
            Err(TshError::Connection { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidInput);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("empty address must not connect"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_socket_wraps_cause() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");
        let address = path.to_string_lossy().into_owned();

        let result = connect_agent(&endpoint(AgentNetwork::Unix, &address)).await;
        match result {
            Err(err @ TshError::Connection { .. }) => {
                assert!(err.to_string().contains(&address));
                assert_eq!(err.stage(), "agent");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("missing socket must not connect"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connects_to_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let _listener = tokio::net::UnixListener::bind(&path).unwrap();

        let auth = connect_agent(&endpoint(
            AgentNetwork::Unix,
            &path.to_string_lossy(),
        ))
        .await
        .unwrap();
        assert_eq!(auth.endpoint().network, AgentNetwork::Unix);
    }

    #[tokio::test]
    async fn test_connects_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let auth = connect_agent(&endpoint(AgentNetwork::Tcp, &address))
            .await
            .unwrap();
        assert_eq!(auth.endpoint().address, address);
    }

    #[tokio::test]
    async fn test_tcp_refused_is_connection_error() {
        // Bind then drop to obtain a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = connect_agent(&endpoint(AgentNetwork::Tcp, &address)).await;
        assert!(matches!(result, Err(TshError::Connection { .. })));
    }
}
