//! Command-line surface.
//!
//! Every flag is global so it may appear before or after the subcommand.
//! Parsing produces the per-invocation [`Settings`] plus at most one
//! [`OperationRequest`].

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use super::config::{
    AgentEndpoint, AgentNetwork, ChainPolicy, Settings, TransportSettings, parse_login_ttl,
    resolve_store_dir,
};
use super::error::TshError;
use super::types::{Identity, OperationRequest, Target};

#[derive(Parser, Debug)]
#[command(name = "tsh", version, about = "Teleport SSH client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// SSH user name
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Address of the SSH agent
    #[arg(long = "ssh-agent", env = "SSH_AUTH_SOCK", global = true)]
    pub ssh_agent: Option<String>,

    /// Transport used to reach the SSH agent
    #[arg(
        long = "ssh-agent-network",
        value_enum,
        default_value_t = AgentNetwork::Unix,
        global = true
    )]
    pub ssh_agent_network: AgentNetwork,

    /// Web proxy address used to obtain certificates
    #[arg(long = "web-proxy", global = true)]
    pub web_proxy: Option<String>,

    /// Validity of issued certificates (e.g. 10h, 1h30m)
    #[arg(
        long = "login-ttl",
        value_parser = parse_login_ttl,
        default_value = "10h",
        global = true
    )]
    pub login_ttl: Duration,

    /// Whether an unavailable agent or local store aborts the invocation
    #[arg(
        long = "chain-policy",
        value_enum,
        default_value_t = ChainPolicy::Strict,
        global = true
    )]
    pub chain_policy: ChainPolicy,

    /// Local credential store directory (default: $TSH_HOME or ~/.tsh)
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open an interactive session or run a command on a node
    Connect(ConnectArgs),

    /// Copy a local file to a node
    Upload(UploadArgs),

    /// Copy a file or directory from a node
    Download(DownloadArgs),

    /// List nodes known to a proxy
    #[command(name = "get-servers")]
    GetServers(GetServersArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ConnectArgs {
    /// Target node address (host[:port])
    pub address: String,

    /// Proxy to tunnel through
    #[arg(long)]
    pub proxy: Option<String>,

    /// Run this command instead of an interactive shell
    #[arg(long)]
    pub command: Option<String>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct UploadArgs {
    /// Target node address (host[:port])
    pub address: String,

    /// Proxy to tunnel through
    #[arg(long)]
    pub proxy: Option<String>,

    /// Local file to upload
    #[arg(long)]
    pub source: PathBuf,

    /// Remote destination path
    #[arg(long)]
    pub dest: String,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct DownloadArgs {
    /// Target node address (host[:port])
    pub address: String,

    /// Proxy to tunnel through
    #[arg(long)]
    pub proxy: Option<String>,

    /// Remote file or directory
    #[arg(long)]
    pub source: String,

    /// Local destination path
    #[arg(long)]
    pub dest: PathBuf,

    /// Download directories recursively
    #[arg(short = 'r', long = "r")]
    pub recursive: bool,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct GetServersArgs {
    /// Proxy to query
    #[arg(long)]
    pub proxy: Option<String>,

    /// Only list nodes carrying this label
    #[arg(long)]
    pub label: Option<String>,

    /// Regular expression the label value must match
    #[arg(long)]
    pub value: Option<String>,
}

impl Cli {
    /// Tracing filter for the requested verbosity. `RUST_LOG` overrides it.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Freeze the shared flags into [`Settings`] and extract the request.
    pub fn into_parts(
        self,
        transport: TransportSettings,
    ) -> Result<(Settings, Option<OperationRequest>), TshError> {
        let user = self
            .user
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| TshError::Usage("--user is required".to_string()))?;

        let store_dir = resolve_store_dir(self.home).ok_or_else(|| {
            TshError::Usage(
                "cannot locate a home directory for the credential store; set --home or TSH_HOME"
                    .to_string(),
            )
        })?;

        let settings = Settings {
            identity: Identity::new(user),
            agent: AgentEndpoint {
                network: self.ssh_agent_network,
                address: self.ssh_agent.unwrap_or_default(),
            },
            web_proxy: self.web_proxy.filter(|p| !p.is_empty()),
            login_ttl: self.login_ttl,
            chain_policy: self.chain_policy,
            store_dir,
            transport,
        };

        Ok((settings, self.command.map(Command::into_request)))
    }
}

impl Command {
    pub fn into_request(self) -> OperationRequest {
        match self {
            Command::Connect(args) => OperationRequest::Connect {
                target: Target::new(args.address, args.proxy),
                command: args.command,
            },
            Command::Upload(args) => OperationRequest::Upload {
                target: Target::new(args.address, args.proxy),
                local_source: args.source,
                remote_dest: args.dest,
            },
            Command::Download(args) => OperationRequest::Download {
                target: Target::new(args.address, args.proxy),
                remote_source: args.source,
                local_dest: args.dest,
                recursive: args.recursive,
            },
            Command::GetServers(args) => OperationRequest::ListServers {
                proxy: args.proxy,
                label: args.label,
                value: args.value,
            },
        }
    }
}
