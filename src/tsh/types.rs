//! Value types shared across the pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The user name every credential and remote operation is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where a remote operation connects: the node itself, optionally reached
/// through an SSH proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: String,
    pub proxy: Option<String>,
}

impl Target {
    pub fn new(address: impl Into<String>, proxy: Option<String>) -> Self {
        Self {
            address: address.into(),
            proxy: proxy.filter(|p| !p.is_empty()),
        }
    }
}

/// One selected remote operation with its own parameters.
///
/// Built once from parsed arguments and consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    Connect {
        target: Target,
        command: Option<String>,
    },
    Upload {
        target: Target,
        local_source: PathBuf,
        remote_dest: String,
    },
    Download {
        target: Target,
        remote_source: String,
        local_dest: PathBuf,
        recursive: bool,
    },
    ListServers {
        proxy: Option<String>,
        label: Option<String>,
        value: Option<String>,
    },
}

impl OperationRequest {
    /// Name used in logs and operation errors.
    pub fn name(&self) -> &'static str {
        match self {
            OperationRequest::Connect { .. } => "connect",
            OperationRequest::Upload { .. } => "upload",
            OperationRequest::Download { .. } => "download",
            OperationRequest::ListServers { .. } => "get-servers",
        }
    }
}

/// A node as reported by the proxy's server listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub addr: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}
