//! Error taxonomy and retry classification.
//!
//! Every stage of the pipeline reports failures through [`TshError`]. Each
//! variant maps to one stage so the process boundary can name where an
//! invocation stopped:
//!
//! | Variant | Stage |
//! |---------|-------|
//! | `Usage` | argument parsing |
//! | `Connection` | SSH agent connector |
//! | `LocalStore` | persisted credential store |
//! | `CertificateIssuance` | proxy certificate round-trip |
//! | `NoCommand` | dispatch |
//! | `Operation` | remote operation |
//! | `Authentication` | chain exhausted |
//! | `Interrupted` | termination signal |
//!
//! Transport failures surface as plain strings from `russh` and are
//! classified by [`is_retryable_error`] to decide whether the backoff loop in
//! the client should try again.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the client pipeline.
#[derive(Debug, Error)]
pub enum TshError {
    /// Bad or missing input. Never reaches chain construction.
    #[error("{0}")]
    Usage(String),

    /// The SSH agent endpoint could not be reached.
    #[error("failed to connect to SSH agent at {network}:{address}: {source}")]
    Connection {
        network: String,
        address: String,
        #[source]
        source: io::Error,
    },

    /// The persisted credential store could not be opened or written.
    #[error("local credential store {} unavailable: {reason}", path.display())]
    LocalStore { path: PathBuf, reason: String },

    /// The proxy refused or failed to issue a certificate.
    #[error("certificate issuance via {proxy} failed: {reason}")]
    CertificateIssuance { proxy: String, reason: String },

    /// Dispatch was reached without a selected operation.
    #[error("no command selected")]
    NoCommand,

    /// A remote operation failed; `reason` is its own message.
    #[error("{operation} failed: {reason}")]
    Operation {
        operation: &'static str,
        reason: String,
    },

    /// Every provider in the chain was tried and none was accepted.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The invocation was cancelled by a termination signal.
    #[error("interrupted")]
    Interrupted,
}

impl TshError {
    /// Short name of the stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            TshError::Usage(_) => "usage",
            TshError::Connection { .. } => "agent",
            TshError::LocalStore { .. } => "local-store",
            TshError::CertificateIssuance { .. } => "certificate",
            TshError::NoCommand => "dispatch",
            TshError::Operation { .. } => "operation",
            TshError::Authentication(_) => "authentication",
            TshError::Interrupted => "signal",
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            TshError::Usage(_) => 2,
            TshError::Interrupted => 130,
            _ => 1,
        }
    }

    pub(crate) fn operation(operation: &'static str, reason: impl Into<String>) -> Self {
        TshError::Operation {
            operation,
            reason: reason.into(),
        }
    }
}

/// Authentication error patterns that indicate permanent failures.
///
/// Retrying these would re-prompt the operator or risk locking the account.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "certificate issuance",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
];

/// Connection error patterns that indicate transient failures.
const RETRYABLE_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timeout",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "handshake failed",
    "failed to connect",
    "broken pipe",
];

/// Determines if a transport error is transient and worth retrying.
///
/// Authentication patterns are checked first and take precedence, so
/// "connection timeout during authentication failed" is not retried.
/// Unknown errors are retried unless they look like an SSH protocol error
/// without a timeout/connect hint.
pub(crate) fn is_retryable_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    if AUTH_ERRORS.iter().any(|pattern| error_lower.contains(pattern)) {
        return false;
    }

    if RETRYABLE_ERRORS
        .iter()
        .any(|pattern| error_lower.contains(pattern))
    {
        return true;
    }

    !error_lower.contains("ssh")
        || error_lower.contains("timeout")
        || error_lower.contains("connect")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod taxonomy {
        use super::*;

        #[test]
        fn test_connection_error_names_endpoint_and_cause() {
            let err = TshError::Connection {
                network: "unix".to_string(),
                address: "/tmp/agent.sock".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            };
            let msg = err.to_string();
            assert!(msg.contains("unix:/tmp/agent.sock"));
            assert!(msg.contains("No such file or directory"));
            assert_eq!(err.stage(), "agent");
        }

        #[test]
        fn test_connection_error_keeps_source() {
            use std::error::Error as _;

            let err = TshError::Connection {
                network: "tcp".to_string(),
                address: "127.0.0.1:1".to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            };
            let source = err.source().expect("source is kept");
            assert_eq!(source.to_string(), "refused");
        }

        #[test]
        fn test_local_store_error_is_distinct_from_connection() {
            let err = TshError::LocalStore {
                path: PathBuf::from("/home/alice/.tsh"),
                reason: "permission denied".to_string(),
            };
            assert_eq!(err.stage(), "local-store");
            assert!(err.to_string().contains("/home/alice/.tsh"));
        }

        #[test]
        fn test_certificate_issuance_stage() {
            let err = TshError::CertificateIssuance {
                proxy: "proxy.example.com:3080".to_string(),
                reason: "bad password".to_string(),
            };
            assert_eq!(err.stage(), "certificate");
            assert!(err.to_string().contains("proxy.example.com:3080"));
        }

        #[test]
        fn test_operation_error_passes_reason_verbatim() {
            let err = TshError::operation("upload", "No such file");
            assert_eq!(err.to_string(), "upload failed: No such file");
        }

        #[test]
        fn test_exit_codes() {
            assert_eq!(TshError::Usage("x".into()).exit_code(), 2);
            assert_eq!(TshError::Interrupted.exit_code(), 130);
            assert_eq!(TshError::NoCommand.exit_code(), 1);
        }
    }

    mod auth_errors_not_retryable {
        use super::*;

        #[test]
        fn test_authentication_failed() {
            assert!(!is_retryable_error("Authentication failed"));
            assert!(!is_retryable_error("AUTHENTICATION FAILED"));
        }

        #[test]
        fn test_certificate_issuance() {
            assert!(!is_retryable_error(
                "certificate issuance via proxy:3080 failed: connection refused"
            ));
        }

        #[test]
        fn test_permission_denied() {
            assert!(!is_retryable_error("Permission denied (publickey)"));
        }

        #[test]
        fn test_auth_takes_precedence_over_connection() {
            assert!(!is_retryable_error(
                "Connection timeout during authentication failed"
            ));
        }
    }

    mod connection_errors_retryable {
        use super::*;

        #[test]
        fn test_connection_refused() {
            assert!(is_retryable_error("Connection refused"));
        }

        #[test]
        fn test_timeout() {
            assert!(is_retryable_error("Connection timed out after 30s"));
        }

        #[test]
        fn test_network_unreachable() {
            assert!(is_retryable_error("Network is unreachable"));
        }
    }

    mod unknown_errors {
        use super::*;

        #[test]
        fn test_ssh_protocol_error_not_retried() {
            assert!(!is_retryable_error("SSH protocol error"));
        }

        #[test]
        fn test_ssh_connection_timeout_retried() {
            assert!(is_retryable_error("SSH connection timeout"));
        }

        #[test]
        fn test_generic_error_retried() {
            assert!(is_retryable_error("something odd happened"));
        }
    }
}
