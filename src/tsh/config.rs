//! Configuration resolution for the client.
//!
//! Transport tunables use a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TSH_CONNECT_TIMEOUT` | 30s | Connection timeout in seconds |
//! | `TSH_MAX_RETRIES` | 3 | Maximum retry attempts |
//! | `TSH_RETRY_DELAY_MS` | 1000ms | Initial retry delay in milliseconds |
//! | `TSH_COMPRESSION` | true | Enable zlib compression |
//! | `TSH_PROXY_TIMEOUT` | 30s | Certificate issuance round-trip timeout |
//! | `TSH_HOME` | `~/.tsh` | Local credential store directory |
//!
//! Per-invocation values (identity, agent endpoint, proxy, login TTL, chain
//! policy) come from the command line and are frozen into [`Settings`].

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use super::types::Identity;

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default maximum retry attempts for SSH connection
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry delay in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default timeout for the certificate round-trip to the web proxy
pub(crate) const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 30;

/// Maximum retry delay cap
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Default validity of a proxy-issued certificate
pub const DEFAULT_LOGIN_TTL: Duration = Duration::from_secs(10 * 60 * 60);

/// Directory name of the local credential store under the home directory
pub(crate) const STORE_DIR_NAME: &str = ".tsh";

pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "TSH_CONNECT_TIMEOUT";
pub(crate) const MAX_RETRIES_ENV_VAR: &str = "TSH_MAX_RETRIES";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "TSH_RETRY_DELAY_MS";
pub(crate) const COMPRESSION_ENV_VAR: &str = "TSH_COMPRESSION";
pub(crate) const PROXY_TIMEOUT_ENV_VAR: &str = "TSH_PROXY_TIMEOUT";
pub(crate) const HOME_ENV_VAR: &str = "TSH_HOME";

/// Transport family used to reach the SSH agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AgentNetwork {
    /// Unix domain socket (`SSH_AUTH_SOCK`)
    Unix,
    /// TCP `host:port`
    Tcp,
}

impl fmt::Display for AgentNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentNetwork::Unix => write!(f, "unix"),
            AgentNetwork::Tcp => write!(f, "tcp"),
        }
    }
}

/// Where the SSH agent lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    pub network: AgentNetwork,
    pub address: String,
}

/// What to do when the agent or the local store is unavailable while the
/// chain is being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ChainPolicy {
    /// Abort chain construction on the first failing source.
    #[default]
    Strict,
    /// Drop the failing source and keep building; the certificate provider
    /// is always kept.
    Lenient,
}

/// Knobs for the SSH transport and the proxy round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub compress: bool,
    pub proxy_timeout: Duration,
}

impl TransportSettings {
    /// Resolve every tunable from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            connect_timeout: Duration::from_secs(resolve_connect_timeout(None)),
            max_retries: resolve_max_retries(None),
            retry_delay: Duration::from_millis(resolve_retry_delay_ms(None)),
            compress: resolve_compression(None),
            proxy_timeout: Duration::from_secs(resolve_proxy_timeout(None)),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            compress: true,
            proxy_timeout: Duration::from_secs(DEFAULT_PROXY_TIMEOUT_SECS),
        }
    }
}

/// Immutable per-invocation configuration shared by every command variant.
#[derive(Debug, Clone)]
pub struct Settings {
    pub identity: Identity,
    pub agent: AgentEndpoint,
    pub web_proxy: Option<String>,
    pub login_ttl: Duration,
    pub chain_policy: ChainPolicy,
    pub store_dir: PathBuf,
    pub transport: TransportSettings,
}

fn resolve_u64(param: Option<u64>, env_var: &str, default: u64) -> u64 {
    if let Some(value) = param {
        return value;
    }

    if let Ok(raw) = env::var(env_var)
        && let Ok(value) = raw.parse::<u64>()
    {
        return value;
    }

    default
}

/// Resolve the connection timeout value with priority: parameter -> env var -> default
pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    resolve_u64(
        timeout_param,
        CONNECT_TIMEOUT_ENV_VAR,
        DEFAULT_CONNECT_TIMEOUT_SECS,
    )
}

/// Resolve the proxy round-trip timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_proxy_timeout(timeout_param: Option<u64>) -> u64 {
    resolve_u64(
        timeout_param,
        PROXY_TIMEOUT_ENV_VAR,
        DEFAULT_PROXY_TIMEOUT_SECS,
    )
}

/// Resolve the retry delay value with priority: parameter -> env var -> default
pub(crate) fn resolve_retry_delay_ms(retry_delay_param: Option<u64>) -> u64 {
    resolve_u64(
        retry_delay_param,
        RETRY_DELAY_MS_ENV_VAR,
        DEFAULT_RETRY_DELAY_MS,
    )
}

/// Resolve the max retries value with priority: parameter -> env var -> default
pub(crate) fn resolve_max_retries(max_retries_param: Option<u32>) -> u32 {
    if let Some(max_retries) = max_retries_param {
        return max_retries;
    }

    if let Ok(env_retries) = env::var(MAX_RETRIES_ENV_VAR)
        && let Ok(retries) = env_retries.parse::<u32>()
    {
        return retries;
    }

    DEFAULT_MAX_RETRIES
}

/// Resolve the compression setting with priority: parameter -> env var -> default (true)
pub(crate) fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}

/// Resolve the local credential store directory: parameter -> `TSH_HOME` -> `~/.tsh`.
///
/// Returns `None` only when no parameter, no env var and no home directory
/// are available.
pub(crate) fn resolve_store_dir(dir_param: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(dir) = dir_param {
        return Some(dir);
    }

    if let Ok(dir) = env::var(HOME_ENV_VAR)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }

    dirs::home_dir().map(|home| home.join(STORE_DIR_NAME))
}

/// Parse a Go-style duration such as `10h`, `1h30m`, `45s` or `500ms`.
///
/// Units: `h`, `m`, `s`, `ms`. Fractions are not accepted. The result must
/// be strictly positive.
pub fn parse_login_ttl(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = input;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration '{}'", input))?;
        if digits_end == 0 {
            return Err(format!("invalid duration '{}'", input));
        }
        let value: u64 = rest[..digits_end]
            .parse()
            .map_err(|e| format!("invalid duration '{}': {}", input, e))?;
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        let part = match unit {
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "s" => Some(Duration::from_secs(value)),
            "ms" => Some(Duration::from_millis(value)),
            other => return Err(format!("unknown unit '{}' in duration '{}'", other, input)),
        }
        .ok_or_else(|| format!("duration '{}' is too large", input))?;

        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration '{}' is too large", input))?;
    }

    if total.is_zero() {
        return Err(format!("duration '{}' must be positive", input));
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Serialise env var tests to avoid races between threads
    static ENV_TEST_MUTEX: once_cell::sync::Lazy<StdMutex<()>> =
        once_cell::sync::Lazy::new(|| StdMutex::new(()));

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    unsafe fn set_env(key: &str, value: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::set_var(key, value) };
    }

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    unsafe fn remove_env(key: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::remove_var(key) };
    }

    mod login_ttl {
        use super::*;

        #[test]
        fn test_default_ten_hours() {
            assert_eq!(parse_login_ttl("10h").unwrap(), DEFAULT_LOGIN_TTL);
            assert_eq!(DEFAULT_LOGIN_TTL, Duration::from_secs(36_000));
        }

        #[test]
        fn test_compound_duration() {
            assert_eq!(
                parse_login_ttl("1h30m").unwrap(),
                Duration::from_secs(5400)
            );
            assert_eq!(
                parse_login_ttl("2m15s").unwrap(),
                Duration::from_secs(135)
            );
        }

        #[test]
        fn test_milliseconds() {
            assert_eq!(parse_login_ttl("500ms").unwrap(), Duration::from_millis(500));
        }

        #[test]
        fn test_rejects_missing_unit() {
            assert!(parse_login_ttl("10").is_err());
        }

        #[test]
        fn test_rejects_unknown_unit() {
            let err = parse_login_ttl("3d").unwrap_err();
            assert!(err.contains("unknown unit"));
        }

        #[test]
        fn test_rejects_zero_and_empty() {
            assert!(parse_login_ttl("0h").is_err());
            assert!(parse_login_ttl("").is_err());
            assert!(parse_login_ttl("h").is_err());
        }

        #[test]
        fn test_rejects_overflow() {
            assert!(parse_login_ttl("99999999999999999999h").is_err());
            assert!(parse_login_ttl("18446744073709551615h").is_err());
        }
    }

    mod agent_network {
        use super::*;

        #[test]
        fn test_display() {
            assert_eq!(AgentNetwork::Unix.to_string(), "unix");
            assert_eq!(AgentNetwork::Tcp.to_string(), "tcp");
        }

        #[test]
        fn test_value_enum_parse() {
            assert_eq!(
                AgentNetwork::from_str("unix", true).unwrap(),
                AgentNetwork::Unix
            );
            assert_eq!(
                AgentNetwork::from_str("tcp", true).unwrap(),
                AgentNetwork::Tcp
            );
            assert!(AgentNetwork::from_str("udp", true).is_err());
        }

        #[test]
        fn test_chain_policy_default_is_strict() {
            assert_eq!(ChainPolicy::default(), ChainPolicy::Strict);
        }
    }

    mod connect_timeout {
        use super::*;

        #[test]
        fn test_uses_param_when_provided() {
            assert_eq!(resolve_connect_timeout(Some(60)), 60);
        }

        #[test]
        fn test_uses_env_var_when_no_param() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(CONNECT_TIMEOUT_ENV_VAR, "90");
            }
            let result = resolve_connect_timeout(None);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(CONNECT_TIMEOUT_ENV_VAR);
            }
            assert_eq!(result, 90);
        }

        #[test]
        fn test_ignores_invalid_env_var() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(CONNECT_TIMEOUT_ENV_VAR, "soon");
            }
            let result = resolve_connect_timeout(None);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(CONNECT_TIMEOUT_ENV_VAR);
            }
            assert_eq!(result, DEFAULT_CONNECT_TIMEOUT_SECS);
        }
    }

    mod retries {
        use super::*;

        #[test]
        fn test_zero_retries_is_valid() {
            assert_eq!(resolve_max_retries(Some(0)), 0);
        }

        #[test]
        fn test_param_takes_priority_over_env() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(MAX_RETRIES_ENV_VAR, "10");
            }
            let result = resolve_max_retries(Some(2));
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(MAX_RETRIES_ENV_VAR);
            }
            assert_eq!(result, 2);
        }

        #[test]
        fn test_retry_delay_default() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(RETRY_DELAY_MS_ENV_VAR);
            }
            assert_eq!(resolve_retry_delay_ms(None), DEFAULT_RETRY_DELAY_MS);
        }
    }

    mod compression {
        use super::*;

        #[test]
        fn test_env_values() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            for (raw, expected) in [("true", true), ("1", true), ("TRUE", true), ("no", false)] {
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    set_env(COMPRESSION_ENV_VAR, raw);
                }
                assert_eq!(resolve_compression(None), expected, "value {}", raw);
            }
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(COMPRESSION_ENV_VAR);
            }
            assert!(resolve_compression(None));
        }
    }

    mod store_dir {
        use super::*;

        #[test]
        fn test_param_wins() {
            let dir = resolve_store_dir(Some(PathBuf::from("/srv/keys")));
            assert_eq!(dir, Some(PathBuf::from("/srv/keys")));
        }

        #[test]
        fn test_env_var_used() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                set_env(HOME_ENV_VAR, "/var/lib/tsh");
            }
            let dir = resolve_store_dir(None);
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(HOME_ENV_VAR);
            }
            assert_eq!(dir, Some(PathBuf::from("/var/lib/tsh")));
        }

        #[test]
        fn test_defaults_under_home() {
            let _guard = ENV_TEST_MUTEX.lock().unwrap();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe {
                remove_env(HOME_ENV_VAR);
            }
            if let Some(dir) = resolve_store_dir(None) {
                assert!(dir.ends_with(STORE_DIR_NAME));
            }
        }
    }

    #[test]
    fn test_transport_defaults() {
        let settings = TransportSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_delay, Duration::from_millis(1000));
        assert!(settings.compress);
        assert_eq!(settings.proxy_timeout, Duration::from_secs(30));
    }
}
