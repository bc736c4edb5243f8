use crate::error::{CairnError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default server port.
pub const DEFAULT_PORT: u16 = 27017;

/// Default server host.
pub const DEFAULT_HOST: &str = "localhost";

/// Server address as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Endpoint {
    /// Resolve `--host` / `--port` into an endpoint.
    ///
    /// Accepted host forms: `host`, `host:port`, `[v6]`, `[v6]:port` and a
    /// bare IPv6 literal. A port embedded in the host that disagrees with
    /// `--port` is a configuration error.
    pub fn parse(host: Option<&str>, port: Option<u16>) -> Result<Self> {
        let (host, embedded) = match host.map(str::trim) {
            None | Some("") => (DEFAULT_HOST.to_string(), None),
            Some(spec) => split_host_port(spec)?,
        };

        let port = match (embedded, port) {
            (Some(a), Some(b)) if a != b => {
                return Err(CairnError::Config(format!(
                    "Port {} in --host conflicts with --port {}",
                    a, b
                )))
            }
            (Some(p), _) | (None, Some(p)) => p,
            (None, None) => DEFAULT_PORT,
        };

        Ok(Self { host, port })
    }

    /// `host:port` with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

fn split_host_port(spec: &str) -> Result<(String, Option<u16>)> {
    if let Some(rest) = spec.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| CairnError::Config(format!("Unclosed '[' in host '{}'", spec)))?;
        if host.is_empty() {
            return Err(CairnError::Config(format!("Empty host in '{}'", spec)));
        }
        let port = match tail {
            "" => None,
            t => match t.strip_prefix(':') {
                Some(p) => Some(parse_port(p)?),
                None => {
                    return Err(CairnError::Config(format!(
                        "Unexpected '{}' after IPv6 address",
                        t
                    )))
                }
            },
        };
        return Ok((host.to_string(), port));
    }

    match spec.matches(':').count() {
        0 => Ok((spec.to_string(), None)),
        1 => {
            let (host, port) = spec.split_once(':').unwrap_or((spec, ""));
            if host.is_empty() {
                return Err(CairnError::Config(format!("Empty host in '{}'", spec)));
            }
            Ok((host.to_string(), Some(parse_port(port)?)))
        }
        // Unbracketed IPv6 literal
        _ => Ok((spec.to_string(), None)),
    }
}

fn parse_port(text: &str) -> Result<u16> {
    match text.parse::<u16>() {
        Ok(0) | Err(_) => Err(CairnError::Config(format!("Invalid port '{}'", text))),
        Ok(p) => Ok(p),
    }
}

/// Username and password for authenticated servers.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Backoff strategy for connection retry delays
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between attempts
    Fixed(Duration),

    /// Exponential: initial * 2^attempt (capped at max)
    Exponential { initial: Duration, max: Duration },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
        }
    }
}

impl BackoffStrategy {
    /// Delay to wait after the given failed attempt (0-based).
    pub fn calculate(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { initial, max } => {
                let multiplier = 2u32.saturating_pow(attempt);
                initial.saturating_mul(multiplier).min(*max)
            }
        }
    }
}

/// Bounded retry policy for establishing connections.
///
/// Only connection establishment is retried; document-level failures never
/// are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total connection attempts, including the first (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffStrategy::Fixed(Duration::ZERO),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }
}

fn default_max_attempts() -> u32 {
    5
}

/// Configuration for a live-server connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub endpoint: Endpoint,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Allow IPv6 addresses (default: false, IPv4 only)
    #[serde(default)]
    pub ipv6: bool,

    /// Per-attempt connect timeout in milliseconds (default: 2000)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Read timeout for a single reply line in milliseconds (default: 60000)
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(Endpoint::default())
    }
}

impl ConnectionConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            credentials: None,
            ipv6: false,
            connect_timeout_ms: default_connect_timeout(),
            io_timeout_ms: default_io_timeout(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_ipv6(mut self, ipv6: bool) -> Self {
        self.ipv6 = ipv6;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connect_timeout(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_io_timeout() -> u64 {
    60_000
}
