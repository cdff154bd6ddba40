//! Client configuration threaded explicitly into every reconciler call.

use std::fmt;
use std::time::Duration;

use reqwest::Url;

use crate::error::{Error, Result};
use crate::params::ConnectionParams;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default number of status polls before giving up.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 150;

/// Credentials attached to every request.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Bearer(String),
    Basic { username: String, password: String },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Bearer(_) => f.write_str("Bearer(***)"),
            Auth::Basic { username, .. } => write!(f, "Basic({username}:***)"),
        }
    }
}

/// Bounds for wait-for-phase loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Wall-clock budget for a whole loop.
    pub budget: Duration,
}

impl PollConfig {
    /// The budget is the request timeout times the attempt count, so a loop
    /// can never outlive the worst case of all its probes timing out.
    pub fn new(interval: Duration, max_attempts: u32, request_timeout: Duration) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            interval,
            max_attempts,
            budget: request_timeout.saturating_mul(max_attempts),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_POLL_INTERVAL,
            DEFAULT_POLL_ATTEMPTS,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }
}

/// Connection settings for the control plane.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL without trailing slash.
    pub host: String,
    pub auth: Auth,
    pub verify_ssl: bool,
    pub timeout: Duration,
    pub poll: PollConfig,
}

impl ClientConfig {
    pub fn new(host: &str, auth: Auth) -> Result<Self> {
        let url = Url::parse(host).map_err(|e| Error::invalid(format!("host '{host}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::invalid(format!(
                "host '{host}' must be an http or https URL"
            )));
        }
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            auth,
            verify_ssl: true,
            timeout,
            poll: PollConfig::default(),
        })
    }

    /// Build from the flat connection parameters supplied by the host.
    pub fn from_params(params: &ConnectionParams) -> Result<Self> {
        let auth = match (&params.token, &params.username, &params.password) {
            (_, Some(_), None) | (_, None, Some(_)) => {
                return Err(Error::invalid(
                    "username and password must be supplied together",
                ));
            }
            (Some(token), _, _) => Auth::Bearer(token.clone()),
            (_, Some(username), Some(password)) => Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            (None, None, None) => {
                return Err(Error::invalid("one of token or username is required"));
            }
        };
        if params.timeout == 0 {
            return Err(Error::invalid("timeout must be at least one second"));
        }

        let mut config = Self::new(&params.host, auth)?;
        config.verify_ssl = params.verify_ssl;
        config.timeout = Duration::from_secs(params.timeout);
        config.poll = PollConfig::new(
            params
                .poll_interval
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            params.poll_attempts.unwrap_or(DEFAULT_POLL_ATTEMPTS),
            config.timeout,
        );
        Ok(config)
    }
}
