//! Docker connection configuration
//!
//! Read from the environment the same way the docker CLI does, plus the
//! exec timeout knob.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use super::error::EngineError;

/// Default local engine socket
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";
/// Port used when `DOCKER_HOST` is a bare host name
pub const DEFAULT_DOCKER_PORT: u16 = 2375;
/// Exec streams are destroyed after this long
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Where the Docker engine listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerHost {
    /// Local Unix domain socket
    Unix(PathBuf),
    /// Remote engine over plain HTTP, e.g. `http://10.0.0.5:2375`
    Tcp(String),
}

impl DockerHost {
    /// Parse a `DOCKER_HOST` value
    ///
    /// `port` is only used for bare host names and `tcp://` URLs without a port.
    pub fn parse(host: &str, port: u16) -> Result<Self, EngineError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(EngineError::InvalidHost(host.to_string()));
        }

        if let Some(path) = host.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(EngineError::InvalidHost(host.to_string()));
            }
            return Ok(DockerHost::Unix(PathBuf::from(path)));
        }
        if host.starts_with('/') {
            return Ok(DockerHost::Unix(PathBuf::from(host)));
        }
        if host.starts_with("http://") || host.starts_with("https://") {
            return Ok(DockerHost::Tcp(host.trim_end_matches('/').to_string()));
        }

        let authority = host
            .strip_prefix("tcp://")
            .unwrap_or(host)
            .trim_end_matches('/');
        if authority.is_empty() || authority.contains("://") {
            return Err(EngineError::InvalidHost(host.to_string()));
        }
        if authority.contains(':') {
            Ok(DockerHost::Tcp(format!("http://{}", authority)))
        } else {
            Ok(DockerHost::Tcp(format!("http://{}:{}", authority, port)))
        }
    }
}

impl std::fmt::Display for DockerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DockerHost::Unix(path) => write!(f, "unix://{}", path.display()),
            DockerHost::Tcp(url) => f.write_str(url),
        }
    }
}

/// Configuration for the Docker client and the runtime adapter
#[derive(Debug, Clone)]
pub struct DockerConfig {
    pub host: DockerHost,
    /// Upper bound on a single exec stream
    pub exec_timeout: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: DockerHost::Unix(PathBuf::from("/var/run/docker.sock")),
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }
}

impl DockerConfig {
    /// Build from `DOCKER_HOST`, `DOCKER_PORT` and `DOCKER_EXEC_TIMEOUT_MS`
    /// (or the older `EXEC_TIMEOUT_MS`)
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable lookup
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let port = match get("DOCKER_PORT") {
            Some(raw) => raw.trim().parse::<u16>().unwrap_or_else(|_| {
                warn!(value = %raw, "invalid DOCKER_PORT, using default");
                DEFAULT_DOCKER_PORT
            }),
            None => DEFAULT_DOCKER_PORT,
        };

        let host = get("DOCKER_HOST")
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DOCKER_HOST.to_string());

        let exec_timeout = match get("DOCKER_EXEC_TIMEOUT_MS").or_else(|| get("EXEC_TIMEOUT_MS")) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    warn!(value = %raw, "invalid exec timeout, using default");
                    DEFAULT_EXEC_TIMEOUT
                }
            },
            None => DEFAULT_EXEC_TIMEOUT,
        };

        Ok(Self {
            host: DockerHost::parse(&host, port)?,
            exec_timeout,
        })
    }
}
