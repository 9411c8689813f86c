use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;
use url::Url;

pub const SERVER_ENV: &str = "BEACH_QUERY_SERVER";
pub const CSRF_TOKEN_ENV: &str = "BEACH_QUERY_CSRF_TOKEN";
pub const STATE_DIR_ENV: &str = "BEACH_QUERY_STATE_DIR";
pub const REQUEST_TIMEOUT_ENV: &str = "BEACH_QUERY_REQUEST_TIMEOUT_SECS";

const DEFAULT_SERVER: &str = "http://127.0.0.1:8765";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Query client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the query server
    pub server: String,
    pub csrf_token: Option<String>,
    /// Where tabs and history are persisted; `None` means the default location
    pub state_dir: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = env::var(SERVER_ENV) {
            match parse_server(&raw) {
                Ok(server) => config.server = server.to_string(),
                Err(err) => warn!(
                    target: "beach_query::config",
                    value = %raw,
                    error = %err,
                    "ignoring invalid {SERVER_ENV}"
                ),
            }
        }

        config.csrf_token = env::var(CSRF_TOKEN_ENV).ok().filter(|token| !token.is_empty());
        config.state_dir = env::var_os(STATE_DIR_ENV)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        if let Ok(raw) = env::var(REQUEST_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.connect_timeout = Duration::from_secs(secs),
                _ => warn!(
                    target: "beach_query::config",
                    value = %raw,
                    "ignoring invalid {REQUEST_TIMEOUT_ENV}"
                ),
            }
        }

        config
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// Get the query server URL
    pub fn server_url(&self) -> Result<Url, url::ParseError> {
        parse_server(&self.server)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            csrf_token: None,
            state_dir: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Parses a server address, accepting bare `host:port` as http.
///
/// `localhost` is normalised to `127.0.0.1` to avoid an IPv6-first lookup.
pub fn parse_server(raw: &str) -> Result<Url, url::ParseError> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let mut url = Url::parse(&with_scheme)?;
    if url.host_str() == Some("localhost") {
        url.set_host(Some("127.0.0.1"))?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn clear_env() {
        unsafe {
            env::remove_var(SERVER_ENV);
            env::remove_var(CSRF_TOKEN_ENV);
            env::remove_var(STATE_DIR_ENV);
            env::remove_var(REQUEST_TIMEOUT_ENV);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server, "http://127.0.0.1:8765");
        assert_eq!(
            config.server_url().unwrap().as_str(),
            "http://127.0.0.1:8765/"
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.csrf_token.is_none());
    }

    #[test]
    fn test_config_from_env_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.server, "http://127.0.0.1:8765");
        assert!(config.state_dir.is_none());
    }

    #[test]
    fn test_config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(SERVER_ENV, "localhost:9000");
            env::set_var(CSRF_TOKEN_ENV, "token-1");
            env::set_var(STATE_DIR_ENV, "/tmp/beach-query-state");
            env::set_var(REQUEST_TIMEOUT_ENV, "5");
        }
        let config = Config::from_env();
        clear_env();

        assert_eq!(config.server, "http://127.0.0.1:9000/");
        assert_eq!(config.csrf_token.as_deref(), Some("token-1"));
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/beach-query-state")));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(SERVER_ENV, "http://[::1");
            env::set_var(REQUEST_TIMEOUT_ENV, "soon");
        }
        let config = Config::from_env();
        clear_env();

        assert_eq!(config.server, "http://127.0.0.1:8765");
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }
}
