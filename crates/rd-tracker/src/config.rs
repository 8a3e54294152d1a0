//! Tracker configuration with hardened defaults and `RIDDLER_*` environment overrides.

use rd_core::TrackerError;
use rd_core::TrackerResult;
use rd_net::EndpointUrl;
use rd_riddle::SensitivePathRules;
use std::time::Duration;

const DEFAULT_SERVER_URL: &str = "https://riddler.app";
const DEFAULT_AUTH_DEBOUNCE_MS: u64 = 3_000;
const DEFAULT_LOGIN_DEBOUNCE_MS: u64 = 5_000;
const DEFAULT_TAB_REPLY_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_BACKEND_WORKERS: usize = 4;
const DEFAULT_BACKEND_QUEUE: usize = 64;
/// Riddle paths whose real auth prompt is part of the puzzle.
const DEFAULT_SENSITIVE_PATHS: &[(&str, &str)] = &[("notpron", "/jerk2")];

pub const ENV_SERVER_URL: &str = "RIDDLER_SERVER_URL";
pub const ENV_SESSION: &str = "RIDDLER_SESSION";
pub const ENV_AUTH_DEBOUNCE_MS: &str = "RIDDLER_AUTH_DEBOUNCE_MS";
pub const ENV_LOGIN_DEBOUNCE_MS: &str = "RIDDLER_LOGIN_DEBOUNCE_MS";
pub const ENV_TAB_REPLY_TIMEOUT_MS: &str = "RIDDLER_TAB_REPLY_TIMEOUT_MS";
pub const ENV_BACKEND_WORKERS: &str = "RIDDLER_BACKEND_WORKERS";
pub const ENV_BACKEND_QUEUE: &str = "RIDDLER_BACKEND_QUEUE";
/// `alias:/prefix` pairs separated by commas; replaces the default rules.
pub const ENV_SENSITIVE_PATHS: &str = "RIDDLER_SENSITIVE_PATHS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub server_url: String,
    pub session_cookie: Option<String>,
    pub auth_debounce: Duration,
    pub login_debounce: Duration,
    pub tab_reply_timeout: Duration,
    /// Threads running backend calls.
    pub backend_workers: usize,
    /// Backend calls waiting for a worker; further calls are dropped.
    pub backend_queue: usize,
    pub sensitive_paths: SensitivePathRules,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            session_cookie: None,
            auth_debounce: Duration::from_millis(DEFAULT_AUTH_DEBOUNCE_MS),
            login_debounce: Duration::from_millis(DEFAULT_LOGIN_DEBOUNCE_MS),
            tab_reply_timeout: Duration::from_millis(DEFAULT_TAB_REPLY_TIMEOUT_MS),
            backend_workers: DEFAULT_BACKEND_WORKERS,
            backend_queue: DEFAULT_BACKEND_QUEUE,
            sensitive_paths: DEFAULT_SENSITIVE_PATHS
                .iter()
                .fold(SensitivePathRules::default(), |rules, (alias, prefix)| {
                    rules.with_rule(alias, prefix)
                }),
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> TrackerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source, then validates it.
    pub fn from_lookup<F>(lookup: F) -> TrackerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(server_url) = lookup(ENV_SERVER_URL) {
            config.server_url = server_url.trim().to_owned();
        }
        config.session_cookie = lookup(ENV_SESSION)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        if let Some(raw) = lookup(ENV_AUTH_DEBOUNCE_MS) {
            config.auth_debounce = parse_millis(ENV_AUTH_DEBOUNCE_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOGIN_DEBOUNCE_MS) {
            config.login_debounce = parse_millis(ENV_LOGIN_DEBOUNCE_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TAB_REPLY_TIMEOUT_MS) {
            config.tab_reply_timeout = parse_millis(ENV_TAB_REPLY_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BACKEND_WORKERS) {
            config.backend_workers = parse_count(ENV_BACKEND_WORKERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BACKEND_QUEUE) {
            config.backend_queue = parse_count(ENV_BACKEND_QUEUE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SENSITIVE_PATHS) {
            config.sensitive_paths = parse_sensitive_paths(&raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        self.server_endpoint()?;

        if self.auth_debounce.is_zero() {
            return Err(TrackerError::new(
                "config.auth_debounce_invalid",
                "auth debounce window must be greater than zero",
            ));
        }

        if self.login_debounce.is_zero() {
            return Err(TrackerError::new(
                "config.login_debounce_invalid",
                "login debounce window must be greater than zero",
            ));
        }

        if self.tab_reply_timeout.is_zero() {
            return Err(TrackerError::new(
                "config.tab_reply_timeout_invalid",
                "tab reply timeout must be greater than zero",
            ));
        }

        if self.backend_workers == 0 || self.backend_queue == 0 {
            return Err(TrackerError::new(
                "config.backend_pool_invalid",
                "backend worker count and queue size must be greater than zero",
            ));
        }

        Ok(())
    }

    pub fn server_endpoint(&self) -> TrackerResult<EndpointUrl> {
        EndpointUrl::parse(&self.server_url).map_err(|error| {
            TrackerError::new(
                "config.server_url_invalid",
                format!("`{}` is not a usable server url: {}", self.server_url, error.message),
            )
        })
    }

    /// Page that starts a new login on the tracker server.
    pub fn login_url(&self) -> TrackerResult<String> {
        Ok(self.server_endpoint()?.join_segments(&["login"])?.as_str().to_owned())
    }
}

fn parse_millis(name: &str, raw: &str) -> TrackerResult<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|error| {
            TrackerError::new(
                "config.duration_invalid",
                format!("`{name}` must be a whole number of milliseconds: {error}"),
            )
        })
}

fn parse_count(name: &str, raw: &str) -> TrackerResult<usize> {
    raw.trim().parse::<usize>().map_err(|error| {
        TrackerError::new(
            "config.count_invalid",
            format!("`{name}` must be a whole number: {error}"),
        )
    })
}

fn parse_sensitive_paths(raw: &str) -> TrackerResult<SensitivePathRules> {
    let mut rules = SensitivePathRules::default();
    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let Some((alias, prefix)) = pair.split_once(':') else {
            return Err(TrackerError::new(
                "config.sensitive_path_invalid",
                format!("`{pair}` is not an `alias:/prefix` pair"),
            ));
        };
        if alias.is_empty() || !prefix.starts_with('/') {
            return Err(TrackerError::new(
                "config.sensitive_path_invalid",
                format!("`{pair}` needs an alias and a prefix starting with `/`"),
            ));
        }
        rules = rules.with_rule(alias, prefix);
    }
    Ok(rules)
}
