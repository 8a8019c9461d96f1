use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

const ENV_CONNECT_TIMEOUT_SECS: &str = "ANSWER_STREAM_CONNECT_TIMEOUT_SECS";
const ENV_IDLE_TIMEOUT_SECS: &str = "ANSWER_STREAM_IDLE_TIMEOUT_SECS";
const ENV_USER_AGENT: &str = "ANSWER_STREAM_USER_AGENT";
const ENV_STAGE1_LINE_LIMIT: &str = "ANSWER_STREAM_STAGE1_LINE_LIMIT";

/// Configuration for the stream client and session manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Maximum time to establish the HTTP connection.
    pub connect_timeout: Duration,
    /// Errors the session when no content or terminal signal arrives in this
    /// window. Heartbeats do not extend it. `None` disables the check.
    pub idle_timeout: Option<Duration>,
    /// `User-Agent` header sent with the stream request.
    pub user_agent: String,
    /// Cap on retained Stage-1 lines; the oldest lines are dropped first.
    pub stage1_line_limit: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: None,
            user_agent: format!("answer-stream/{}", env!("CARGO_PKG_VERSION")),
            stage1_line_limit: Some(5_000),
        }
    }
}

impl StreamConfig {
    /// Builds a config from defaults overridden by environment variables.
    ///
    /// - `ANSWER_STREAM_CONNECT_TIMEOUT_SECS`: connect timeout in seconds.
    /// - `ANSWER_STREAM_IDLE_TIMEOUT_SECS`: idle timeout in seconds (`0` disables).
    /// - `ANSWER_STREAM_USER_AGENT`: user agent override.
    /// - `ANSWER_STREAM_STAGE1_LINE_LIMIT`: Stage-1 line cap (`0` disables).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_CONNECT_TIMEOUT_SECS)? {
            if secs == 0 {
                return Err(ConfigError::OutOfRange(format!(
                    "{ENV_CONNECT_TIMEOUT_SECS} must be greater than 0"
                )));
            }
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_IDLE_TIMEOUT_SECS)? {
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(agent) = lookup(ENV_USER_AGENT).filter(|v| !v.trim().is_empty()) {
            config.user_agent = agent.trim().to_string();
        }
        if let Some(limit) = parse_var::<usize>(&lookup, ENV_STAGE1_LINE_LIMIT)? {
            config.stage1_line_limit = (limit > 0).then_some(limit);
        }
        Ok(config)
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets or clears the idle timeout.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Overrides the user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets or clears the Stage-1 line cap.
    pub fn stage1_line_limit(mut self, limit: Option<usize>) -> Self {
        self.stage1_line_limit = limit;
        self
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        })
}
