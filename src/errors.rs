/// Error taxonomy for the agent. Most component boundaries catch an
/// `AgentError` and degrade rather than propagate -- see the error handling
/// design notes for which variant corresponds to which recovery policy.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{exchange} API error: {status} {body}")]
    ExchangeApi {
        exchange: &'static str,
        status: u16,
        body: String,
    },

    #[error("llm provider error: {0}")]
    Llm(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Network(e.to_string())
    }
}

impl AgentError {
    /// True for errors worth retrying with backoff: network hiccups and
    /// 5xx/429 exchange responses. A 4xx (auth, bad request, not found) is
    /// permanent and retrying it just burns the rate-limit budget.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Network(_) => true,
            AgentError::ExchangeApi { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_transient() {
        assert!(AgentError::Network("timeout".into()).is_transient());
    }

    #[test]
    fn exchange_5xx_and_429_are_transient() {
        assert!(AgentError::ExchangeApi { exchange: "kalshi", status: 503, body: String::new() }.is_transient());
        assert!(AgentError::ExchangeApi { exchange: "kalshi", status: 429, body: String::new() }.is_transient());
    }

    #[test]
    fn exchange_4xx_is_permanent() {
        assert!(!AgentError::ExchangeApi { exchange: "kalshi", status: 404, body: String::new() }.is_transient());
        assert!(!AgentError::Auth("bad key".into()).is_transient());
    }
}
