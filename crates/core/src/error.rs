use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection refused, socket closed, missing replies.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A non-success HTTP status from a server endpoint.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A JSON-RPC `error` object returned by a server.
    #[error("Protocol error: {message}")]
    Protocol { code: Option<i64>, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    /// Unknown or disabled server id, malformed tool name.
    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for typed cancellations and for errors whose text reports an abort.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Cancelled(_) => true,
            other => {
                let text = other.to_string().to_lowercase();
                text.contains("cancelled") || text.contains("canceled") || text.contains("aborted")
            }
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_detection() {
        assert!(Error::Cancelled("user".into()).is_cancellation());
        assert!(Error::Other("request aborted by caller".into()).is_cancellation());
        assert!(Error::Tool("Operation was canceled".into()).is_cancellation());
        assert!(!Error::Timeout("tools/list".into()).is_cancellation());
    }

    #[test]
    fn test_http_status() {
        let err = Error::Http { status: 404, message: "MCP[fs1]: session not found".into() };
        assert_eq!(err.http_status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404: MCP[fs1]: session not found");
        assert_eq!(Error::Transport("HTTP 404".into()).http_status(), None);
    }

    #[test]
    fn test_protocol_display() {
        let err = Error::Protocol { code: Some(-32601), message: "Method not found".into() };
        assert_eq!(err.to_string(), "Protocol error: Method not found");
    }
}
