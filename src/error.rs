use thiserror::Error;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Rejected at the boundary; the previously stored value is kept
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested data does not exist yet (e.g. no hardware packet received)
    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Transient failures are retried locally and never surface to callers
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Connection(_) | GatewayError::Timeout(_) | GatewayError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Connection("reset".into()).is_transient());
        assert!(GatewayError::Timeout("heartbeat".into()).is_transient());
        assert!(!GatewayError::InvalidInput("roll".into()).is_transient());
        assert!(!GatewayError::Unavailable("telemetry".into()).is_transient());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = GatewayError::InvalidInput("Roll offset must be between -180 and 180".into());
        assert_eq!(
            err.to_string(),
            "Invalid input: Roll offset must be between -180 and 180"
        );
    }
}
