//! Error types for JobWatch.

/// Every failure the pipeline can observe. None of them is fatal once the
/// pipeline is running; callers log and degrade.
#[derive(Debug, thiserror::Error)]
pub enum JobWatchError {
    /// Network error, timeout or refused connection talking to the workload source.
    #[error("Source connection error: {0}")]
    SourceConnection(String),

    /// The workload source rejected the configured credentials.
    #[error("Source authentication failed: {0}")]
    SourceAuth(String),

    /// Non-success response or undecodable body from the workload source.
    #[error("Source API error: {0}")]
    SourceApi(String),

    #[error("History error: {0}")]
    History(String),

    #[error("Event bus error: {0}")]
    Bus(String),

    /// A viewer connection could not accept a message.
    #[error("Connection send failed: {0}")]
    Send(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobWatchError {
    /// True for any error raised while querying the workload source.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            Self::SourceConnection(_) | Self::SourceAuth(_) | Self::SourceApi(_)
        )
    }

    /// True when the source rejected our credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::SourceAuth(_))
    }
}

pub type Result<T> = std::result::Result<T, JobWatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(JobWatchError::SourceAuth("401".into()).is_auth_failure());
        assert!(JobWatchError::SourceAuth("401".into()).is_source_failure());
        assert!(JobWatchError::SourceConnection("refused".into()).is_source_failure());
        assert!(!JobWatchError::SourceConnection("refused".into()).is_auth_failure());
        assert!(!JobWatchError::History("locked".into()).is_source_failure());
    }

    #[test]
    fn test_display() {
        let err = JobWatchError::SourceApi("HTTP 500".into());
        assert_eq!(err.to_string(), "Source API error: HTTP 500");
    }
}
