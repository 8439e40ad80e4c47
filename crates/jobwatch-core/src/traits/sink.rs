//! History sink trait — durable, append-only record of transitions.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::StatusChangeEvent;

#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Append one transition. Callers log failures and move on.
    async fn append(&self, event: &StatusChangeEvent) -> Result<()>;

    /// Most recent transitions, newest first, optionally for one job.
    async fn recent(&self, job_name: Option<&str>, limit: usize) -> Result<Vec<StatusChangeEvent>>;
}
