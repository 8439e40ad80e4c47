//! Workload source trait — where job snapshots come from.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::JobSnapshot;

/// A workload scheduler that can list the current job streams.
///
/// Failures must be reported with the source error variants so callers can
/// tell bad credentials (`SourceAuth`) from a network blip (`SourceConnection`).
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Source name (for logs).
    fn name(&self) -> &str;

    /// Full list of job streams currently in the plan.
    async fn list_job_streams(&self) -> Result<Vec<JobSnapshot>>;
}
