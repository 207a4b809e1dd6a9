//! Cancellation token management for running jobs.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::service::SyllabusService;

impl SyllabusService {
    /// Register a cancellation token for a job that is about to run. Must happen before
    /// the job row is visible to other callers.
    pub(crate) fn register_job_token(&self, job_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancellation_tokens
            .insert(job_id.to_string(), token.clone());
        token
    }

    /// Cancel a running job. Returns false if no run is registered for it.
    ///
    /// The token stays registered until the run ends, so repeated cancels keep reaching
    /// the run instead of the store.
    pub(crate) fn cancel_job(&self, job_id: &str) -> bool {
        if let Some(token) = self.cancellation_tokens.get(job_id) {
            token.cancel();
            info!(job_id, "Job cancellation triggered");
            true
        } else {
            false
        }
    }

    /// Remove a job's token once its run has ended.
    pub(crate) fn unregister_job_token(&self, job_id: &str) {
        self.cancellation_tokens.remove(job_id);
    }
}
