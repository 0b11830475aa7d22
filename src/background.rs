//! Background training
//!
//! The host registers one named processing task that requires external power
//! and network connectivity. When the host runs it, the metrics are refreshed
//! and one training cycle is attempted with no visible UI. The host may expire
//! the task at any time; expiration cancels the in-flight work. Completion is
//! reported to the host exactly once.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::controller::{HealthDashboard, Presenter};
use crate::error::ArtificienError;
use crate::gateway::HealthStore;
use crate::store::PreferenceStore;
use crate::training::{FederatedJob, TrainingOutcome};

/// Identifier of the background training task
pub const DEFAULT_TASK_IDENTIFIER: &str = "edu.dartmouth.Artificien-Mobile";

/// Request submitted to the host's background scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTaskRequest {
    pub identifier: String,
    pub requires_external_power: bool,
    pub requires_network_connectivity: bool,
}

impl ProcessingTaskRequest {
    /// Request that runs only while charging and online
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            requires_external_power: true,
            requires_network_connectivity: true,
        }
    }
}

impl Default for ProcessingTaskRequest {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_IDENTIFIER)
    }
}

/// Host background scheduler
pub trait TaskScheduler {
    fn submit(&self, request: &ProcessingTaskRequest) -> Result<(), ArtificienError>;
}

/// Scheduler that keeps submitted requests in memory
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    submitted: Mutex<Vec<ProcessingTaskRequest>>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<ProcessingTaskRequest> {
        self.submitted
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl TaskScheduler for InMemoryScheduler {
    fn submit(&self, request: &ProcessingTaskRequest) -> Result<(), ArtificienError> {
        let mut submitted = self
            .submitted
            .lock()
            .map_err(|_| ArtificienError::StorageError("scheduler state poisoned".into()))?;
        // resubmitting replaces the pending request with the same identifier
        submitted.retain(|r| r.identifier != request.identifier);
        submitted.push(request.clone());
        Ok(())
    }
}

/// Submit the training task on launch. Scheduling failures are logged only.
pub fn schedule_training_job<T: TaskScheduler + ?Sized>(
    scheduler: &T,
    request: &ProcessingTaskRequest,
) -> bool {
    match scheduler.submit(request) {
        Ok(()) => {
            info!(identifier = %request.identifier, "scheduled background training");
            true
        }
        Err(e) => {
            warn!(identifier = %request.identifier, error = %e, "failed to schedule background training");
            false
        }
    }
}

/// A running background task, as seen by the work
pub struct BackgroundTask {
    identifier: String,
    expired: watch::Receiver<bool>,
    completion: Option<oneshot::Sender<bool>>,
}

/// The host side of a background task
pub struct TaskHandle {
    expire: watch::Sender<bool>,
    completion: oneshot::Receiver<bool>,
}

impl BackgroundTask {
    pub fn new(identifier: impl Into<String>) -> (Self, TaskHandle) {
        let (expire_tx, expire_rx) = watch::channel(false);
        let (completion_tx, completion_rx) = oneshot::channel();
        (
            Self {
                identifier: identifier.into(),
                expired: expire_rx,
                completion: Some(completion_tx),
            },
            TaskHandle {
                expire: expire_tx,
                completion: completion_rx,
            },
        )
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_expired(&self) -> bool {
        *self.expired.borrow()
    }

    /// Resolves once the host expires the task
    pub async fn expired(&mut self) {
        if self.expired.wait_for(|expired| *expired).await.is_err() {
            // host gone without expiring
            std::future::pending::<()>().await;
        }
    }

    /// Report completion to the host
    pub fn set_completed(mut self, success: bool) {
        self.complete(success);
    }

    fn complete(&mut self, success: bool) {
        if let Some(completion) = self.completion.take() {
            info!(identifier = %self.identifier, success, "background task completed");
            // the host may have stopped listening
            let _ = completion.send(success);
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.complete(false);
    }
}

impl TaskHandle {
    /// Expire the task, cancelling its work
    pub fn expire(&self) {
        let _ = self.expire.send(true);
    }

    /// Completion reported by the task, `None` if it never reported
    pub async fn completion(self) -> Option<bool> {
        self.completion.await.ok()
    }
}

/// How a background run ended
#[derive(Debug)]
pub enum BackgroundOutcome {
    Trained { loss: f64 },
    Rejected { retry_after: Option<Duration> },
    Failed(ArtificienError),
    Expired,
}

impl BackgroundOutcome {
    /// Only a completed training cycle counts as success
    pub fn is_success(&self) -> bool {
        matches!(self, BackgroundOutcome::Trained { .. })
    }
}

/// Refresh and train in response to a background task invocation
pub async fn run_background_training<S, P, V, J>(
    dashboard: &mut HealthDashboard<S, P, V>,
    job: &mut J,
    mut task: BackgroundTask,
) -> BackgroundOutcome
where
    S: HealthStore,
    P: PreferenceStore + Send,
    V: Presenter,
    J: FederatedJob + ?Sized,
{
    let run_id = Uuid::new_v4();
    info!(%run_id, identifier = %task.identifier(), "background task started");

    let work = async {
        let refresh = dashboard.refresh().await;
        if !refresh.is_complete() {
            warn!(
                failed = refresh.failures.len(),
                "refresh incomplete, training on stored metrics"
            );
        }
        dashboard.train(job).await
    };

    let outcome = tokio::select! {
        result = work => match result {
            Ok(TrainingOutcome::Completed { loss }) => BackgroundOutcome::Trained { loss },
            Ok(TrainingOutcome::Rejected { retry_after }) => BackgroundOutcome::Rejected { retry_after },
            Err(e) => BackgroundOutcome::Failed(e),
        },
        _ = task.expired() => {
            warn!(%run_id, identifier = %task.identifier(), "background task expired, work cancelled");
            BackgroundOutcome::Expired
        }
    };

    task.set_completed(outcome.is_success());
    outcome
}
