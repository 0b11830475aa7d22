//! Training session adapter
//!
//! This module is the boundary to federated training. A [`FederatedJob`]
//! negotiates one cycle with a coordinator and resolves to exactly one
//! [`CycleEvent`]. [`TrainingSession`] reacts to that event: on `Ready` it
//! prepares the feature vector, executes the plan, persists the loss and
//! reports the diff; on `Rejected` it only logs the suggested delay.
//!
//! There is no automatic retry after a rejection. Retrying is left to the
//! caller (the next background invocation or a manual tap).

pub mod perceptron;
pub mod pygrid;

pub use perceptron::PerceptronPlan;
pub use pygrid::{PyGridClient, PyGridJob};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ArtificienError;
use crate::features::AppDataPreparer;
use crate::store::{MetricKey, PreferenceStore};
use crate::types::{FeatureVector, FEATURE_COUNT};

/// Largest batch a coordinator may ask the device to train on
pub const MAX_BATCH_SIZE: usize = 65_536;

/// Cycle configuration sent by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    pub version: String,
    pub batch_size: usize,
    /// Learning rate
    pub lr: f64,
    #[serde(default = "default_max_updates")]
    pub max_updates: u32,
}

fn default_max_updates() -> u32 {
    1
}

/// A row-major 2-D tensor of training inputs
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingData {
    data: Vec<f64>,
    shape: [usize; 2],
}

impl TrainingData {
    /// Wrap `data` with a `[rows, columns]` shape, rejecting mismatched lengths
    pub fn new(data: Vec<f64>, shape: [usize; 2]) -> Result<Self, ArtificienError> {
        let [rows, columns] = shape;
        if rows == 0 || columns == 0 || rows.checked_mul(columns) != Some(data.len()) {
            return Err(ArtificienError::TrainingExecutionFault(format!(
                "malformed tensor shape {:?} for {} values",
                shape,
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    /// Repeat the feature vector `batch_size` times
    pub fn from_features(
        features: &FeatureVector,
        batch_size: usize,
    ) -> Result<Self, ArtificienError> {
        let len = batch_size
            .checked_mul(FEATURE_COUNT)
            .filter(|_| batch_size <= MAX_BATCH_SIZE)
            .ok_or_else(|| {
                ArtificienError::TrainingExecutionFault(format!(
                    "batch size {batch_size} exceeds the limit of {MAX_BATCH_SIZE}"
                ))
            })?;
        let row = features.to_array();
        let data = row.iter().copied().cycle().take(len).collect();
        Self::new(data, [batch_size, FEATURE_COUNT])
    }

    pub fn shape(&self) -> [usize; 2] {
        self.shape
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks(self.shape[1])
    }
}

/// A downloaded training plan
pub trait TrainingPlan: Send {
    /// Run the plan and return the validation loss
    fn execute(
        &mut self,
        training: &TrainingData,
        validation: &TrainingData,
        config: &ClientConfig,
    ) -> Result<f64, ArtificienError>;

    /// Encode the model update produced by the last execution
    fn generate_diff(&self) -> Result<Vec<u8>, ArtificienError>;
}

/// Reports a generated diff back to the coordinator
#[async_trait]
pub trait ModelReport: Send {
    async fn report(&mut self, diff: Vec<u8>) -> Result<(), ArtificienError>;
}

/// Outcome of a cycle request
pub enum CycleEvent {
    /// The coordinator accepted the worker for this cycle
    Ready {
        plan: Box<dyn TrainingPlan>,
        config: ClientConfig,
        report: Box<dyn ModelReport>,
    },
    /// Terminal failure of the job
    Error(ArtificienError),
    /// Not selected for this cycle
    Rejected { retry_after: Option<Duration> },
}

/// A federated learning job for one model name/version
#[async_trait]
pub trait FederatedJob: Send {
    /// Negotiate a single cycle with the coordinator
    async fn request_cycle(&mut self) -> CycleEvent;
}

/// Result of a completed cycle request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainingOutcome {
    Completed { loss: f64 },
    Rejected { retry_after: Option<Duration> },
}

/// Runs training cycles against the feature vector in the preference store
pub struct TrainingSession;

impl TrainingSession {
    /// Request one cycle and, if ready, train on the stored metrics.
    ///
    /// The loss (or an error summary) is written to the training result key.
    pub async fn run_cycle<J, P>(
        job: &mut J,
        store: &mut P,
    ) -> Result<TrainingOutcome, ArtificienError>
    where
        J: FederatedJob + ?Sized,
        P: PreferenceStore + Send + ?Sized,
    {
        let result = match job.request_cycle().await {
            CycleEvent::Rejected { retry_after } => {
                info!(
                    retry_after_secs = retry_after.map(|d| d.as_secs()),
                    "training cycle rejected, not retrying"
                );
                return Ok(TrainingOutcome::Rejected { retry_after });
            }
            CycleEvent::Error(e) => Err(e),
            CycleEvent::Ready {
                plan,
                config,
                report,
            } => Self::train(plan, &config, report, store).await,
        };

        match result {
            Ok(loss) => {
                info!(loss, "training cycle completed");
                Ok(TrainingOutcome::Completed { loss })
            }
            Err(e) => {
                warn!(error = %e, "training cycle failed");
                let summary = error_summary(&e);
                if let Err(store_err) = store.set(MetricKey::TrainingResult, summary.into()) {
                    warn!(error = %store_err, "failed to persist training error");
                }
                Err(e)
            }
        }
    }

    async fn train<P>(
        mut plan: Box<dyn TrainingPlan>,
        config: &ClientConfig,
        mut report: Box<dyn ModelReport>,
        store: &mut P,
    ) -> Result<f64, ArtificienError>
    where
        P: PreferenceStore + Send + ?Sized,
    {
        let features = AppDataPreparer::prepare(&*store).ok_or_else(|| {
            let missing: Vec<&str> = AppDataPreparer::missing_fields(&*store)
                .iter()
                .map(|k| k.as_str())
                .collect();
            ArtificienError::PreprocessingDataMissing(missing.join(", "))
        })?;

        let training = TrainingData::from_features(&features, config.batch_size)?;
        let validation = training.clone();

        let loss = plan.execute(&training, &validation, config)?;
        if !loss.is_finite() {
            return Err(ArtificienError::TrainingExecutionFault(format!(
                "plan produced a non-finite loss ({loss})"
            )));
        }
        store.set(MetricKey::TrainingResult, format_loss(loss).into())?;

        let diff = plan.generate_diff()?;
        report.report(diff).await?;
        Ok(loss)
    }
}

/// Training result text for a completed cycle
pub fn format_loss(loss: f64) -> String {
    format!("Loss: {loss:.4}")
}

/// Training result text for a failed cycle
pub fn error_summary(error: &ArtificienError) -> String {
    format!("Error: {error}")
}
