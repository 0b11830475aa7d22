//! Artificien - On-device health metric staging for federated training
//!
//! Artificien reads health metrics from the device's health-data platform,
//! persists them as local preferences, and hands a fixed-order feature vector
//! to a federated learning coordinator: authorize → load typed samples →
//! aggregate → persist → train.
//!
//! ## Modules
//!
//! - **Gateway**: Typed access to the platform health store
//! - **Store**: Persisted metric values and training results
//! - **Training**: Cycle negotiation, on-device plan execution and diff reporting
//! - **Controller**: Dashboard state machine driving refresh and training
//! - **Background**: Scheduled, expirable training runs

pub mod background;
pub mod config;
pub mod controller;
pub mod error;
pub mod features;
pub mod gateway;
pub mod store;
pub mod training;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use background::{
    run_background_training, schedule_training_job, BackgroundOutcome, BackgroundTask,
    ProcessingTaskRequest, TaskHandle, TaskScheduler,
};
pub use config::AppConfig;
pub use controller::{Alert, DashboardView, HealthDashboard, Presenter, ScreenState};
pub use error::ArtificienError;
pub use features::AppDataPreparer;
pub use gateway::{HealthDataGateway, HealthStore, SnapshotHealthStore};
pub use store::{FilePreferenceStore, MemoryPreferenceStore, MetricKey, PreferenceStore};
pub use training::{FederatedJob, PyGridClient, TrainingOutcome, TrainingSession};
pub use types::{FeatureVector, HealthProfile};

/// Library version
pub const ARTIFICIEN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name reported in diagnostics
pub const APP_NAME: &str = "artificien-mobile";
