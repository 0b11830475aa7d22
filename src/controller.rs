//! Health dashboard controller
//!
//! Drives one dashboard screen: authorization, concurrent metric refresh,
//! and training. The controller owns a fresh [`HealthProfile`] for the
//! session, writes every loaded metric through to the preference store, and
//! re-renders the complete [`DashboardView`] from the store on every change.
//!
//! The four metric loads run concurrently on the caller's task and are
//! applied in completion order. Each load writes only its own keys, so a
//! failed load leaves the others intact.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ArtificienError;
use crate::gateway::{HealthDataGateway, HealthStore, DEFAULT_STEP_WINDOW_DAYS};
use crate::store::{MetricKey, PreferenceStore};
use crate::training::{FederatedJob, TrainingOutcome, TrainingSession};
use crate::types::{AgeSexAndBloodType, HealthProfile, QuantityType};

/// Screen state of the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenState {
    Unauthorized,
    Authorizing,
    AuthorizedStale,
    Refreshing,
    AuthorizedFresh,
    Training,
    TrainingComplete,
    TrainingFailed,
}

impl ScreenState {
    /// State on screen load: stale if a grant was recorded, else unauthorized
    pub fn on_load<P: PreferenceStore + ?Sized>(store: &P) -> Self {
        if store.get_bool(MetricKey::HealthKitAuthorized) == Some(true) {
            ScreenState::AuthorizedStale
        } else {
            ScreenState::Unauthorized
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenState::Unauthorized => "unauthorized",
            ScreenState::Authorizing => "authorizing",
            ScreenState::AuthorizedStale => "authorized_stale",
            ScreenState::Refreshing => "refreshing",
            ScreenState::AuthorizedFresh => "authorized_fresh",
            ScreenState::Training => "training",
            ScreenState::TrainingComplete => "training_complete",
            ScreenState::TrainingFailed => "training_failed",
        }
    }
}

/// A user-facing alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Formatted dashboard contents. Absent values have no label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub state: ScreenState,
    pub authorized_status: String,
    pub age: Option<String>,
    pub biological_sex: Option<String>,
    pub blood_type: Option<String>,
    pub weight: Option<String>,
    pub height: Option<String>,
    pub body_mass_index: Option<String>,
    pub step_count: Option<String>,
    pub training_result: Option<String>,
}

impl DashboardView {
    /// Build the view from the persisted metrics
    pub fn from_store<P: PreferenceStore + ?Sized>(state: ScreenState, store: &P) -> Self {
        let authorized = store.get_bool(MetricKey::HealthKitAuthorized) == Some(true);
        Self {
            state,
            authorized_status: if authorized { "Authorized" } else { "Unauthorized" }.to_string(),
            age: store.get_int(MetricKey::Age).map(|age| age.to_string()),
            biological_sex: store.get_text(MetricKey::BiologicalSex),
            blood_type: store.get_text(MetricKey::BloodType),
            weight: store.get_double(MetricKey::WeightInKilograms).map(format_mass),
            height: store.get_double(MetricKey::HeightInMeters).map(format_height),
            body_mass_index: store.get_double(MetricKey::BodyMassIndex).map(format_bmi),
            step_count: store.get_double(MetricKey::StepCount).map(format_steps),
            training_result: store.get_text(MetricKey::TrainingResult),
        }
    }
}

pub fn format_mass(kilograms: f64) -> String {
    format!("{kilograms:.1} kg")
}

pub fn format_height(meters: f64) -> String {
    format!("{meters:.2} m")
}

pub fn format_bmi(bmi: f64) -> String {
    format!("{bmi:.2}")
}

pub fn format_steps(steps: f64) -> String {
    format!("{}", steps.round() as i64)
}

/// View seam: receives complete renders and alerts
pub trait Presenter: Send {
    fn render(&mut self, view: &DashboardView);

    fn alert(&mut self, alert: &Alert);
}

/// Presenter for runs with no visible UI. Alerts are logged and kept.
#[derive(Debug, Default)]
pub struct HeadlessPresenter {
    last_view: Option<DashboardView>,
    alerts: Vec<Alert>,
}

impl HeadlessPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_view(&self) -> Option<&DashboardView> {
        self.last_view.as_ref()
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }
}

impl Presenter for HeadlessPresenter {
    fn render(&mut self, view: &DashboardView) {
        debug!(state = view.state.as_str(), "render");
        self.last_view = Some(view.clone());
    }

    fn alert(&mut self, alert: &Alert) {
        warn!(title = %alert.title, message = %alert.message, "alert");
        self.alerts.push(alert.clone());
    }
}

/// One of the concurrent metric loads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricLoad {
    AgeSexAndBloodType,
    Height,
    Weight,
    StepCount,
}

impl MetricLoad {
    pub fn alert_title(&self) -> &'static str {
        match self {
            MetricLoad::AgeSexAndBloodType => "Error Loading Age, Sex and Blood Type",
            MetricLoad::Height => "Error Loading Height",
            MetricLoad::Weight => "Error Loading Weight",
            MetricLoad::StepCount => "Error Loading Step Count",
        }
    }
}

enum LoadedMetric {
    AgeSexAndBloodType(AgeSexAndBloodType),
    Height(f64),
    Weight(f64),
    StepCount(f64),
}

/// Loads that failed during a refresh
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub failures: Vec<(MetricLoad, ArtificienError)>,
}

impl RefreshReport {
    /// Whether all four loads succeeded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Controller for the health dashboard screen
pub struct HealthDashboard<S, P, V> {
    gateway: HealthDataGateway<S>,
    store: P,
    presenter: V,
    profile: HealthProfile,
    state: ScreenState,
    step_window_days: i64,
}

impl<S, P, V> HealthDashboard<S, P, V>
where
    S: HealthStore,
    P: PreferenceStore + Send,
    V: Presenter,
{
    /// Load the screen. A grant recorded in the store starts the screen stale.
    pub fn new(gateway: HealthDataGateway<S>, store: P, presenter: V) -> Self {
        let state = ScreenState::on_load(&store);
        let mut dashboard = Self {
            gateway,
            store,
            presenter,
            profile: HealthProfile::default(),
            state,
            step_window_days: DEFAULT_STEP_WINDOW_DAYS,
        };
        dashboard.render();
        dashboard
    }

    pub fn with_step_window(mut self, days: i64) -> Self {
        self.step_window_days = days;
        self
    }

    pub fn state(&self) -> ScreenState {
        self.state
    }

    pub fn profile(&self) -> &HealthProfile {
        &self.profile
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn presenter(&self) -> &V {
        &self.presenter
    }

    pub fn gateway(&self) -> &HealthDataGateway<S> {
        &self.gateway
    }

    pub fn into_store(self) -> P {
        self.store
    }

    /// Current view built from the store
    pub fn view(&self) -> DashboardView {
        DashboardView::from_store(self.state, &self.store)
    }

    pub fn render(&mut self) {
        let view = self.view();
        self.presenter.render(&view);
    }

    fn transition(&mut self, next: ScreenState) {
        info!(from = self.state.as_str(), to = next.as_str(), "dashboard state");
        self.state = next;
        self.render();
    }

    fn raise(&mut self, alert: Alert) {
        self.presenter.alert(&alert);
    }

    /// Request health data access
    pub async fn authorize(&mut self) -> Result<bool, ArtificienError> {
        self.transition(ScreenState::Authorizing);

        match self.gateway.authorize().await {
            Ok(true) => match self.store.set(MetricKey::HealthKitAuthorized, true.into()) {
                Ok(()) => {
                    self.transition(ScreenState::AuthorizedStale);
                    Ok(true)
                }
                Err(e) => {
                    warn!(error = %e, "failed to persist health data grant");
                    self.raise(Alert::new("HealthKit Authorization Error", e.to_string()));
                    self.transition(ScreenState::Unauthorized);
                    Err(e)
                }
            },
            Ok(false) => {
                self.raise(Alert::new(
                    "HealthKit Authorization Error",
                    "Please give Artificien access to all HealthKit data.",
                ));
                self.transition(ScreenState::Unauthorized);
                Ok(false)
            }
            Err(e) => {
                self.raise(Alert::new("HealthKit Authorization Error", e.to_string()));
                self.transition(ScreenState::Unauthorized);
                Err(e)
            }
        }
    }

    /// Load all metrics concurrently and persist each as it completes.
    ///
    /// Ends fresh when every load succeeded. Otherwise the screen stays stale,
    /// or unauthorized if no grant has been recorded.
    pub async fn refresh(&mut self) -> RefreshReport {
        self.transition(ScreenState::Refreshing);

        let mut report = RefreshReport::default();
        {
            let Self {
                gateway,
                store,
                presenter,
                profile,
                state,
                step_window_days,
            } = &mut *self;
            let gateway = &*gateway;
            let window = *step_window_days;

            let mut loads: FuturesUnordered<
                BoxFuture<'_, (MetricLoad, Result<LoadedMetric, ArtificienError>)>,
            > = FuturesUnordered::new();
            loads.push(
                async move {
                    let result = gateway.read_age_sex_and_blood_type().await;
                    (
                        MetricLoad::AgeSexAndBloodType,
                        result.map(LoadedMetric::AgeSexAndBloodType),
                    )
                }
                .boxed(),
            );
            loads.push(
                async move {
                    let result = gateway.most_recent_quantity(QuantityType::Height).await;
                    (MetricLoad::Height, result.map(LoadedMetric::Height))
                }
                .boxed(),
            );
            loads.push(
                async move {
                    let result = gateway.most_recent_quantity(QuantityType::BodyMass).await;
                    (MetricLoad::Weight, result.map(LoadedMetric::Weight))
                }
                .boxed(),
            );
            loads.push(
                async move {
                    let result = gateway.step_count_total(window).await;
                    (MetricLoad::StepCount, result.map(LoadedMetric::StepCount))
                }
                .boxed(),
            );

            while let Some((load, result)) = loads.next().await {
                let applied =
                    result.and_then(|metric| apply_metric(metric, &mut *profile, &mut *store));
                if let Err(e) = applied {
                    warn!(load = ?load, error = %e, "metric load failed");
                    presenter.alert(&Alert::new(load.alert_title(), e.to_string()));
                    report.failures.push((load, e));
                }
                presenter.render(&DashboardView::from_store(*state, &*store));
            }
        }

        let next = if report.is_complete() {
            ScreenState::AuthorizedFresh
        } else if self.store.get_bool(MetricKey::HealthKitAuthorized) == Some(true) {
            ScreenState::AuthorizedStale
        } else {
            ScreenState::Unauthorized
        };
        self.transition(next);
        report
    }

    /// Run one training cycle on the stored metrics
    pub async fn train<J>(&mut self, job: &mut J) -> Result<TrainingOutcome, ArtificienError>
    where
        J: FederatedJob + ?Sized,
    {
        self.transition(ScreenState::Training);

        let result = TrainingSession::run_cycle(job, &mut self.store).await;
        match &result {
            Ok(TrainingOutcome::Completed { .. }) => {
                self.transition(ScreenState::TrainingComplete);
            }
            Ok(TrainingOutcome::Rejected { retry_after }) => {
                let rejection = ArtificienError::JobRejected {
                    retry_after: *retry_after,
                };
                self.raise(Alert::new("Training Rejected", rejection.to_string()));
                self.transition(ScreenState::TrainingFailed);
            }
            Err(e) => {
                self.raise(Alert::new("Training Error", e.to_string()));
                self.transition(ScreenState::TrainingFailed);
            }
        }
        result
    }
}

/// Apply one completed load to the profile and write its keys
fn apply_metric<P: PreferenceStore + ?Sized>(
    metric: LoadedMetric,
    profile: &mut HealthProfile,
    store: &mut P,
) -> Result<(), ArtificienError> {
    match metric {
        LoadedMetric::AgeSexAndBloodType(loaded) => {
            profile.age = Some(loaded.age);
            profile.biological_sex = Some(loaded.biological_sex);
            profile.blood_type = Some(loaded.blood_type);
            store.set(MetricKey::Age, loaded.age.into())?;
            store.set(MetricKey::BiologicalSex, loaded.biological_sex.label().into())?;
            store.set(MetricKey::BloodType, loaded.blood_type.label().into())?;
        }
        LoadedMetric::Height(height) => {
            profile.height_in_meters = Some(height);
            store.set(MetricKey::HeightInMeters, height.into())?;
            write_body_mass_index(profile, store)?;
        }
        LoadedMetric::Weight(weight) => {
            profile.weight_in_kilograms = Some(weight);
            store.set(MetricKey::WeightInKilograms, weight.into())?;
            write_body_mass_index(profile, store)?;
        }
        LoadedMetric::StepCount(steps) => {
            profile.step_count = Some(steps);
            store.set(MetricKey::StepCount, steps.into())?;
        }
    }
    Ok(())
}

fn write_body_mass_index<P: PreferenceStore + ?Sized>(
    profile: &HealthProfile,
    store: &mut P,
) -> Result<(), ArtificienError> {
    if let Some(bmi) = profile.body_mass_index() {
        store.set(MetricKey::BodyMassIndex, bmi.into())?;
    }
    Ok(())
}
