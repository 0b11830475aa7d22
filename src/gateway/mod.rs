//! Health data gateway
//!
//! This module wraps the platform's authorization and query APIs into typed
//! accessors. The gateway is a pure adapter: every call is a single round trip
//! to the platform store, with no retry and no caching. Platform errors are
//! returned unchanged.

mod snapshot;

pub use snapshot::{ConsentDecision, SnapshotHealthStore};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::debug;

use crate::error::ArtificienError;
use crate::types::{
    AgeSexAndBloodType, BiologicalSex, BloodType, HealthDataType, QuantitySample, QuantityType,
    READ_TYPES,
};

/// Default trailing window for step count aggregation
pub const DEFAULT_STEP_WINDOW_DAYS: i64 = 7;

/// Longest accepted step count window
pub const MAX_STEP_WINDOW_DAYS: i64 = 3650;

/// A single sample query against the platform store
#[derive(Debug, Clone, PartialEq)]
pub struct SampleQuery {
    pub quantity_type: QuantityType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Maximum number of samples, newest first
    pub limit: Option<usize>,
}

/// Trait for the device health-data platform
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Whether the device has a health-data store at all
    fn is_health_data_available(&self) -> bool;

    /// Whether the running platform knows about this data type
    fn is_type_available(&self, data_type: HealthDataType) -> bool;

    /// Request read access, prompting the user the first time.
    /// Returns whether access was granted.
    async fn request_authorization(
        &self,
        read_types: &[HealthDataType],
    ) -> Result<bool, ArtificienError>;

    async fn date_of_birth(&self) -> Result<NaiveDate, ArtificienError>;

    async fn biological_sex(&self) -> Result<BiologicalSex, ArtificienError>;

    async fn blood_type(&self) -> Result<BloodType, ArtificienError>;

    /// Run a sample query. Samples are returned newest first.
    async fn query_samples(&self, query: &SampleQuery)
        -> Result<Vec<QuantitySample>, ArtificienError>;
}

/// Source of the current time for window and age computations
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Typed accessors over a [`HealthStore`]
pub struct HealthDataGateway<S> {
    store: S,
    clock: Clock,
}

impl<S: HealthStore> HealthDataGateway<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(Utc::now),
        }
    }

    /// Create a gateway with a fixed notion of "now"
    pub fn with_clock(store: S, clock: Clock) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Request read access to the fixed set of metric types
    pub async fn authorize(&self) -> Result<bool, ArtificienError> {
        if !self.store.is_health_data_available() {
            return Err(ArtificienError::PlatformUnavailable);
        }

        if let Some(missing) = READ_TYPES
            .iter()
            .find(|t| !self.store.is_type_available(**t))
        {
            return Err(ArtificienError::TypeUnavailable(missing.name().to_string()));
        }

        let granted = self.store.request_authorization(&READ_TYPES).await?;
        debug!(granted, "health data authorization resolved");
        Ok(granted)
    }

    /// Read date of birth, biological sex and blood type characteristics
    pub async fn read_age_sex_and_blood_type(&self) -> Result<AgeSexAndBloodType, ArtificienError> {
        let date_of_birth = self.store.date_of_birth().await?;
        let biological_sex = self.store.biological_sex().await?;
        let blood_type = self.store.blood_type().await?;

        let today = self.now().date_naive();
        Ok(AgeSexAndBloodType {
            age: age_in_years(date_of_birth, today),
            biological_sex,
            blood_type,
        })
    }

    /// Query samples of a type in `[start, now]`, newest first
    pub async fn read_samples(
        &self,
        quantity_type: QuantityType,
        start: DateTime<Utc>,
        most_recent_only: bool,
    ) -> Result<Vec<QuantitySample>, ArtificienError> {
        let query = SampleQuery {
            quantity_type,
            start,
            end: self.now(),
            limit: most_recent_only.then_some(1),
        };

        let mut samples = self.store.query_samples(&query).await?;
        samples.sort_by(|a, b| b.end.cmp(&a.end));
        if let Some(limit) = query.limit {
            samples.truncate(limit);
        }

        debug!(
            quantity = quantity_type.as_str(),
            count = samples.len(),
            "sample query completed"
        );
        Ok(samples)
    }

    /// Value of the latest sample of a type, in its canonical unit
    pub async fn most_recent_quantity(
        &self,
        quantity_type: QuantityType,
    ) -> Result<f64, ArtificienError> {
        let samples = self
            .read_samples(quantity_type, DateTime::<Utc>::MIN_UTC, true)
            .await?;

        samples
            .first()
            .map(|s| s.value)
            .ok_or_else(|| ArtificienError::SampleNotFound(quantity_type.as_str().to_string()))
    }

    /// Total step count over the trailing window
    pub async fn step_count_total(&self, window_days: i64) -> Result<f64, ArtificienError> {
        let start = self.window_start(window_days)?;
        let samples = self
            .read_samples(QuantityType::StepCount, start, false)
            .await?;

        if samples.is_empty() {
            return Err(ArtificienError::SampleNotFound(format!(
                "step_count in the last {window_days} days"
            )));
        }

        Ok(sum_quantities(&samples))
    }

    /// Start of a trailing window of `window_days` ending now
    fn window_start(&self, window_days: i64) -> Result<DateTime<Utc>, ArtificienError> {
        if !(1..=MAX_STEP_WINDOW_DAYS).contains(&window_days) {
            return Err(ArtificienError::ConfigError(format!(
                "step window must be between 1 and {MAX_STEP_WINDOW_DAYS} days, got {window_days}"
            )));
        }
        Duration::try_days(window_days)
            .and_then(|window| self.now().checked_sub_signed(window))
            .ok_or_else(|| {
                ArtificienError::ConfigError(format!(
                    "step window of {window_days} days starts before the earliest date"
                ))
            })
    }
}

/// Sum the values of a set of samples
pub fn sum_quantities(samples: &[QuantitySample]) -> f64 {
    samples.iter().map(|s| s.value).sum()
}

/// Whole years between a birth date and a reference date
pub fn age_in_years(date_of_birth: NaiveDate, today: NaiveDate) -> i32 {
    match today.years_since(date_of_birth) {
        Some(years) => years as i32,
        // Birth date after today: count backwards
        None => -(date_of_birth.years_since(today).unwrap_or(0) as i32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn gateway(store: SnapshotHealthStore) -> HealthDataGateway<SnapshotHealthStore> {
        HealthDataGateway::with_clock(store, Arc::new(fixed_now))
    }

    fn step(value: f64, days_ago: i64) -> QuantitySample {
        let end = fixed_now() - Duration::days(days_ago);
        QuantitySample {
            quantity_type: QuantityType::StepCount,
            value,
            start: end - Duration::hours(1),
            end,
        }
    }

    #[test]
    fn test_age_in_years() {
        let dob = NaiveDate::from_ymd_opt(1990, 3, 16).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(age_in_years(dob, today), 33);

        let today = NaiveDate::from_ymd_opt(2024, 3, 16).unwrap();
        assert_eq!(age_in_years(dob, today), 34);
    }

    #[test]
    fn test_sum_quantities() {
        let samples = vec![step(3.0, 1), step(4.5, 2), step(10.0, 3)];
        assert!((sum_quantities(&samples) - 17.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_authorize_platform_unavailable() {
        let gateway = gateway(SnapshotHealthStore::unavailable());
        let result = gateway.authorize().await;
        assert!(matches!(result, Err(ArtificienError::PlatformUnavailable)));
    }

    #[tokio::test]
    async fn test_authorize_type_unavailable() {
        let store = SnapshotHealthStore::new(ConsentDecision::Grant).without_type("step_count");
        let result = gateway(store).authorize().await;
        match result {
            Err(ArtificienError::TypeUnavailable(name)) => assert_eq!(name, "step_count"),
            other => panic!("expected TypeUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reauthorization_does_not_prompt_again() {
        let gateway = gateway(SnapshotHealthStore::new(ConsentDecision::Grant));

        assert!(gateway.authorize().await.unwrap());
        assert!(gateway.authorize().await.unwrap());
        assert_eq!(gateway.store().prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_denied_authorization_is_remembered() {
        let gateway = gateway(SnapshotHealthStore::new(ConsentDecision::Deny));

        assert!(!gateway.authorize().await.unwrap());
        assert!(!gateway.authorize().await.unwrap());
        assert_eq!(gateway.store().prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_step_count_total_over_window() {
        let store = SnapshotHealthStore::new(ConsentDecision::Grant)
            .with_sample(step(3.0, 1))
            .with_sample(step(4.5, 3))
            .with_sample(step(10.0, 6))
            // Outside the 7-day window
            .with_sample(step(500.0, 9));
        let gateway = gateway(store);
        gateway.authorize().await.unwrap();

        let total = gateway.step_count_total(DEFAULT_STEP_WINDOW_DAYS).await.unwrap();
        assert!((total - 17.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_step_count_empty_window_is_not_found() {
        let gateway = gateway(SnapshotHealthStore::new(ConsentDecision::Grant));
        gateway.authorize().await.unwrap();

        let result = gateway.step_count_total(DEFAULT_STEP_WINDOW_DAYS).await;
        assert!(matches!(result, Err(ArtificienError::SampleNotFound(_))));
    }

    #[tokio::test]
    async fn test_step_window_out_of_range_is_config_error() {
        let gateway = gateway(SnapshotHealthStore::new(ConsentDecision::Grant));
        gateway.authorize().await.unwrap();

        for window in [0, -3, MAX_STEP_WINDOW_DAYS + 1, 100_000_000, i64::MAX] {
            let result = gateway.step_count_total(window).await;
            assert!(
                matches!(result, Err(ArtificienError::ConfigError(_))),
                "window {window}: {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_step_window_start_before_earliest_date() {
        let store = SnapshotHealthStore::new(ConsentDecision::Grant);
        let gateway = HealthDataGateway::with_clock(store, Arc::new(|| DateTime::<Utc>::MIN_UTC));
        gateway.authorize().await.unwrap();

        let result = gateway.step_count_total(DEFAULT_STEP_WINDOW_DAYS).await;
        assert!(matches!(result, Err(ArtificienError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_read_samples_most_recent_only() {
        let height = |value: f64, days_ago: i64| QuantitySample {
            quantity_type: QuantityType::Height,
            value,
            start: fixed_now() - Duration::days(days_ago),
            end: fixed_now() - Duration::days(days_ago),
        };
        let store = SnapshotHealthStore::new(ConsentDecision::Grant)
            .with_sample(height(1.78, 30))
            .with_sample(height(1.80, 2))
            .with_sample(height(1.79, 10));
        let gateway = gateway(store);
        gateway.authorize().await.unwrap();

        let all = gateway
            .read_samples(QuantityType::Height, DateTime::<Utc>::MIN_UTC, false)
            .await
            .unwrap();
        let values: Vec<f64> = all.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.80, 1.79, 1.78]);

        let latest = gateway.most_recent_quantity(QuantityType::Height).await.unwrap();
        assert_eq!(latest, 1.80);
    }

    #[tokio::test]
    async fn test_most_recent_quantity_missing() {
        let gateway = gateway(SnapshotHealthStore::new(ConsentDecision::Grant));
        gateway.authorize().await.unwrap();

        let result = gateway.most_recent_quantity(QuantityType::BodyMass).await;
        assert!(matches!(result, Err(ArtificienError::SampleNotFound(_))));
    }

    #[tokio::test]
    async fn test_read_age_sex_and_blood_type() {
        let store = SnapshotHealthStore::new(ConsentDecision::Grant).with_characteristics(
            NaiveDate::from_ymd_opt(1994, 7, 1).unwrap(),
            BiologicalSex::Female,
            BloodType::ONegative,
        );
        let gateway = gateway(store);
        gateway.authorize().await.unwrap();

        let result = gateway.read_age_sex_and_blood_type().await.unwrap();
        assert_eq!(result.age, 29);
        assert_eq!(result.biological_sex, BiologicalSex::Female);
        assert_eq!(result.blood_type, BloodType::ONegative);
    }

    #[tokio::test]
    async fn test_reads_before_authorization_are_denied() {
        let gateway = gateway(SnapshotHealthStore::new(ConsentDecision::Grant));
        let result = gateway.read_age_sex_and_blood_type().await;
        assert!(matches!(result, Err(ArtificienError::AuthorizationDenied(_))));
    }
}
