//! Snapshot health store
//!
//! Plays the role of the device health-data platform from a JSON health
//! export. Sample values are converted to canonical units on load, and the
//! consent prompt is simulated: the first authorization request records a
//! decision that later requests return without prompting.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::{HealthStore, SampleQuery};
use crate::error::ArtificienError;
use crate::types::{BiologicalSex, BloodType, HealthDataType, QuantitySample, QuantityType};

/// Decision the simulated user makes at the consent prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentDecision {
    Grant,
    Deny,
}

/// Health store backed by an in-memory snapshot of platform data
pub struct SnapshotHealthStore {
    available: bool,
    unsupported_types: HashSet<String>,
    consent: ConsentDecision,
    /// Decision recorded by the first prompt
    authorization: Mutex<Option<bool>>,
    prompts: AtomicUsize,
    date_of_birth: Option<NaiveDate>,
    biological_sex: Option<BiologicalSex>,
    blood_type: Option<BloodType>,
    samples: Vec<QuantitySample>,
}

impl SnapshotHealthStore {
    /// Empty store on a device with health data available
    pub fn new(consent: ConsentDecision) -> Self {
        Self {
            available: true,
            unsupported_types: HashSet::new(),
            consent,
            authorization: Mutex::new(None),
            prompts: AtomicUsize::new(0),
            date_of_birth: None,
            biological_sex: None,
            blood_type: None,
            samples: Vec::new(),
        }
    }

    /// Store on a device without any health-data platform
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(ConsentDecision::Deny)
        }
    }

    pub fn with_characteristics(
        mut self,
        date_of_birth: NaiveDate,
        biological_sex: BiologicalSex,
        blood_type: BloodType,
    ) -> Self {
        self.date_of_birth = Some(date_of_birth);
        self.biological_sex = Some(biological_sex);
        self.blood_type = Some(blood_type);
        self
    }

    pub fn with_sample(mut self, sample: QuantitySample) -> Self {
        self.samples.push(sample);
        self
    }

    /// Mark a data type as not registered on this platform version
    pub fn without_type(mut self, name: &str) -> Self {
        self.unsupported_types.insert(name.to_string());
        self
    }

    /// Parse a JSON health export
    pub fn from_json(raw_json: &str) -> Result<Self, ArtificienError> {
        let export: HealthExport = serde_json::from_str(raw_json)?;

        let mut samples = Vec::with_capacity(export.samples.len());
        for raw in export.samples {
            samples.push(convert_sample(raw)?);
        }

        let characteristics = export.characteristics.unwrap_or_default();
        let date_of_birth = characteristics
            .date_of_birth
            .map(|d| {
                NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .map_err(|e| ArtificienError::StorageError(format!("date_of_birth {d}: {e}")))
            })
            .transpose()?;

        debug!(samples = samples.len(), "loaded health export");

        Ok(Self {
            available: export.available,
            unsupported_types: export.unsupported_types.into_iter().collect(),
            consent: export.consent,
            authorization: Mutex::new(None),
            prompts: AtomicUsize::new(0),
            date_of_birth,
            biological_sex: characteristics.biological_sex,
            blood_type: characteristics.blood_type,
            samples,
        })
    }

    /// Load a JSON health export from disk
    pub fn from_path(path: &Path) -> Result<Self, ArtificienError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Number of times the consent prompt was shown
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Forget the recorded decision, as if the user changed it in settings
    pub fn reset_authorization(&self) {
        if let Ok(mut auth) = self.authorization.lock() {
            *auth = None;
        }
    }

    fn ensure_authorized(&self, what: &str) -> Result<(), ArtificienError> {
        let granted = self
            .authorization
            .lock()
            .map(|auth| *auth == Some(true))
            .unwrap_or(false);
        if granted {
            Ok(())
        } else {
            Err(ArtificienError::AuthorizationDenied(format!(
                "read access to {what} has not been granted"
            )))
        }
    }
}

#[async_trait]
impl HealthStore for SnapshotHealthStore {
    fn is_health_data_available(&self) -> bool {
        self.available
    }

    fn is_type_available(&self, data_type: HealthDataType) -> bool {
        !self.unsupported_types.contains(data_type.name())
    }

    async fn request_authorization(
        &self,
        _read_types: &[HealthDataType],
    ) -> Result<bool, ArtificienError> {
        let mut auth = self
            .authorization
            .lock()
            .map_err(|_| ArtificienError::StorageError("authorization state poisoned".into()))?;

        if let Some(granted) = *auth {
            return Ok(granted);
        }

        self.prompts.fetch_add(1, Ordering::SeqCst);
        let granted = self.consent == ConsentDecision::Grant;
        info!(granted, "presented health data consent prompt");
        *auth = Some(granted);
        Ok(granted)
    }

    async fn date_of_birth(&self) -> Result<NaiveDate, ArtificienError> {
        self.ensure_authorized("date_of_birth")?;
        self.date_of_birth
            .ok_or_else(|| ArtificienError::SampleNotFound("date_of_birth".to_string()))
    }

    async fn biological_sex(&self) -> Result<BiologicalSex, ArtificienError> {
        self.ensure_authorized("biological_sex")?;
        self.biological_sex
            .ok_or_else(|| ArtificienError::SampleNotFound("biological_sex".to_string()))
    }

    async fn blood_type(&self) -> Result<BloodType, ArtificienError> {
        self.ensure_authorized("blood_type")?;
        self.blood_type
            .ok_or_else(|| ArtificienError::SampleNotFound("blood_type".to_string()))
    }

    async fn query_samples(
        &self,
        query: &SampleQuery,
    ) -> Result<Vec<QuantitySample>, ArtificienError> {
        self.ensure_authorized(query.quantity_type.as_str())?;

        let mut matched: Vec<QuantitySample> = self
            .samples
            .iter()
            .filter(|s| s.quantity_type == query.quantity_type)
            .filter(|s| s.end >= query.start && s.end <= query.end)
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.end.cmp(&a.end));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

/// Convert an exported sample to canonical units
fn convert_sample(raw: ExportSample) -> Result<QuantitySample, ArtificienError> {
    let factor = match (raw.quantity_type, raw.unit.as_deref()) {
        (QuantityType::Height, None | Some("m")) => 1.0,
        (QuantityType::Height, Some("cm")) => 0.01,
        (QuantityType::Height, Some("in")) => 0.0254,
        (QuantityType::Height, Some("ft")) => 0.3048,
        (QuantityType::BodyMass, None | Some("kg")) => 1.0,
        (QuantityType::BodyMass, Some("g")) => 0.001,
        (QuantityType::BodyMass, Some("lb")) => 0.453_592_37,
        (QuantityType::StepCount | QuantityType::BodyMassIndex, None | Some("count")) => 1.0,
        (quantity_type, Some(unit)) => {
            return Err(ArtificienError::StorageError(format!(
                "unsupported unit {unit} for {}",
                quantity_type.as_str()
            )))
        }
    };

    Ok(QuantitySample {
        quantity_type: raw.quantity_type,
        value: raw.value * factor,
        start: raw.start,
        end: raw.end.unwrap_or(raw.start),
    })
}

// Health export structures

#[derive(Debug, Deserialize)]
struct HealthExport {
    #[serde(default = "default_available")]
    available: bool,
    #[serde(default)]
    unsupported_types: Vec<String>,
    #[serde(default = "default_consent")]
    consent: ConsentDecision,
    characteristics: Option<ExportCharacteristics>,
    #[serde(default)]
    samples: Vec<ExportSample>,
}

fn default_available() -> bool {
    true
}

fn default_consent() -> ConsentDecision {
    ConsentDecision::Grant
}

#[derive(Debug, Default, Deserialize)]
struct ExportCharacteristics {
    date_of_birth: Option<String>,
    biological_sex: Option<BiologicalSex>,
    blood_type: Option<BloodType>,
}

#[derive(Debug, Deserialize)]
struct ExportSample {
    #[serde(rename = "type")]
    quantity_type: QuantityType,
    value: f64,
    unit: Option<String>,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_export_json() -> &'static str {
        r#"{
            "consent": "grant",
            "characteristics": {
                "date_of_birth": "1990-05-20",
                "biological_sex": "male",
                "blood_type": "AB+"
            },
            "samples": [
                { "type": "height", "value": 180.0, "unit": "cm", "start": "2024-03-01T08:00:00Z" },
                { "type": "body_mass", "value": 176.0, "unit": "lb", "start": "2024-03-10T08:00:00Z" },
                { "type": "step_count", "value": 4200, "start": "2024-03-12T08:00:00Z", "end": "2024-03-12T20:00:00Z" }
            ]
        }"#
    }

    #[tokio::test]
    async fn test_parse_health_export() {
        let store = SnapshotHealthStore::from_json(sample_export_json()).unwrap();
        assert!(store.is_health_data_available());
        assert!(store.request_authorization(&[]).await.unwrap());

        assert_eq!(store.biological_sex().await.unwrap(), BiologicalSex::Male);
        assert_eq!(store.blood_type().await.unwrap(), BloodType::AbPositive);
        assert_eq!(
            store.date_of_birth().await.unwrap(),
            NaiveDate::from_ymd_opt(1990, 5, 20).unwrap()
        );

        let query = SampleQuery {
            quantity_type: QuantityType::Height,
            start: DateTime::<Utc>::MIN_UTC,
            end: Utc::now(),
            limit: None,
        };
        let heights = store.query_samples(&query).await.unwrap();
        assert_eq!(heights.len(), 1);
        assert!((heights[0].value - 1.8).abs() < 1e-9);

        let query = SampleQuery {
            quantity_type: QuantityType::BodyMass,
            ..query
        };
        let weights = store.query_samples(&query).await.unwrap();
        // 176 lb = 79.83 kg
        assert!((weights[0].value - 79.832).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_missing_characteristics_are_not_found() {
        let store = SnapshotHealthStore::from_json(r#"{ "consent": "grant" }"#).unwrap();
        store.request_authorization(&[]).await.unwrap();

        assert!(matches!(
            store.blood_type().await,
            Err(ArtificienError::SampleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_authorization_prompts_again() {
        let store = SnapshotHealthStore::new(ConsentDecision::Grant);
        store.request_authorization(&[]).await.unwrap();
        store.reset_authorization();
        store.request_authorization(&[]).await.unwrap();
        assert_eq!(store.prompt_count(), 2);
    }

    #[test]
    fn test_unsupported_unit() {
        let json = r#"{
            "samples": [{ "type": "height", "value": 3.0, "unit": "furlong", "start": "2024-03-01T08:00:00Z" }]
        }"#;
        assert!(SnapshotHealthStore::from_json(json).is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            SnapshotHealthStore::from_json("not valid json"),
            Err(ArtificienError::JsonError(_))
        ));
    }
}
