//! Local preference store
//!
//! This module persists the latest known metric values and the most recent
//! training result across launches. Keys form a closed enumeration, and each
//! key is independently optional: absence means the value was never loaded.
//! Writes are per key; there is no transaction spanning several keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ArtificienError;

/// Current version of the persisted preference document
pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Keys of the persisted metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKey {
    HealthKitAuthorized,
    Age,
    BiologicalSex,
    BloodType,
    WeightInKilograms,
    HeightInMeters,
    BodyMassIndex,
    StepCount,
    TrainingResult,
}

impl MetricKey {
    pub const ALL: [MetricKey; 9] = [
        MetricKey::HealthKitAuthorized,
        MetricKey::Age,
        MetricKey::BiologicalSex,
        MetricKey::BloodType,
        MetricKey::WeightInKilograms,
        MetricKey::HeightInMeters,
        MetricKey::BodyMassIndex,
        MetricKey::StepCount,
        MetricKey::TrainingResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKey::HealthKitAuthorized => "healthKitAuthorized",
            MetricKey::Age => "age",
            MetricKey::BiologicalSex => "biologicalSex",
            MetricKey::BloodType => "bloodType",
            MetricKey::WeightInKilograms => "weightInKilograms",
            MetricKey::HeightInMeters => "heightInMeters",
            MetricKey::BodyMassIndex => "bodyMassIndex",
            MetricKey::StepCount => "stepCount",
            MetricKey::TrainingResult => "trainingResult",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Kind of value the key holds
    pub fn kind(&self) -> ValueKind {
        match self {
            MetricKey::HealthKitAuthorized => ValueKind::Bool,
            MetricKey::Age => ValueKind::Int,
            MetricKey::WeightInKilograms
            | MetricKey::HeightInMeters
            | MetricKey::BodyMassIndex
            | MetricKey::StepCount => ValueKind::Double,
            MetricKey::BiologicalSex | MetricKey::BloodType | MetricKey::TrainingResult => {
                ValueKind::Text
            }
        }
    }

    /// Check a value against the key's kind.
    ///
    /// Whole doubles are accepted for integer keys and integers for double keys.
    pub fn conform(&self, value: PreferenceValue) -> Result<PreferenceValue, ArtificienError> {
        match (self.kind(), value) {
            (ValueKind::Bool, value @ PreferenceValue::Bool(_))
            | (ValueKind::Int, value @ PreferenceValue::Int(_))
            | (ValueKind::Double, value @ PreferenceValue::Double(_))
            | (ValueKind::Text, value @ PreferenceValue::Text(_)) => Ok(value),
            (ValueKind::Double, PreferenceValue::Int(v)) => Ok(PreferenceValue::Double(v as f64)),
            (ValueKind::Int, PreferenceValue::Double(v))
                if v.is_finite()
                    && v.fract() == 0.0
                    && v >= i64::MIN as f64
                    && v < i64::MAX as f64 =>
            {
                Ok(PreferenceValue::Int(v as i64))
            }
            (kind, value) => Err(ArtificienError::StorageError(format!(
                "{} holds {} values, got {}",
                self.as_str(),
                kind.as_str(),
                value.kind().as_str()
            ))),
        }
    }
}

/// Kind of a scalar preference value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Double,
    Text,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Bool => "boolean",
            ValueKind::Int => "integer",
            ValueKind::Double => "number",
            ValueKind::Text => "text",
        }
    }
}

/// A scalar preference value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreferenceValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
}

impl PreferenceValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            PreferenceValue::Bool(_) => ValueKind::Bool,
            PreferenceValue::Int(_) => ValueKind::Int,
            PreferenceValue::Double(_) => ValueKind::Double,
            PreferenceValue::Text(_) => ValueKind::Text,
        }
    }
}

impl From<bool> for PreferenceValue {
    fn from(v: bool) -> Self {
        PreferenceValue::Bool(v)
    }
}

impl From<i32> for PreferenceValue {
    fn from(v: i32) -> Self {
        PreferenceValue::Int(v as i64)
    }
}

impl From<f64> for PreferenceValue {
    fn from(v: f64) -> Self {
        PreferenceValue::Double(v)
    }
}

impl From<&str> for PreferenceValue {
    fn from(v: &str) -> Self {
        PreferenceValue::Text(v.to_string())
    }
}

impl From<String> for PreferenceValue {
    fn from(v: String) -> Self {
        PreferenceValue::Text(v)
    }
}

/// Narrow read/write interface over the persisted metrics
pub trait PreferenceStore {
    fn get(&self, key: MetricKey) -> Option<PreferenceValue>;

    /// Write a value. Values of the wrong kind for the key are rejected.
    fn set(&mut self, key: MetricKey, value: PreferenceValue) -> Result<(), ArtificienError>;

    fn remove(&mut self, key: MetricKey) -> Result<(), ArtificienError>;

    fn get_bool(&self, key: MetricKey) -> Option<bool> {
        match self.get(key)? {
            PreferenceValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    fn get_int(&self, key: MetricKey) -> Option<i64> {
        match self.get(key)? {
            PreferenceValue::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Doubles, widening integers
    fn get_double(&self, key: MetricKey) -> Option<f64> {
        match self.get(key)? {
            PreferenceValue::Double(v) => Some(v),
            PreferenceValue::Int(v) => Some(v as f64),
            _ => None,
        }
    }

    fn get_text(&self, key: MetricKey) -> Option<String> {
        match self.get(key)? {
            PreferenceValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// On-disk document layout
#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferenceDocument {
    version: u32,
    entries: BTreeMap<MetricKey, PreferenceValue>,
}

/// Preference store held in memory only
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferenceStore {
    entries: BTreeMap<MetricKey, PreferenceValue>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load entries from a versioned JSON document
    pub fn from_json(json: &str) -> Result<Self, ArtificienError> {
        let document = parse_document(json)?;
        Ok(Self {
            entries: document.entries,
        })
    }

    /// Serialize entries to a versioned JSON document
    pub fn to_json(&self) -> Result<String, ArtificienError> {
        serialize_document(&self.entries)
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: MetricKey) -> Option<PreferenceValue> {
        self.entries.get(&key).cloned()
    }

    fn set(&mut self, key: MetricKey, value: PreferenceValue) -> Result<(), ArtificienError> {
        self.entries.insert(key, key.conform(value)?);
        Ok(())
    }

    fn remove(&mut self, key: MetricKey) -> Result<(), ArtificienError> {
        self.entries.remove(&key);
        Ok(())
    }
}

/// Preference store persisted to a JSON file, written through on every change
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    entries: BTreeMap<MetricKey, PreferenceValue>,
}

impl FilePreferenceStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ArtificienError> {
        let path = path.into();
        let entries = if path.exists() {
            let json = fs::read_to_string(&path)?;
            parse_document(&json)?.entries
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), entries = entries.len(), "opened preference store");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), ArtificienError> {
        let json = serialize_document(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: MetricKey) -> Option<PreferenceValue> {
        self.entries.get(&key).cloned()
    }

    fn set(&mut self, key: MetricKey, value: PreferenceValue) -> Result<(), ArtificienError> {
        self.entries.insert(key, key.conform(value)?);
        self.persist()
    }

    fn remove(&mut self, key: MetricKey) -> Result<(), ArtificienError> {
        if self.entries.remove(&key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

fn parse_document(json: &str) -> Result<PreferenceDocument, ArtificienError> {
    let mut document: PreferenceDocument = serde_json::from_str(json)?;
    if document.version > STORE_SCHEMA_VERSION {
        return Err(ArtificienError::StorageError(format!(
            "unsupported preference schema version {} (expected <= {})",
            document.version, STORE_SCHEMA_VERSION
        )));
    }
    document.entries = std::mem::take(&mut document.entries)
        .into_iter()
        .map(|(key, value)| -> Result<_, ArtificienError> { Ok((key, key.conform(value)?)) })
        .collect::<Result<_, _>>()?;
    Ok(document)
}

fn serialize_document(
    entries: &BTreeMap<MetricKey, PreferenceValue>,
) -> Result<String, ArtificienError> {
    #[derive(Serialize)]
    struct DocumentRef<'a> {
        version: u32,
        entries: &'a BTreeMap<MetricKey, PreferenceValue>,
    }

    Ok(serde_json::to_string_pretty(&DocumentRef {
        version: STORE_SCHEMA_VERSION,
        entries,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_absent_keys_are_none() {
        let store = MemoryPreferenceStore::new();
        for key in MetricKey::ALL {
            assert_eq!(store.get(key), None);
        }
    }

    #[test]
    fn test_typed_getters() {
        let mut store = MemoryPreferenceStore::new();
        store.set(MetricKey::Age, 34.into()).unwrap();
        store.set(MetricKey::HeightInMeters, 1.8.into()).unwrap();
        store.set(MetricKey::BiologicalSex, "Male".into()).unwrap();
        store.set(MetricKey::HealthKitAuthorized, true.into()).unwrap();

        assert_eq!(store.get_int(MetricKey::Age), Some(34));
        assert_eq!(store.get_double(MetricKey::Age), Some(34.0));
        assert_eq!(store.get_double(MetricKey::HeightInMeters), Some(1.8));
        assert_eq!(store.get_text(MetricKey::BiologicalSex), Some("Male".to_string()));
        assert_eq!(store.get_bool(MetricKey::HealthKitAuthorized), Some(true));
        assert_eq!(store.get_int(MetricKey::BiologicalSex), None);
    }

    #[test]
    fn test_serialization() {
        let mut store = MemoryPreferenceStore::new();
        store.set(MetricKey::Age, 34.into()).unwrap();
        store.set(MetricKey::WeightInKilograms, 72.0.into()).unwrap();
        store.set(MetricKey::BloodType, "O+".into()).unwrap();

        let json = store.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["entries"]["age"], 34);
        assert_eq!(value["entries"]["bloodType"], "O+");

        let loaded = MemoryPreferenceStore::from_json(&json).unwrap();
        // A whole-number double stays a double
        assert_eq!(
            loaded.get(MetricKey::WeightInKilograms),
            Some(PreferenceValue::Double(72.0))
        );
        assert_eq!(loaded.get(MetricKey::Age), Some(PreferenceValue::Int(34)));
    }

    #[test]
    fn test_rejects_newer_schema() {
        let json = r#"{ "version": 2, "entries": {} }"#;
        assert!(matches!(
            MemoryPreferenceStore::from_json(json),
            Err(ArtificienError::StorageError(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let json = r#"{ "version": 1, "entries": { "modelLoss": 0.5 } }"#;
        assert!(MemoryPreferenceStore::from_json(json).is_err());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        {
            let mut store = FilePreferenceStore::open(&path).unwrap();
            assert_eq!(store.get(MetricKey::StepCount), None);
            store.set(MetricKey::StepCount, 17.5.into()).unwrap();
            store.set(MetricKey::TrainingResult, "loss 0.6931".into()).unwrap();
        }

        let mut reopened = FilePreferenceStore::open(&path).unwrap();
        assert_eq!(reopened.get_double(MetricKey::StepCount), Some(17.5));
        assert_eq!(
            reopened.get_text(MetricKey::TrainingResult),
            Some("loss 0.6931".to_string())
        );

        reopened.remove(MetricKey::StepCount).unwrap();
        let reopened = FilePreferenceStore::open(&path).unwrap();
        assert_eq!(reopened.get(MetricKey::StepCount), None);
    }

    #[test]
    fn test_set_rejects_wrong_kind() {
        let mut store = MemoryPreferenceStore::new();

        assert!(matches!(
            store.set(MetricKey::HealthKitAuthorized, "yes".into()),
            Err(ArtificienError::StorageError(_))
        ));
        assert!(store.set(MetricKey::BiologicalSex, true.into()).is_err());
        assert!(store.set(MetricKey::StepCount, "many".into()).is_err());
        assert!(store.set(MetricKey::Age, 34.5.into()).is_err());
        for key in MetricKey::ALL {
            assert_eq!(store.get(key), None);
        }
    }

    #[test]
    fn test_set_conforms_numbers() {
        let mut store = MemoryPreferenceStore::new();
        store.set(MetricKey::Age, 34.0.into()).unwrap();
        store.set(MetricKey::StepCount, 1200.into()).unwrap();

        assert_eq!(store.get(MetricKey::Age), Some(PreferenceValue::Int(34)));
        assert_eq!(store.get(MetricKey::StepCount), Some(PreferenceValue::Double(1200.0)));
    }

    #[test]
    fn test_load_rejects_wrong_kind() {
        let json = r#"{ "version": 1, "entries": { "healthKitAuthorized": "yes" } }"#;
        assert!(matches!(
            MemoryPreferenceStore::from_json(json),
            Err(ArtificienError::StorageError(_))
        ));

        let json = r#"{ "version": 1, "entries": { "age": 34.0 } }"#;
        let store = MemoryPreferenceStore::from_json(json).unwrap();
        assert_eq!(store.get_int(MetricKey::Age), Some(34));
    }

    #[test]
    fn test_key_names() {
        assert_eq!(MetricKey::from_name("bodyMassIndex"), Some(MetricKey::BodyMassIndex));
        assert_eq!(MetricKey::from_name("modelLoss"), None);
        let json = serde_json::to_string(&MetricKey::HealthKitAuthorized).unwrap();
        assert_eq!(json, "\"healthKitAuthorized\"");
    }
}
