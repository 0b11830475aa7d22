//! Feature preparation
//!
//! This module builds the fixed-order feature vector submitted for training
//! from the persisted metrics:
//! - age
//! - body mass index
//! - sex, encoded as 1 for "Male" and 0 otherwise
//! - step count over the trailing window

use crate::store::{MetricKey, PreferenceStore};
use crate::types::{BiologicalSex, FeatureVector};

/// Keys that must be present to build a feature vector, in feature order
pub const REQUIRED_KEYS: [MetricKey; 4] = [
    MetricKey::Age,
    MetricKey::BodyMassIndex,
    MetricKey::BiologicalSex,
    MetricKey::StepCount,
];

/// Prepares feature vectors from the preference store
pub struct AppDataPreparer;

impl AppDataPreparer {
    /// Build the feature vector, or `None` if any required value is missing.
    ///
    /// Values are not range-checked.
    pub fn prepare<P: PreferenceStore + ?Sized>(store: &P) -> Option<FeatureVector> {
        let age = store.get_int(MetricKey::Age)?;
        let body_mass_index = store.get_double(MetricKey::BodyMassIndex)?;
        let sex = store.get_text(MetricKey::BiologicalSex)?;
        let step_count = store.get_double(MetricKey::StepCount)?;

        Some(FeatureVector {
            age: age as f64,
            body_mass_index,
            sex: sex_feature(&sex),
            step_count,
        })
    }

    /// Required keys that are absent (or of the wrong type) in the store
    pub fn missing_fields<P: PreferenceStore + ?Sized>(store: &P) -> Vec<MetricKey> {
        REQUIRED_KEYS
            .into_iter()
            .filter(|key| match key {
                MetricKey::Age => store.get_int(*key).is_none(),
                MetricKey::BiologicalSex => store.get_text(*key).is_none(),
                _ => store.get_double(*key).is_none(),
            })
            .collect()
    }
}

/// Encode a sex label: "Male" is 1, every other label is 0
pub fn sex_feature(label: &str) -> f64 {
    if label == BiologicalSex::Male.label() {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPreferenceStore;
    use pretty_assertions::assert_eq;

    fn make_complete_store() -> MemoryPreferenceStore {
        let mut store = MemoryPreferenceStore::new();
        store.set(MetricKey::Age, 34.into()).unwrap();
        store.set(MetricKey::BodyMassIndex, 24.7.into()).unwrap();
        store.set(MetricKey::BiologicalSex, "Male".into()).unwrap();
        store.set(MetricKey::StepCount, 17.5.into()).unwrap();
        store
    }

    #[test]
    fn test_prepare_fixed_order() {
        let store = make_complete_store();
        let features = AppDataPreparer::prepare(&store).unwrap();
        assert_eq!(features.to_array(), [34.0, 24.7, 1.0, 17.5]);
    }

    #[test]
    fn test_prepare_absent_when_any_field_missing() {
        for key in REQUIRED_KEYS {
            let mut store = make_complete_store();
            store.remove(key).unwrap();
            assert_eq!(AppDataPreparer::prepare(&store), None, "missing {key:?}");
            assert_eq!(AppDataPreparer::missing_fields(&store), vec![key]);
        }
    }

    #[test]
    fn test_unrelated_fields_not_required() {
        let mut store = make_complete_store();
        store.remove(MetricKey::HeightInMeters).unwrap();
        store.remove(MetricKey::BloodType).unwrap();
        assert!(AppDataPreparer::prepare(&store).is_some());
        assert!(AppDataPreparer::missing_fields(&store).is_empty());
    }

    #[test]
    fn test_sex_encoding() {
        assert_eq!(sex_feature("Male"), 1.0);
        assert_eq!(sex_feature("Female"), 0.0);
        assert_eq!(sex_feature("Other"), 0.0);
        assert_eq!(sex_feature("Unknown"), 0.0);
        assert_eq!(sex_feature("male"), 0.0);
        assert_eq!(sex_feature("Robot"), 0.0);
    }

    #[test]
    fn test_no_range_checks() {
        let mut store = make_complete_store();
        store.set(MetricKey::Age, (-5).into()).unwrap();
        let features = AppDataPreparer::prepare(&store).unwrap();
        assert_eq!(features.age, -5.0);
    }
}
