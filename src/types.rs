//! Core types for Artificien
//!
//! This module defines the data structures that flow from the health-data
//! platform to the training call: typed characteristics, quantity samples,
//! the per-session health profile and the feature vector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of features in a [`FeatureVector`]
pub const FEATURE_COUNT: usize = 4;

/// Biological sex as recorded by the health-data platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiologicalSex {
    Unknown,
    Female,
    Male,
    Other,
}

impl BiologicalSex {
    /// Display label, also used as the persisted value
    pub fn label(&self) -> &'static str {
        match self {
            BiologicalSex::Unknown => "Unknown",
            BiologicalSex::Female => "Female",
            BiologicalSex::Male => "Male",
            BiologicalSex::Other => "Other",
        }
    }

    /// Parse a persisted label. Unrecognized labels return `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Unknown" => Some(BiologicalSex::Unknown),
            "Female" => Some(BiologicalSex::Female),
            "Male" => Some(BiologicalSex::Male),
            "Other" => Some(BiologicalSex::Other),
            _ => None,
        }
    }
}

/// ABO/Rh blood type as recorded by the health-data platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BloodType {
    #[serde(rename = "Unknown")]
    Unknown,
    #[serde(rename = "A+")]
    APositive,
    #[serde(rename = "A-")]
    ANegative,
    #[serde(rename = "B+")]
    BPositive,
    #[serde(rename = "B-")]
    BNegative,
    #[serde(rename = "AB+")]
    AbPositive,
    #[serde(rename = "AB-")]
    AbNegative,
    #[serde(rename = "O+")]
    OPositive,
    #[serde(rename = "O-")]
    ONegative,
}

impl BloodType {
    pub fn label(&self) -> &'static str {
        match self {
            BloodType::Unknown => "Unknown",
            BloodType::APositive => "A+",
            BloodType::ANegative => "A-",
            BloodType::BPositive => "B+",
            BloodType::BNegative => "B-",
            BloodType::AbPositive => "AB+",
            BloodType::AbNegative => "AB-",
            BloodType::OPositive => "O+",
            BloodType::ONegative => "O-",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Unknown" => Some(BloodType::Unknown),
            "A+" => Some(BloodType::APositive),
            "A-" => Some(BloodType::ANegative),
            "B+" => Some(BloodType::BPositive),
            "B-" => Some(BloodType::BNegative),
            "AB+" => Some(BloodType::AbPositive),
            "AB-" => Some(BloodType::AbNegative),
            "O+" => Some(BloodType::OPositive),
            "O-" => Some(BloodType::ONegative),
            _ => None,
        }
    }
}

/// Sampled quantity types read from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityType {
    BodyMassIndex,
    Height,
    BodyMass,
    StepCount,
}

impl QuantityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantityType::BodyMassIndex => "body_mass_index",
            QuantityType::Height => "height",
            QuantityType::BodyMass => "body_mass",
            QuantityType::StepCount => "step_count",
        }
    }

    /// Canonical unit that sample values are expressed in
    pub fn canonical_unit(&self) -> &'static str {
        match self {
            QuantityType::Height => "m",
            QuantityType::BodyMass => "kg",
            QuantityType::BodyMassIndex | QuantityType::StepCount => "count",
        }
    }
}

/// Every data type the app may request read access for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthDataType {
    DateOfBirth,
    BloodType,
    BiologicalSex,
    Quantity(QuantityType),
    Workout,
}

impl HealthDataType {
    pub fn name(&self) -> &'static str {
        match self {
            HealthDataType::DateOfBirth => "date_of_birth",
            HealthDataType::BloodType => "blood_type",
            HealthDataType::BiologicalSex => "biological_sex",
            HealthDataType::Quantity(q) => q.as_str(),
            HealthDataType::Workout => "workout",
        }
    }
}

/// Fixed set of types the app requests read access for
pub const READ_TYPES: [HealthDataType; 8] = [
    HealthDataType::DateOfBirth,
    HealthDataType::BloodType,
    HealthDataType::BiologicalSex,
    HealthDataType::Quantity(QuantityType::BodyMassIndex),
    HealthDataType::Quantity(QuantityType::Height),
    HealthDataType::Quantity(QuantityType::BodyMass),
    HealthDataType::Quantity(QuantityType::StepCount),
    HealthDataType::Workout,
];

/// A single quantity sample in canonical units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantitySample {
    pub quantity_type: QuantityType,
    /// Value in the type's canonical unit
    pub value: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Age, sex and blood type read together from the platform characteristics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeSexAndBloodType {
    pub age: i32,
    pub biological_sex: BiologicalSex,
    pub blood_type: BloodType,
}

/// Metrics loaded for the current session.
///
/// Each field is filled independently as its query completes. Durable copies
/// live in the preference store, not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthProfile {
    pub age: Option<i32>,
    pub biological_sex: Option<BiologicalSex>,
    pub blood_type: Option<BloodType>,
    pub height_in_meters: Option<f64>,
    pub weight_in_kilograms: Option<f64>,
    /// Steps summed over the trailing window
    pub step_count: Option<f64>,
}

impl HealthProfile {
    /// Body mass index: weight / height²
    pub fn body_mass_index(&self) -> Option<f64> {
        body_mass_index(self.weight_in_kilograms, self.height_in_meters)
    }
}

/// Compute body mass index, undefined unless both inputs are present and height > 0
pub fn body_mass_index(weight_in_kilograms: Option<f64>, height_in_meters: Option<f64>) -> Option<f64> {
    match (weight_in_kilograms, height_in_meters) {
        (Some(weight), Some(height)) if height > 0.0 => Some(weight / (height * height)),
        _ => None,
    }
}

/// Fixed-order features submitted for training: age, BMI, sex (0/1), step count
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub age: f64,
    pub body_mass_index: f64,
    pub sex: f64,
    pub step_count: f64,
}

impl FeatureVector {
    /// Column index of the sex feature
    pub const SEX_COLUMN: usize = 2;

    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [self.age, self.body_mass_index, self.sex, self.step_count]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_mass_index() {
        let profile = HealthProfile {
            height_in_meters: Some(1.8),
            weight_in_kilograms: Some(81.0),
            ..Default::default()
        };
        // 81 / 1.8² = 25
        assert!((profile.body_mass_index().unwrap() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_body_mass_index_undefined() {
        assert_eq!(body_mass_index(Some(80.0), None), None);
        assert_eq!(body_mass_index(None, Some(1.8)), None);
        assert_eq!(body_mass_index(Some(80.0), Some(0.0)), None);
        assert_eq!(body_mass_index(Some(80.0), Some(-1.7)), None);
        assert_eq!(HealthProfile::default().body_mass_index(), None);
    }

    #[test]
    fn test_labels_round_trip() {
        for sex in [
            BiologicalSex::Unknown,
            BiologicalSex::Female,
            BiologicalSex::Male,
            BiologicalSex::Other,
        ] {
            assert_eq!(BiologicalSex::from_label(sex.label()), Some(sex));
        }
        assert_eq!(BloodType::from_label("AB-"), Some(BloodType::AbNegative));
        assert_eq!(BloodType::from_label("C+"), None);
    }

    #[test]
    fn test_feature_order() {
        let features = FeatureVector {
            age: 30.0,
            body_mass_index: 22.5,
            sex: 1.0,
            step_count: 17.5,
        };
        assert_eq!(features.to_array(), [30.0, 22.5, 1.0, 17.5]);
        assert_eq!(features.to_array()[FeatureVector::SEX_COLUMN], 1.0);
    }
}
