//! Perceptron training plan
//!
//! A single logistic unit that predicts the sex column from the remaining
//! feature columns. Parameters are laid out as one weight per input column,
//! in column order, followed by the bias.

use crate::error::ArtificienError;
use crate::types::FeatureVector;

use super::{ClientConfig, TrainingData, TrainingPlan};

/// Probabilities are clamped away from 0 and 1 before taking logs
const PROBABILITY_EPSILON: f64 = 1e-7;

/// Logistic-regression plan executed on device
#[derive(Debug, Clone)]
pub struct PerceptronPlan {
    original: Vec<f64>,
    params: Vec<f64>,
    label_column: usize,
}

impl PerceptronPlan {
    /// Plan starting from downloaded parameters
    pub fn new(params: Vec<f64>) -> Self {
        Self {
            original: params.clone(),
            params,
            label_column: FeatureVector::SEX_COLUMN,
        }
    }

    /// Plan with every parameter at zero, for `columns` feature columns
    pub fn zeros(columns: usize) -> Self {
        Self::new(vec![0.0; columns])
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    fn check_shape(&self, data: &TrainingData) -> Result<(), ArtificienError> {
        let [_, columns] = data.shape();
        if self.label_column >= columns {
            return Err(ArtificienError::TrainingExecutionFault(format!(
                "label column {} outside {columns} columns",
                self.label_column
            )));
        }
        // one weight per input column plus the bias
        if self.params.len() != columns {
            return Err(ArtificienError::TrainingExecutionFault(format!(
                "model has {} parameters, expected {columns}",
                self.params.len()
            )));
        }
        Ok(())
    }

    /// Predicted probability and label for one row
    fn forward(&self, row: &[f64]) -> (f64, f64) {
        let bias = self.params[self.params.len() - 1];
        let z = self
            .inputs(row)
            .zip(&self.params)
            .fold(bias, |acc, (x, w)| acc + x * w);
        (sigmoid(z), row[self.label_column])
    }

    fn inputs<'a>(&self, row: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
        let label = self.label_column;
        row.iter()
            .enumerate()
            .filter(move |(i, _)| *i != label)
            .map(|(_, x)| *x)
    }

    fn step(&mut self, training: &TrainingData, lr: f64) {
        let weights = self.params.len() - 1;
        let mut gradient = vec![0.0; self.params.len()];
        let mut rows = 0usize;

        for row in training.rows() {
            let (p, y) = self.forward(row);
            let error = p - y;
            for (g, x) in gradient.iter_mut().zip(self.inputs(row)) {
                *g += error * x;
            }
            gradient[weights] += error;
            rows += 1;
        }

        let scale = lr / rows.max(1) as f64;
        for (w, g) in self.params.iter_mut().zip(&gradient) {
            *w -= scale * g;
        }
    }

    /// Mean binary cross-entropy over a dataset
    fn loss(&self, data: &TrainingData) -> f64 {
        let mut total = 0.0;
        let mut rows = 0usize;
        for row in data.rows() {
            let (p, y) = self.forward(row);
            let p = p.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON);
            total -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();
            rows += 1;
        }
        total / rows.max(1) as f64
    }
}

impl TrainingPlan for PerceptronPlan {
    fn execute(
        &mut self,
        training: &TrainingData,
        validation: &TrainingData,
        config: &ClientConfig,
    ) -> Result<f64, ArtificienError> {
        self.check_shape(training)?;
        self.check_shape(validation)?;

        for _ in 0..config.max_updates.max(1) {
            self.step(training, config.lr);
        }

        let loss = self.loss(validation);
        if !loss.is_finite() {
            return Err(ArtificienError::TrainingExecutionFault(
                "loss diverged".to_string(),
            ));
        }
        Ok(loss)
    }

    fn generate_diff(&self) -> Result<Vec<u8>, ArtificienError> {
        let diff: Vec<f64> = self
            .original
            .iter()
            .zip(&self.params)
            .map(|(before, after)| before - after)
            .collect();
        Ok(encode_diff(&diff))
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Encode parameter deltas as little-endian f32
pub fn encode_diff(diff: &[f64]) -> Vec<u8> {
    diff.iter()
        .flat_map(|d| (*d as f32).to_le_bytes())
        .collect()
}

/// Decode a little-endian f32 diff
pub fn decode_diff(bytes: &[u8]) -> Result<Vec<f32>, ArtificienError> {
    if bytes.len() % 4 != 0 {
        return Err(ArtificienError::TrainingExecutionFault(format!(
            "diff length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(lr: f64, max_updates: u32) -> ClientConfig {
        ClientConfig {
            name: "perceptron".to_string(),
            version: "1.0".to_string(),
            batch_size: 2,
            lr,
            max_updates,
        }
    }

    fn male_batch() -> TrainingData {
        let features = FeatureVector {
            age: 30.0,
            body_mass_index: 22.5,
            sex: 1.0,
            step_count: 17.5,
        };
        TrainingData::from_features(&features, 2).unwrap()
    }

    #[test]
    fn test_single_update_from_zeros() {
        let mut plan = PerceptronPlan::zeros(4);
        let data = male_batch();

        let loss = plan.execute(&data, &data, &config(0.1, 1)).unwrap();

        // gradient at p = 0.5 is -0.5 * x, so w = 0.05 * x
        let expected = [1.5, 1.125, 0.875, 0.05];
        for (got, want) in plan.params().iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{got} != {want}");
        }
        assert!(loss < std::f64::consts::LN_2);
        assert!(loss >= 0.0);

        let diff = decode_diff(&plan.generate_diff().unwrap()).unwrap();
        assert_eq!(diff.len(), 4);
        for (got, want) in diff.iter().zip(expected) {
            assert!((*got as f64 + want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_untrained_loss_is_ln2() {
        let mut plan = PerceptronPlan::zeros(4);
        let data = male_batch();
        // lr 0 leaves parameters untouched
        let loss = plan.execute(&data, &data, &config(0.0, 1)).unwrap();
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-12);
        assert!(decode_diff(&plan.generate_diff().unwrap())
            .unwrap()
            .iter()
            .all(|d| *d == 0.0));
    }

    #[test]
    fn test_wrong_parameter_count_is_fault() {
        let mut plan = PerceptronPlan::new(vec![0.0; 3]);
        let data = male_batch();
        let result = plan.execute(&data, &data, &config(0.1, 1));
        assert!(matches!(
            result,
            Err(ArtificienError::TrainingExecutionFault(_))
        ));
    }

    #[test]
    fn test_more_updates_lower_loss() {
        let data = TrainingData::new(
            vec![0.3, 0.2, 1.0, 0.1, 0.3, 0.2, 1.0, 0.1],
            [2, 4],
        )
        .unwrap();

        let mut once = PerceptronPlan::zeros(4);
        let loss_once = once.execute(&data, &data, &config(0.5, 1)).unwrap();
        let mut many = PerceptronPlan::zeros(4);
        let loss_many = many.execute(&data, &data, &config(0.5, 20)).unwrap();

        assert!(loss_many < loss_once);
    }

    #[test]
    fn test_decode_rejects_partial_float() {
        assert!(decode_diff(&[0, 0, 0]).is_err());
        assert_eq!(decode_diff(&encode_diff(&[1.5, -2.0])).unwrap(), vec![1.5, -2.0]);
    }
}
