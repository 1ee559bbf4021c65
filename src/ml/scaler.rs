//! Per-column standardisation fitted on the training split only.

use serde::{Deserialize, Serialize};

use super::ModelError;

const MIN_STD: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit column means and population standard deviations.
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self, ModelError> {
        let Some(first) = rows.first() else {
            return Err(ModelError::EmptyDataset);
        };
        let dim = first.len();
        let n = rows.len() as f64;

        let mut mean = vec![0.0; dim];
        for row in rows {
            if row.len() != dim {
                return Err(ModelError::DimensionMismatch {
                    expected: dim,
                    got: row.len(),
                });
            }
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; dim];
        for row in rows {
            for ((acc, v), m) in var.iter_mut().zip(row).zip(&mean) {
                *acc += (v - m).powi(2);
            }
        }
        let scale = var
            .into_iter()
            .map(|v| {
                let std = (v / n).sqrt();
                if std.is_finite() && std > MIN_STD {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self { mean, scale })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_one(&self, row: &[f64]) -> Result<Vec<f64>, ModelError> {
        if row.len() != self.dim() {
            return Err(ModelError::DimensionMismatch {
                expected: self.dim(),
                got: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
        rows.iter().map(|row| self.transform_one(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_transform_centers_and_scales() {
        let rows = vec![vec![1.0, 10.0], vec![3.0, 10.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();
        assert_eq!(scaler.mean, vec![2.0, 10.0]);
        assert_eq!(scaler.scale, vec![1.0, 1.0]);

        let out = scaler.transform(&rows).unwrap();
        assert_eq!(out, vec![vec![-1.0, 0.0], vec![1.0, 0.0]]);
    }

    #[test]
    fn test_constant_column_gets_unit_scale() {
        let rows = vec![vec![5.0], vec![5.0], vec![5.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();
        assert_eq!(scaler.scale, vec![1.0]);
        assert_eq!(scaler.transform_one(&[5.0]).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let scaler = StandardScaler::fit(&[vec![1.0, 2.0]]).unwrap();
        assert!(scaler.transform_one(&[1.0]).is_err());
        assert!(StandardScaler::fit(&[]).is_err());
    }
}
