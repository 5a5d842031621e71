//! Solver precision and generated-sample summaries.

use std::fmt;

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::dataset::TensorDataset;
use crate::error::{DgrError, Result};
use crate::trainable::{Classifier, Solver};

/// Fraction of the first `test_size` examples of `dataset` that `solver`
/// labels correctly.
///
/// # Errors
///
/// Returns [`DgrError::Dataset`] if there is nothing to evaluate, or an error
/// from the forward pass.
pub fn precision<C: Classifier>(
    solver: &Solver<C>,
    dataset: &TensorDataset,
    test_size: usize,
    batch_size: usize,
    device: &Device,
) -> Result<f64> {
    let n = test_size.min(dataset.len());
    if n == 0 {
        return Err(DgrError::Dataset("no examples to evaluate".into()));
    }
    let batch_size = batch_size.max(1);
    let indices: Vec<usize> = (0..n).collect();

    let mut correct = 0.0f64;
    for chunk in indices.chunks(batch_size) {
        let (x, y) = dataset.batch(chunk, device)?;
        let predicted = solver.solve(&x)?;
        let hits: f32 = predicted
            .eq(&y)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar()?;
        correct += f64::from(hits);
    }
    #[allow(clippy::cast_precision_loss)]
    Ok(correct / n as f64)
}

/// Summary of a batch of generated examples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleReport {
    /// Number of examples.
    pub size: usize,
    /// Count of examples per assigned label.
    pub label_counts: Vec<usize>,
    /// Mean over every feature value.
    pub mean: f64,
    /// Standard deviation over every feature value.
    pub std: f64,
}

impl SampleReport {
    /// Summarise inputs `x` and labels `y` over `classes` classes.
    ///
    /// Labels `>= classes` are counted in the last bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensors cannot be read back.
    pub fn from_batch(x: &Tensor, y: &Tensor, classes: usize) -> Result<Self> {
        let (mean, std) = feature_stats(x)?;
        let mut label_counts = vec![0; classes.max(1)];
        let last = label_counts.len() - 1;
        for label in y.to_dtype(DType::U32)?.to_vec1::<u32>()? {
            label_counts[(label as usize).min(last)] += 1;
        }
        Ok(Self {
            size: y.dims().first().copied().unwrap_or(0),
            label_counts,
            mean,
            std,
        })
    }
}

impl fmt::Display for SampleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples, mean {:.4}, std {:.4}, labels {:?}",
            self.size, self.mean, self.std, self.label_counts
        )
    }
}

/// Mean and standard deviation over every value of `x`.
pub(crate) fn feature_stats(x: &Tensor) -> Result<(f64, f64)> {
    let x = x.to_dtype(DType::F32)?;
    let mean: f32 = x.mean_all()?.to_scalar()?;
    let var: f32 = x.broadcast_sub(&Tensor::new(mean, x.device())?)?.sqr()?.mean_all()?.to_scalar()?;
    Ok((f64::from(mean), f64::from(var.sqrt())))
}
