//! Labeled vector datasets, batching, and the synthetic task sequences.
//!
//! Every experiment is a sequence of classification tasks over vectors of
//! `data.input_dim` features:
//!
//! - `permuted-clusters`: one Gaussian-cluster problem; each task applies its
//!   own fixed permutation to the feature axis.
//! - `clusters-shifted` / `shifted-clusters`: two tasks over the same labels
//!   with different input distributions (a plain domain and an affinely
//!   shifted, noisier domain), in either order.

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::config::{DataSettings, DgrConfig, Experiment};
use crate::error::{DgrError, Result};

/// A finite, indexable collection of `(features, label)` examples.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDataset {
    inputs: Vec<f32>,
    labels: Vec<u32>,
    input_dim: usize,
    classes: usize,
}

impl TensorDataset {
    /// Build a dataset from row-major `inputs` (`labels.len() * input_dim`
    /// values) and class labels.
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Dataset`] if the buffer sizes disagree or a label
    /// is out of range.
    pub fn new(inputs: Vec<f32>, labels: Vec<u32>, input_dim: usize, classes: usize) -> Result<Self> {
        if input_dim == 0 {
            return Err(DgrError::Dataset("input_dim must be > 0".into()));
        }
        if inputs.len() != labels.len() * input_dim {
            return Err(DgrError::Dataset(format!(
                "expected {} feature values for {} examples, got {}",
                labels.len() * input_dim,
                labels.len(),
                inputs.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|&&l| l as usize >= classes) {
            return Err(DgrError::Dataset(format!(
                "label {bad} out of range for {classes} classes"
            )));
        }
        Ok(Self {
            inputs,
            labels,
            input_dim,
            classes,
        })
    }

    /// Number of examples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Check if the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Features per example.
    #[must_use]
    pub const fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Number of label classes.
    #[must_use]
    pub const fn classes(&self) -> usize {
        self.classes
    }

    /// All labels in order.
    #[must_use]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Example `index`, if present.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<(&[f32], u32)> {
        let label = *self.labels.get(index)?;
        let start = index * self.input_dim;
        Some((&self.inputs[start..start + self.input_dim], label))
    }

    /// The first `n` examples (or all of them if there are fewer).
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        let n = n.min(self.len());
        Self {
            inputs: self.inputs[..n * self.input_dim].to_vec(),
            labels: self.labels[..n].to_vec(),
            input_dim: self.input_dim,
            classes: self.classes,
        }
    }

    /// Gather `indices` into an `x: [n, input_dim]` f32 tensor and a
    /// `y: [n]` u32 tensor.
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Dataset`] if an index is out of range.
    pub fn batch(&self, indices: &[usize], device: &Device) -> Result<(Tensor, Tensor)> {
        let mut xs = Vec::with_capacity(indices.len() * self.input_dim);
        let mut ys = Vec::with_capacity(indices.len());
        for &i in indices {
            let (features, label) = self.get(i).ok_or_else(|| {
                DgrError::Dataset(format!("index {i} out of range for {} examples", self.len()))
            })?;
            xs.extend_from_slice(features);
            ys.push(label);
        }
        let x = Tensor::from_vec(xs, (indices.len(), self.input_dim), device)?;
        let y = Tensor::from_vec(ys, indices.len(), device)?;
        Ok((x, y))
    }

    /// Copy of the dataset with every example's features reordered so that
    /// output feature `j` is input feature `permutation[j]`.
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Dataset`] if `permutation` does not have
    /// `input_dim` entries.
    pub fn permuted(&self, permutation: &[usize]) -> Result<Self> {
        if permutation.len() != self.input_dim || permutation.iter().any(|&p| p >= self.input_dim) {
            return Err(DgrError::Dataset(format!(
                "permutation of length {} does not fit input_dim {}",
                permutation.len(),
                self.input_dim
            )));
        }
        let inputs = self
            .inputs
            .chunks_exact(self.input_dim)
            .flat_map(|row| permutation.iter().map(move |&p| row[p]))
            .collect();
        Ok(Self {
            inputs,
            labels: self.labels.clone(),
            input_dim: self.input_dim,
            classes: self.classes,
        })
    }
}

/// Endless batch source over a dataset.
///
/// Each epoch visits the examples in a fresh seeded shuffle. When an epoch
/// runs out the loader reshuffles and starts again, so a training pass can
/// ask for more batches than one epoch holds. Every batch has exactly
/// `batch_size` rows: the leftover tail of an epoch is skipped, and a
/// dataset smaller than one batch repeats examples within the batch.
#[derive(Debug)]
pub struct DataLoader<'a> {
    dataset: &'a TensorDataset,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    rng: ChaCha8Rng,
    device: Device,
}

impl<'a> DataLoader<'a> {
    /// Create a loader. The first epoch is shuffled immediately.
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Dataset`] for an empty dataset and
    /// [`DgrError::Config`] for a zero batch size.
    pub fn new(dataset: &'a TensorDataset, batch_size: usize, device: &Device, seed: u64) -> Result<Self> {
        if dataset.is_empty() {
            return Err(DgrError::Dataset("cannot load batches from an empty dataset".into()));
        }
        if batch_size == 0 {
            return Err(DgrError::Config("batch_size must be > 0".into()));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        order.shuffle(&mut rng);
        Ok(Self {
            dataset,
            batch_size,
            order,
            cursor: 0,
            epoch: 0,
            rng,
            device: device.clone(),
        })
    }

    /// Number of completed passes over the data.
    #[must_use]
    pub const fn epoch(&self) -> usize {
        self.epoch
    }

    /// Rows per batch.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn reshuffle(&mut self) {
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
        self.epoch += 1;
    }

    /// Next `(x, y)` batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensors cannot be built on the device.
    pub fn next_batch(&mut self) -> Result<(Tensor, Tensor)> {
        let len = self.order.len();
        if len < self.batch_size {
            let indices: Vec<usize> = (0..self.batch_size).map(|k| self.order[k % len]).collect();
            self.reshuffle();
            return self.dataset.batch(&indices, &self.device);
        }
        if self.cursor + self.batch_size > len {
            self.reshuffle();
        }
        let indices = &self.order[self.cursor..self.cursor + self.batch_size];
        let batch = self.dataset.batch(indices, &self.device)?;
        self.cursor += self.batch_size;
        Ok(batch)
    }
}

/// Train and test splits for every task of an experiment, in task order.
#[derive(Debug, Clone)]
pub struct TaskSequence {
    /// Training set per task.
    pub train: Vec<TensorDataset>,
    /// Held-out set per task.
    pub test: Vec<TensorDataset>,
}

impl TaskSequence {
    /// Generate the task sequence of `config.experiment`.
    ///
    /// Cluster geometry and permutations derive from `data.permutation_seed`;
    /// the examples themselves derive from `config.seed`.
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Dataset`] if a generated dataset is invalid.
    pub fn generate(config: &DgrConfig) -> Result<Self> {
        let data = &config.data;
        let mut geometry_rng = ChaCha8Rng::seed_from_u64(data.permutation_seed);
        let mut sample_rng = ChaCha8Rng::seed_from_u64(config.seed);
        let centers = cluster_centers(data, &mut geometry_rng);
        let plain = Domain {
            centers: &centers,
            scale: 1.0,
            offset: 0.0,
            std: data.cluster_std,
        };
        let shifted = Domain {
            centers: &centers,
            scale: -1.0,
            offset: 1.5,
            std: data.cluster_std * 1.5,
        };

        let mut train = Vec::new();
        let mut test = Vec::new();
        match config.experiment {
            Experiment::PermutedClusters => {
                let base_train = plain.draw(data, data.examples_per_task, &mut sample_rng)?;
                let base_test = plain.draw(data, data.test_examples_per_task, &mut sample_rng)?;
                for _ in 0..data.tasks {
                    let mut permutation: Vec<usize> = (0..data.input_dim).collect();
                    permutation.shuffle(&mut geometry_rng);
                    train.push(base_train.permuted(&permutation)?);
                    test.push(base_test.permuted(&permutation)?);
                }
            }
            Experiment::ClustersShifted | Experiment::ShiftedClusters => {
                let mut domains = [plain, shifted];
                if config.experiment == Experiment::ShiftedClusters {
                    domains.reverse();
                }
                for domain in &domains {
                    train.push(domain.draw(data, data.examples_per_task, &mut sample_rng)?);
                    test.push(domain.draw(data, data.test_examples_per_task, &mut sample_rng)?);
                }
            }
        }

        tracing::debug!(
            experiment = %config.experiment,
            tasks = train.len(),
            "Generated task sequence"
        );
        Ok(Self { train, test })
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.train.len()
    }

    /// Check if there are no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }
}

fn cluster_centers(data: &DataSettings, rng: &mut ChaCha8Rng) -> Vec<f32> {
    (0..data.classes * data.input_dim)
        .map(|_| 2.0 * rng.sample::<f32, _>(StandardNormal))
        .collect()
}

/// Isotropic Gaussian clusters around `scale * center + offset`.
struct Domain<'c> {
    centers: &'c [f32],
    scale: f32,
    offset: f32,
    std: f32,
}

impl Domain<'_> {
    fn draw(&self, data: &DataSettings, n: usize, rng: &mut ChaCha8Rng) -> Result<TensorDataset> {
        let mut inputs = Vec::with_capacity(n * data.input_dim);
        let mut labels = Vec::with_capacity(n);
        for _ in 0..n {
            let label = rng.gen_range(0..data.classes);
            let center = &self.centers[label * data.input_dim..(label + 1) * data.input_dim];
            inputs.extend(center.iter().map(|&c| {
                self.scale * c + self.offset + self.std * rng.sample::<f32, _>(StandardNormal)
            }));
            #[allow(clippy::cast_possible_truncation)]
            labels.push(label as u32);
        }
        TensorDataset::new(inputs, labels, data.input_dim, data.classes)
    }
}
