//! Replay sources and the loop that mixes replayed batches into training.
//!
//! While learning task `t`, each step trains on either a real batch of the
//! current task or a batch drawn from a replay source that stands in for
//! tasks `1..t`. Which one is decided per step by a Bernoulli draw against
//! `importance_of_new_task`.

use std::sync::atomic::{AtomicU64, Ordering};

use candle_core::{Device, Tensor};
use rand::{Rng, RngCore};

use crate::callbacks::Callbacks;
use crate::dataset::{DataLoader, TensorDataset};
use crate::error::{DgrError, Result};
use crate::trainable::{BatchResult, BatchTrainable, Classifier, Generator, Solver};

/// Anything that can produce labeled batches standing in for earlier tasks.
pub trait ReplaySource {
    /// Draw `size` labeled examples.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be produced.
    fn sample(&self, size: usize, rng: &mut dyn RngCore) -> Result<(Tensor, Tensor)>;
}

static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

/// Read-only snapshot of a scholar, taken when a task finishes.
///
/// Only sampling and solving are exposed, so a snapshot keeps producing the
/// same data however the live scholar trains afterwards.
pub struct FrozenScholar<G, C> {
    id: u64,
    label: String,
    generator: G,
    solver: Solver<C>,
}

impl<G: Generator, C: Classifier> FrozenScholar<G, C> {
    pub(crate) fn new(label: String, generator: G, solver: Solver<C>) -> Self {
        Self {
            id: NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::Relaxed),
            label,
            generator,
            solver,
        }
    }

    /// Process-unique snapshot identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Label of the scholar this snapshot was taken from.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Generated inputs labeled by the snapshot's own solver.
    ///
    /// # Errors
    ///
    /// Returns an error if sampling or solving fails.
    pub fn sample(&self, size: usize, rng: &mut dyn RngCore) -> Result<(Tensor, Tensor)> {
        let x = self.generator.sample(size, rng)?;
        let y = self.solver.solve(&x)?;
        Ok((x, y))
    }

    /// Hard label predictions of the snapshot's solver.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    pub fn solve(&self, x: &Tensor) -> Result<Tensor> {
        self.solver.solve(x)
    }
}

impl<G: Generator, C: Classifier> ReplaySource for FrozenScholar<G, C> {
    fn sample(&self, size: usize, rng: &mut dyn RngCore) -> Result<(Tensor, Tensor)> {
        Self::sample(self, size, rng)
    }
}

impl<G, C> std::fmt::Debug for FrozenScholar<G, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrozenScholar")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Replay of the literal training data of earlier tasks.
///
/// Examples are drawn uniformly at random over the union of the retained
/// datasets.
#[derive(Debug, Clone)]
pub struct ExactReplay {
    datasets: Vec<TensorDataset>,
    total: usize,
    device: Device,
}

impl ExactReplay {
    /// Retain `datasets` for replay.
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Dataset`] if there is no example to replay or the
    /// datasets disagree on `input_dim`.
    pub fn new(datasets: Vec<TensorDataset>, device: &Device) -> Result<Self> {
        let total = datasets.iter().map(TensorDataset::len).sum();
        if total == 0 {
            return Err(DgrError::Dataset("exact replay needs at least one example".into()));
        }
        if let Some(first) = datasets.first() {
            if datasets.iter().any(|d| d.input_dim() != first.input_dim()) {
                return Err(DgrError::Dataset(
                    "exact replay datasets disagree on input_dim".into(),
                ));
            }
        }
        Ok(Self {
            datasets,
            total,
            device: device.clone(),
        })
    }

    /// Number of retained datasets.
    #[must_use]
    pub fn dataset_count(&self) -> usize {
        self.datasets.len()
    }
}

impl ReplaySource for ExactReplay {
    fn sample(&self, size: usize, rng: &mut dyn RngCore) -> Result<(Tensor, Tensor)> {
        let input_dim = self.datasets.first().map_or(0, TensorDataset::input_dim);
        let mut xs = Vec::with_capacity(size * input_dim);
        let mut ys = Vec::with_capacity(size);
        for _ in 0..size {
            let mut k = rng.gen_range(0..self.total);
            for dataset in &self.datasets {
                if k < dataset.len() {
                    if let Some((features, label)) = dataset.get(k) {
                        xs.extend_from_slice(features);
                        ys.push(label);
                    }
                    break;
                }
                k -= dataset.len();
            }
        }
        let x = Tensor::from_vec(xs, (size, input_dim), &self.device)?;
        let y = Tensor::from_vec(ys, size, &self.device)?;
        Ok((x, y))
    }
}

/// Parameters of one replay-mixed training pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOptions {
    /// Probability that a step trains on real data when replay is available.
    pub importance_of_new_task: f64,
    /// Rows per batch, real or replayed.
    pub batch_size: usize,
    /// Number of steps in the pass.
    pub iterations: usize,
}

impl ReplayOptions {
    /// Check ranges.
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Config`] if the importance is outside `[0, 1]` or
    /// the batch size is zero.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.importance_of_new_task) {
            return Err(DgrError::Config(format!(
                "importance_of_new_task must be within [0, 1], got {}",
                self.importance_of_new_task
            )));
        }
        if self.batch_size == 0 {
            return Err(DgrError::Config("batch_size must be > 0".into()));
        }
        Ok(())
    }
}

/// Where the batch of one training step comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrigin {
    /// Current task data.
    Real,
    /// Drawn from the replay source.
    Replayed,
}

/// Decide the origin of the next batch.
///
/// Without a replay source every batch is real and no random number is
/// consumed. Otherwise `r ~ U[0, 1)` is drawn and the batch is replayed iff
/// `r > importance`.
pub fn draw_origin<R: Rng + ?Sized>(rng: &mut R, importance: f64, has_previous: bool) -> BatchOrigin {
    if has_previous && rng.gen::<f64>() > importance {
        BatchOrigin::Replayed
    } else {
        BatchOrigin::Real
    }
}

/// Counts collected over one replay-mixed pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayStats {
    /// Steps trained on current-task data.
    pub real_batches: usize,
    /// Steps trained on replayed data.
    pub replayed_batches: usize,
    /// Result of the final step.
    pub last: Option<BatchResult>,
}

impl ReplayStats {
    /// Fraction of steps that were replayed.
    #[must_use]
    pub fn replay_fraction(&self) -> f64 {
        let total = self.real_batches + self.replayed_batches;
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let fraction = self.replayed_batches as f64 / total as f64;
        fraction
    }
}

/// Train `trainable` for `options.iterations` steps, mixing real batches from
/// `loader` with replayed batches from `previous`.
///
/// After every step, each callback is invoked in order with the trainable,
/// the step result and the iteration index in `0..options.iterations`.
/// Errors from a step abort the pass immediately.
///
/// # Errors
///
/// Returns [`DgrError::Config`] for invalid options, or any error raised by
/// the loader, the replay source or the training step.
pub fn train_with_replay_loop<T: BatchTrainable + ?Sized>(
    trainable: &mut T,
    loader: &mut DataLoader<'_>,
    previous: Option<&dyn ReplaySource>,
    options: &ReplayOptions,
    callbacks: &mut Callbacks<'_, T>,
    rng: &mut dyn RngCore,
) -> Result<ReplayStats> {
    options.validate()?;
    let mut stats = ReplayStats::default();

    for iteration in 0..options.iterations {
        let origin = draw_origin(&mut *rng, options.importance_of_new_task, previous.is_some());
        let (x, y) = match (origin, previous) {
            (BatchOrigin::Replayed, Some(source)) => {
                stats.replayed_batches += 1;
                source.sample(options.batch_size, &mut *rng)?
            }
            _ => {
                stats.real_batches += 1;
                loader.next_batch()?
            }
        };

        let result = trainable.train_a_batch(&x, &y)?;
        for callback in callbacks.iter_mut() {
            callback.on_batch(&*trainable, &result, iteration);
        }
        stats.last = Some(result);
    }

    tracing::debug!(
        real = stats.real_batches,
        replayed = stats.replayed_batches,
        "replay pass finished"
    );
    Ok(stats)
}
