//! The scholar: a generator paired with a solver.

use candle_core::{Device, Tensor};
use rand::{Rng, RngCore};

use crate::callbacks::Callbacks;
use crate::dataset::{DataLoader, TensorDataset};
use crate::error::{DgrError, Result};
use crate::replay::{train_with_replay_loop, FrozenScholar, ReplayOptions, ReplaySource, ReplayStats};
use crate::trainable::{Classifier, Generator, Solver};

/// Settings for [`Scholar::train_with_replay`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScholarTrainOptions {
    /// Probability that a step trains on real data when replay is available.
    pub importance_of_new_task: f64,
    /// Rows per batch.
    pub batch_size: usize,
    /// Steps for the generator pass.
    pub generator_iterations: usize,
    /// Steps for the solver pass.
    pub solver_iterations: usize,
}

impl ScholarTrainOptions {
    fn pass(&self, iterations: usize) -> ReplayOptions {
        ReplayOptions {
            importance_of_new_task: self.importance_of_new_task,
            batch_size: self.batch_size,
            iterations,
        }
    }
}

/// Outcome of one [`Scholar::train_with_replay`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScholarTrainStats {
    /// Generator pass counts.
    pub generator: ReplayStats,
    /// Solver pass counts.
    pub solver: ReplayStats,
}

/// A generator and a solver trained together so the pair can regenerate
/// labeled data for every task it has learned.
pub struct Scholar<G, C> {
    label: String,
    /// Models the input distribution of all tasks so far.
    pub generator: G,
    /// Labels inputs.
    pub solver: Solver<C>,
    device: Device,
}

impl<G: Generator, C: Classifier> Scholar<G, C> {
    /// Pair `generator` with `solver` under a descriptive `label`.
    pub fn new(label: impl Into<String>, generator: G, solver: Solver<C>, device: &Device) -> Self {
        Self {
            label: label.into(),
            generator,
            solver,
            device: device.clone(),
        }
    }

    /// Descriptive label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Device the scholar computes on.
    #[must_use]
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Train on `dataset` while rehearsing `previous`.
    ///
    /// The generator pass runs to completion before the solver pass begins.
    /// Each pass has its own iteration budget, mixes in replayed batches with
    /// probability `1 - importance_of_new_task`, and invokes its own callback
    /// list after every step.
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Dataset`] for an empty dataset (before any
    /// training), [`DgrError::Config`] for invalid options, and the first
    /// error raised by a training step.
    pub fn train_with_replay(
        &mut self,
        dataset: &TensorDataset,
        previous: Option<&dyn ReplaySource>,
        options: &ScholarTrainOptions,
        generator_callbacks: &mut Callbacks<'_, G>,
        solver_callbacks: &mut Callbacks<'_, Solver<C>>,
        rng: &mut dyn RngCore,
    ) -> Result<ScholarTrainStats> {
        if dataset.is_empty() {
            return Err(DgrError::Dataset(format!(
                "scholar '{}' cannot train on an empty dataset",
                self.label
            )));
        }
        let generator_options = options.pass(options.generator_iterations);
        let solver_options = options.pass(options.solver_iterations);
        generator_options.validate()?;

        let mut loader = DataLoader::new(dataset, options.batch_size, &self.device, rng.gen())?;
        let generator = train_with_replay_loop(
            &mut self.generator,
            &mut loader,
            previous,
            &generator_options,
            generator_callbacks,
            &mut *rng,
        )?;

        let mut loader = DataLoader::new(dataset, options.batch_size, &self.device, rng.gen())?;
        let solver = train_with_replay_loop(
            &mut self.solver,
            &mut loader,
            previous,
            &solver_options,
            solver_callbacks,
            &mut *rng,
        )?;

        Ok(ScholarTrainStats { generator, solver })
    }

    /// Generate `size` inputs and label them with this scholar's solver.
    ///
    /// # Errors
    ///
    /// Returns an error if sampling or solving fails.
    pub fn sample(&self, size: usize, rng: &mut dyn RngCore) -> Result<(Tensor, Tensor)> {
        let x = self.generator.sample(size, rng)?;
        let y = self.solver.solve(&x)?;
        Ok((x, y))
    }

    /// Take an independent, read-only snapshot of the current parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter cannot be copied.
    pub fn freeze(&self) -> Result<FrozenScholar<G, C>> {
        Ok(FrozenScholar::new(
            self.label.clone(),
            self.generator.deep_copy()?,
            self.solver.deep_copy()?,
        ))
    }
}

impl<G: Generator, C: Classifier> ReplaySource for Scholar<G, C> {
    fn sample(&self, size: usize, rng: &mut dyn RngCore) -> Result<(Tensor, Tensor)> {
        Self::sample(self, size, rng)
    }
}

impl<G, C> std::fmt::Debug for Scholar<G, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scholar")
            .field("label", &self.label)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}
