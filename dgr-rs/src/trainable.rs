//! Batch-trainable contracts shared by generators and solvers.
//!
//! [`BatchTrainable`] is the minimal "train on one labeled batch" capability.
//! Generators extend it with sampling, and [`Solver`] wraps any
//! [`Classifier`] with the canonical supervised training step so the replay
//! driver can train either one without knowing which it holds.

use std::collections::BTreeMap;

use candle_core::{Tensor, Var, D};
use candle_nn::VarMap;
use rand::RngCore;

use crate::error::{DgrError, Result};
use crate::loss::Criterion;
use crate::optimizer::AdamWOptimizer;

/// Outcome of one training step, handed to every callback.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// Scalar loss achieved by the step.
    pub loss: f64,
    /// Named loss components (for example critic and generator losses).
    pub components: BTreeMap<&'static str, f64>,
}

impl BatchResult {
    /// Result carrying a single loss value.
    #[must_use]
    pub fn new(loss: f64) -> Self {
        Self {
            loss,
            components: BTreeMap::new(),
        }
    }

    /// Attach a named component.
    #[must_use]
    pub fn with(mut self, name: &'static str, value: f64) -> Self {
        self.components.insert(name, value);
        self
    }

    /// Look up a named component.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.components.get(name).copied()
    }
}

/// A model that can be trained incrementally, one batch at a time.
pub trait BatchTrainable {
    /// Perform exactly one optimisation step on `(x, y)` and return the loss.
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::ShapeMismatch`] when `x` and `y` disagree on the
    /// batch dimension, [`DgrError::Config`] when the optimizer or criterion
    /// has not been set, and [`DgrError::Training`] on numeric failure.
    fn train_a_batch(&mut self, x: &Tensor, y: &Tensor) -> Result<BatchResult>;
}

/// A trainable model that can synthesise inputs.
pub trait Generator: BatchTrainable {
    /// Produce `size` synthetic inputs. No labels are produced.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn sample(&self, size: usize, rng: &mut dyn RngCore) -> Result<Tensor>;

    /// Independent copy of every parameter buffer, without optimizers.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter cannot be copied.
    fn deep_copy(&self) -> Result<Self>
    where
        Self: Sized;

    /// Parameter groups by name, used when saving and restoring checkpoints.
    fn named_varmaps(&self) -> Vec<(&'static str, &VarMap)>;
}

/// The architecture-specific part of a solver: a forward pass to class scores.
pub trait Classifier {
    /// Class scores `[batch, classes]` for inputs `[batch, features]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn forward(&self, x: &Tensor) -> Result<Tensor>;

    /// Trainable parameters.
    fn varmap(&self) -> &VarMap;

    /// Independent copy of every parameter buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter cannot be copied.
    fn deep_copy(&self) -> Result<Self>
    where
        Self: Sized;
}

/// Reject batches whose inputs and targets disagree on the batch dimension.
///
/// Returns the batch size on success.
///
/// # Errors
///
/// Returns [`DgrError::ShapeMismatch`] on disagreement or for rank-0 inputs.
pub fn check_batch(x: &Tensor, y: &Tensor) -> Result<usize> {
    let (Some(&bx), Some(&by)) = (x.dims().first(), y.dims().first()) else {
        return Err(DgrError::ShapeMismatch {
            expected: vec![1],
            got: vec![x.rank(), y.rank()],
        });
    };
    if bx != by {
        return Err(DgrError::ShapeMismatch {
            expected: vec![bx],
            got: vec![by],
        });
    }
    Ok(bx)
}

/// Duplicate every variable of `src` into a new, unaliased `VarMap`.
///
/// # Errors
///
/// Returns an error if a tensor copy fails or the map lock is poisoned.
pub fn copy_varmap(src: &VarMap) -> Result<VarMap> {
    let copy = VarMap::new();
    {
        let source = src
            .data()
            .lock()
            .map_err(|_| DgrError::Training("parameter map lock poisoned".into()))?;
        let mut target = copy
            .data()
            .lock()
            .map_err(|_| DgrError::Training("parameter map lock poisoned".into()))?;
        for (name, var) in source.iter() {
            // copy() detaches the storage; from_tensor then allocates a fresh var
            let detached = var.as_tensor().copy()?;
            target.insert(name.clone(), Var::from_tensor(&detached)?);
        }
    }
    Ok(copy)
}

/// Read a scalar loss tensor, failing on NaN or infinity.
pub(crate) fn finite_scalar(loss: &Tensor, what: &str) -> Result<f64> {
    let value = f64::from(loss.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?);
    if !value.is_finite() {
        return Err(DgrError::Training(format!("{what} diverged: {value}")));
    }
    Ok(value)
}

/// A classifier paired with its optimizer and criterion.
///
/// The training step is fixed here rather than on [`Classifier`], so every
/// architecture trains the same way.
pub struct Solver<C> {
    network: C,
    optimizer: Option<AdamWOptimizer>,
    criterion: Option<Box<dyn Criterion>>,
}

impl<C: Classifier> Solver<C> {
    /// Wrap a classifier. Optimizer and criterion must be set before training.
    pub fn new(network: C) -> Self {
        Self {
            network,
            optimizer: None,
            criterion: None,
        }
    }

    /// Install the optimizer.
    pub fn set_optimizer(&mut self, optimizer: AdamWOptimizer) {
        self.optimizer = Some(optimizer);
    }

    /// Install the criterion.
    pub fn set_criterion(&mut self, criterion: Box<dyn Criterion>) {
        self.criterion = Some(criterion);
    }

    /// Whether both optimizer and criterion are set.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.optimizer.is_some() && self.criterion.is_some()
    }

    /// Class scores for `x`.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.network.forward(x)
    }

    /// Hard label predictions: argmax over the class axis.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    pub fn solve(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.forward(x)?.argmax(D::Minus1)?)
    }

    /// The wrapped classifier.
    pub fn network(&self) -> &C {
        &self.network
    }

    /// Trainable parameters of the wrapped classifier.
    pub fn varmap(&self) -> &VarMap {
        self.network.varmap()
    }

    /// Independent copy of the classifier parameters, without optimizer or
    /// criterion.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter cannot be copied.
    pub fn deep_copy(&self) -> Result<Self> {
        Ok(Self::new(self.network.deep_copy()?))
    }
}

impl<C: Classifier> BatchTrainable for Solver<C> {
    fn train_a_batch(&mut self, x: &Tensor, y: &Tensor) -> Result<BatchResult> {
        check_batch(x, y)?;
        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or_else(|| DgrError::Config("solver optimizer is not set".into()))?;
        let criterion = self
            .criterion
            .as_ref()
            .ok_or_else(|| DgrError::Config("solver criterion is not set".into()))?;

        let scores = self.network.forward(x)?;
        let loss = criterion.loss(&scores, y)?;
        let value = finite_scalar(&loss, criterion.name())?;
        optimizer.step(&loss)?;

        Ok(BatchResult::new(value))
    }
}

impl<C> std::fmt::Debug for Solver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver")
            .field("optimizer", &self.optimizer.is_some())
            .field("criterion", &self.criterion.as_ref().map(|c| c.name()))
            .finish_non_exhaustive()
    }
}
