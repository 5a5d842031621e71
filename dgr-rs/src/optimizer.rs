//! Optimizer collaborator (AdamW over a `VarMap`).

use candle_core::Tensor;
use candle_nn::{Optimizer, ParamsAdamW, VarMap};

use crate::config::TrainingConfig;
use crate::error::{DgrError, Result};

/// Optimizer configuration.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Beta1 for Adam
    pub beta1: f64,
    /// Beta2 for Adam
    pub beta2: f64,
    /// Weight decay
    pub weight_decay: f64,
    /// Epsilon for numerical stability
    pub eps: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            weight_decay: 1e-5,
            eps: 1e-8,
        }
    }
}

impl OptimizerConfig {
    /// Optimizer settings shared by the solver, critic and generator.
    #[must_use]
    pub fn from_training(training: &TrainingConfig) -> Self {
        Self {
            learning_rate: training.learning_rate,
            weight_decay: training.weight_decay,
            ..Self::default()
        }
    }

    /// Create AdamW optimizer over every variable of `varmap`.
    ///
    /// # Errors
    ///
    /// Returns an error if the optimizer cannot be created.
    pub fn build_adamw(&self, varmap: &VarMap) -> Result<AdamWOptimizer> {
        let vars = varmap.all_vars();
        let params = ParamsAdamW {
            lr: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            weight_decay: self.weight_decay,
        };

        let opt = candle_nn::AdamW::new(vars, params)
            .map_err(|e| DgrError::Training(format!("Failed to create AdamW: {e}")))?;

        Ok(AdamWOptimizer { inner: opt })
    }
}

/// AdamW optimizer wrapper.
pub struct AdamWOptimizer {
    inner: candle_nn::AdamW,
}

impl std::fmt::Debug for AdamWOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdamWOptimizer")
            .field("learning_rate", &self.learning_rate())
            .finish()
    }
}

impl AdamWOptimizer {
    /// Compute fresh gradients of `loss` and apply one update.
    ///
    /// Gradients are recomputed from scratch on every call, so nothing
    /// accumulates between steps.
    ///
    /// # Errors
    ///
    /// Returns an error if the step fails.
    pub fn step(&mut self, loss: &Tensor) -> Result<()> {
        self.inner
            .backward_step(loss)
            .map_err(|e| DgrError::Training(format!("Optimizer step failed: {e}")))
    }

    /// Get current learning rate.
    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    /// Set learning rate.
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};

    #[test]
    fn test_optimizer_config_default() {
        let config = OptimizerConfig::default();
        assert_eq!(config.learning_rate, 1e-3);
        assert_eq!(config.beta1, 0.9);
        assert_eq!(config.beta2, 0.999);
        assert_eq!(config.weight_decay, 1e-5);
    }

    #[test]
    fn test_from_training() {
        let training = TrainingConfig {
            learning_rate: 5e-4,
            weight_decay: 0.0,
            ..Default::default()
        };
        let config = OptimizerConfig::from_training(&training);
        assert_eq!(config.learning_rate, 5e-4);
        assert_eq!(config.weight_decay, 0.0);
    }

    #[test]
    fn test_build_adamw() -> Result<()> {
        let config = OptimizerConfig::default();
        let varmap = VarMap::new();

        let optimizer = config.build_adamw(&varmap)?;
        assert_eq!(optimizer.learning_rate(), 1e-3);

        Ok(())
    }

    #[test]
    fn test_step_moves_parameters() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let w = vb.get_with_hints(3, "w", Init::Const(1.0))?;

        let mut optimizer = OptimizerConfig::default().build_adamw(&varmap)?;
        let loss = w.sqr()?.sum_all()?;
        optimizer.step(&loss)?;

        let after: Vec<f32> = w.to_vec1()?;
        assert!(after.iter().all(|&v| v < 1.0));
        Ok(())
    }

    #[test]
    fn test_set_learning_rate() -> Result<()> {
        let mut optimizer = OptimizerConfig::default().build_adamw(&VarMap::new())?;
        optimizer.set_learning_rate(0.5);
        assert_eq!(optimizer.learning_rate(), 0.5);
        Ok(())
    }
}
