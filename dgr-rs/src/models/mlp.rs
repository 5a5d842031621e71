//! Multi-layer perceptron classifier.

use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder, VarMap};
use rand::Rng;

use super::init_linear;
use crate::error::Result;
use crate::trainable::{copy_varmap, Classifier};

/// ReLU MLP mapping `[batch, input_dim]` to `[batch, classes]` scores.
pub struct MlpClassifier {
    hidden: Vec<Linear>,
    head: Linear,
    input_dim: usize,
    classes: usize,
    hidden_size: usize,
    device: Device,
    varmap: VarMap,
}

impl MlpClassifier {
    /// Create a classifier with `depth` hidden layers, initialised from `rng`.
    ///
    /// # Errors
    ///
    /// Returns an error if a layer cannot be created.
    pub fn seeded<R: Rng + ?Sized>(
        input_dim: usize,
        classes: usize,
        depth: usize,
        hidden_size: usize,
        device: &Device,
        rng: &mut R,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let mut in_dim = input_dim;
        for i in 0..depth {
            init_linear(&varmap, &format!("hidden.{i}"), in_dim, hidden_size, device, rng)?;
            in_dim = hidden_size;
        }
        init_linear(&varmap, "head", in_dim, classes, device, rng)?;

        Self::from_varmap(varmap, input_dim, classes, depth, hidden_size, device)
    }

    /// Bind a classifier to existing parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if `varmap` lacks a layer or a shape disagrees.
    pub fn from_varmap(
        varmap: VarMap,
        input_dim: usize,
        classes: usize,
        depth: usize,
        hidden_size: usize,
        device: &Device,
    ) -> Result<Self> {
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let mut hidden = Vec::with_capacity(depth);
        let mut in_dim = input_dim;
        for i in 0..depth {
            hidden.push(linear(in_dim, hidden_size, vb.pp(format!("hidden.{i}")))?);
            in_dim = hidden_size;
        }
        let head = linear(in_dim, classes, vb.pp("head"))?;

        Ok(Self {
            hidden,
            head,
            input_dim,
            classes,
            hidden_size,
            device: device.clone(),
            varmap,
        })
    }

    /// Input feature dimension.
    #[must_use]
    pub const fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Number of output classes.
    #[must_use]
    pub const fn classes(&self) -> usize {
        self.classes
    }
}

impl Classifier for MlpClassifier {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut h = x.clone();
        for layer in &self.hidden {
            h = layer.forward(&h)?.relu()?;
        }
        Ok(self.head.forward(&h)?)
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn deep_copy(&self) -> Result<Self> {
        Self::from_varmap(
            copy_varmap(&self.varmap)?,
            self.input_dim,
            self.classes,
            self.hidden.len(),
            self.hidden_size,
            &self.device,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parameter_count;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_forward_shape() -> Result<()> {
        let device = Device::Cpu;
        let mlp = MlpClassifier::seeded(6, 4, 2, 12, &device, &mut ChaCha8Rng::seed_from_u64(0))?;
        let x = Tensor::randn(0f32, 1.0, (5, 6), &device)?;
        assert_eq!(mlp.forward(&x)?.dims(), &[5, 4]);
        Ok(())
    }

    #[test]
    fn test_parameter_count() -> Result<()> {
        let mlp = MlpClassifier::seeded(6, 4, 2, 12, &Device::Cpu, &mut ChaCha8Rng::seed_from_u64(0))?;
        // (6*12 + 12) + (12*12 + 12) + (12*4 + 4)
        assert_eq!(parameter_count(mlp.varmap()), 84 + 156 + 52);
        Ok(())
    }

    #[test]
    fn test_zero_depth_is_linear_model() -> Result<()> {
        let mlp = MlpClassifier::seeded(3, 2, 0, 8, &Device::Cpu, &mut ChaCha8Rng::seed_from_u64(0))?;
        assert_eq!(parameter_count(mlp.varmap()), 3 * 2 + 2);
        Ok(())
    }

    #[test]
    fn test_seeded_init_is_reproducible() -> Result<()> {
        let device = Device::Cpu;
        let a = MlpClassifier::seeded(4, 3, 1, 8, &device, &mut ChaCha8Rng::seed_from_u64(7))?;
        let b = MlpClassifier::seeded(4, 3, 1, 8, &device, &mut ChaCha8Rng::seed_from_u64(7))?;
        let x = Tensor::ones((2, 4), DType::F32, &device)?;

        let ya: Vec<Vec<f32>> = a.forward(&x)?.to_vec2()?;
        let yb: Vec<Vec<f32>> = b.forward(&x)?.to_vec2()?;
        assert_eq!(ya, yb);
        Ok(())
    }

    #[test]
    fn test_deep_copy_matches_then_diverges() -> Result<()> {
        let device = Device::Cpu;
        let mlp = MlpClassifier::seeded(4, 3, 1, 8, &device, &mut ChaCha8Rng::seed_from_u64(0))?;
        let copy = mlp.deep_copy()?;
        let x = Tensor::ones((2, 4), DType::F32, &device)?;

        let before: Vec<Vec<f32>> = copy.forward(&x)?.to_vec2()?;
        assert_eq!(before, mlp.forward(&x)?.to_vec2::<f32>()?);

        for var in mlp.varmap().all_vars() {
            var.set(&var.as_tensor().affine(2.0, 1.0)?)?;
        }
        let after: Vec<Vec<f32>> = copy.forward(&x)?.to_vec2()?;
        assert_eq!(before, after);
        assert_ne!(after, mlp.forward(&x)?.to_vec2::<f32>()?);
        Ok(())
    }
}
