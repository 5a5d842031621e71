//! Weight-clipped Wasserstein GAN over flat feature vectors.

use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder, VarMap};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::init_linear;
use crate::error::{DgrError, Result};
use crate::optimizer::AdamWOptimizer;
use crate::trainable::{check_batch, copy_varmap, finite_scalar, BatchResult, BatchTrainable, Generator};

/// Architecture and training knobs of a [`Wgan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WganConfig {
    /// Latent noise dimension.
    pub z_size: usize,
    /// Dimension of the generated feature vectors.
    pub data_dim: usize,
    /// Generator hidden width.
    pub g_hidden_size: usize,
    /// Critic hidden width.
    pub c_hidden_size: usize,
    /// Critic steps taken for every generator step.
    pub critic_updates_per_generator_update: usize,
    /// Critic weights are clamped to `[-weight_clip, weight_clip]` after each
    /// critic step.
    pub weight_clip: f64,
}

impl Default for WganConfig {
    fn default() -> Self {
        Self {
            z_size: 16,
            data_dim: 32,
            g_hidden_size: 64,
            c_hidden_size: 64,
            critic_updates_per_generator_update: 5,
            weight_clip: 0.01,
        }
    }
}

/// Three-layer MLP with ReLU between layers.
struct Mlp3 {
    layers: [Linear; 3],
}

impl Mlp3 {
    fn init<R: Rng + ?Sized>(
        varmap: &VarMap,
        dims: [usize; 4],
        device: &Device,
        rng: &mut R,
    ) -> Result<()> {
        for i in 0..3 {
            init_linear(varmap, &format!("fc{i}"), dims[i], dims[i + 1], device, rng)?;
        }
        Ok(())
    }

    fn bind(varmap: &VarMap, dims: [usize; 4], device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        Ok(Self {
            layers: [
                linear(dims[0], dims[1], vb.pp("fc0"))?,
                linear(dims[1], dims[2], vb.pp("fc1"))?,
                linear(dims[2], dims[3], vb.pp("fc2"))?,
            ],
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.layers[0].forward(x)?.relu()?;
        let h = self.layers[1].forward(&h)?.relu()?;
        Ok(self.layers[2].forward(&h)?)
    }
}

/// A generator network trained adversarially against a critic with the
/// Wasserstein objective.
///
/// Labels passed to [`BatchTrainable::train_a_batch`] are ignored apart from
/// the batch-size check: the generator models the input distribution only.
pub struct Wgan {
    config: WganConfig,
    device: Device,
    generator_vars: VarMap,
    critic_vars: VarMap,
    generator: Mlp3,
    critic: Mlp3,
    g_optimizer: Option<AdamWOptimizer>,
    c_optimizer: Option<AdamWOptimizer>,
    noise_rng: ChaCha8Rng,
}

impl Wgan {
    /// Create a WGAN whose parameters and training noise derive from `rng`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration has a zero dimension or a layer
    /// cannot be created.
    pub fn seeded<R: Rng + ?Sized>(config: WganConfig, device: &Device, rng: &mut R) -> Result<Self> {
        if config.z_size == 0 || config.data_dim == 0 {
            return Err(DgrError::Config(
                "WGAN latent and data dimensions must be positive".into(),
            ));
        }
        let generator_vars = VarMap::new();
        let critic_vars = VarMap::new();
        Mlp3::init(&generator_vars, Self::generator_dims(&config), device, rng)?;
        Mlp3::init(&critic_vars, Self::critic_dims(&config), device, rng)?;
        let noise_rng = ChaCha8Rng::seed_from_u64(rng.gen());

        Self::bind(config, device, generator_vars, critic_vars, noise_rng)
    }

    fn generator_dims(config: &WganConfig) -> [usize; 4] {
        [config.z_size, config.g_hidden_size, config.g_hidden_size, config.data_dim]
    }

    fn critic_dims(config: &WganConfig) -> [usize; 4] {
        [config.data_dim, config.c_hidden_size, config.c_hidden_size, 1]
    }

    fn bind(
        config: WganConfig,
        device: &Device,
        generator_vars: VarMap,
        critic_vars: VarMap,
        noise_rng: ChaCha8Rng,
    ) -> Result<Self> {
        let generator = Mlp3::bind(&generator_vars, Self::generator_dims(&config), device)?;
        let critic = Mlp3::bind(&critic_vars, Self::critic_dims(&config), device)?;
        Ok(Self {
            config,
            device: device.clone(),
            generator_vars,
            critic_vars,
            generator,
            critic,
            g_optimizer: None,
            c_optimizer: None,
            noise_rng,
        })
    }

    /// Model configuration.
    #[must_use]
    pub const fn config(&self) -> &WganConfig {
        &self.config
    }

    /// Generator parameters.
    #[must_use]
    pub const fn generator_varmap(&self) -> &VarMap {
        &self.generator_vars
    }

    /// Critic parameters.
    #[must_use]
    pub const fn critic_varmap(&self) -> &VarMap {
        &self.critic_vars
    }

    /// Install the generator optimizer.
    pub fn set_generator_optimizer(&mut self, optimizer: AdamWOptimizer) {
        self.g_optimizer = Some(optimizer);
    }

    /// Install the critic optimizer.
    pub fn set_critic_optimizer(&mut self, optimizer: AdamWOptimizer) {
        self.c_optimizer = Some(optimizer);
    }

    /// Set how many critic steps precede each generator step.
    pub fn set_critic_updates_per_generator_update(&mut self, n: usize) {
        self.config.critic_updates_per_generator_update = n;
    }

    /// Whether both optimizers are installed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.g_optimizer.is_some() && self.c_optimizer.is_some()
    }

    /// Critic score for each row of `x`, shape `[batch]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    pub fn critic_score(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.critic.forward(x)?.squeeze(1)?)
    }

    fn clip_critic(&self) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let clip = self.config.weight_clip as f32;
        for var in self.critic_vars.all_vars() {
            var.set(&var.as_tensor().clamp(-clip, clip)?)?;
        }
        Ok(())
    }
}

fn noise<R: Rng + ?Sized>(rng: &mut R, rows: usize, z_size: usize, device: &Device) -> Result<Tensor> {
    let values: Vec<f32> = (0..rows * z_size).map(|_| rng.sample(StandardNormal)).collect();
    Ok(Tensor::from_vec(values, (rows, z_size), device)?)
}

impl BatchTrainable for Wgan {
    fn train_a_batch(&mut self, x: &Tensor, y: &Tensor) -> Result<BatchResult> {
        let batch = check_batch(x, y)?;
        if x.dims().get(1) != Some(&self.config.data_dim) {
            return Err(DgrError::ShapeMismatch {
                expected: vec![batch, self.config.data_dim],
                got: x.dims().to_vec(),
            });
        }
        if !self.is_ready() {
            return Err(DgrError::Config("WGAN optimizers are not set".into()));
        }
        let x = x.to_dtype(DType::F32)?;

        let mut c_loss_value = 0.0;
        for _ in 0..self.config.critic_updates_per_generator_update.max(1) {
            let z = noise(&mut self.noise_rng, batch, self.config.z_size, &self.device)?;
            let fake = self.generator.forward(&z)?;
            let c_loss = (self.critic.forward(&fake)?.mean_all()? - self.critic.forward(&x)?.mean_all()?)?;
            c_loss_value = finite_scalar(&c_loss, "critic loss")?;
            if let Some(opt) = self.c_optimizer.as_mut() {
                opt.step(&c_loss)?;
            }
            self.clip_critic()?;
        }

        let z = noise(&mut self.noise_rng, batch, self.config.z_size, &self.device)?;
        let fake = self.generator.forward(&z)?;
        let g_loss = self.critic.forward(&fake)?.mean_all()?.neg()?;
        let g_loss_value = finite_scalar(&g_loss, "generator loss")?;
        if let Some(opt) = self.g_optimizer.as_mut() {
            opt.step(&g_loss)?;
        }

        Ok(BatchResult::new(g_loss_value)
            .with("c_loss", c_loss_value)
            .with("g_loss", g_loss_value)
            .with("w_distance", -c_loss_value))
    }
}

impl Generator for Wgan {
    fn sample(&self, size: usize, rng: &mut dyn RngCore) -> Result<Tensor> {
        let z = noise(rng, size, self.config.z_size, &self.device)?;
        self.generator.forward(&z)
    }

    fn deep_copy(&self) -> Result<Self> {
        Self::bind(
            self.config.clone(),
            &self.device,
            copy_varmap(&self.generator_vars)?,
            copy_varmap(&self.critic_vars)?,
            self.noise_rng.clone(),
        )
    }

    fn named_varmaps(&self) -> Vec<(&'static str, &VarMap)> {
        vec![("generator", &self.generator_vars), ("critic", &self.critic_vars)]
    }
}

impl std::fmt::Debug for Wgan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wgan")
            .field("config", &self.config)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::OptimizerConfig;

    fn tiny() -> WganConfig {
        WganConfig {
            z_size: 3,
            data_dim: 4,
            g_hidden_size: 8,
            c_hidden_size: 8,
            critic_updates_per_generator_update: 2,
            weight_clip: 0.01,
        }
    }

    fn ready(config: WganConfig) -> Wgan {
        let mut gan = Wgan::seeded(config, &Device::Cpu, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        let opt = OptimizerConfig::default();
        gan.set_generator_optimizer(opt.build_adamw(gan.generator_varmap()).unwrap());
        gan.set_critic_optimizer(opt.build_adamw(gan.critic_varmap()).unwrap());
        gan
    }

    fn batch(n: usize) -> (Tensor, Tensor) {
        let device = Device::Cpu;
        let x = Tensor::arange(0f32, (n * 4) as f32, &device)
            .unwrap()
            .reshape((n, 4))
            .unwrap()
            .affine(0.1, -1.0)
            .unwrap();
        let y = Tensor::zeros(n, DType::U32, &device).unwrap();
        (x, y)
    }

    #[test]
    fn test_sample_shape() {
        let gan = Wgan::seeded(tiny(), &Device::Cpu, &mut ChaCha8Rng::seed_from_u64(0)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let x = gan.sample(6, &mut rng).unwrap();
        assert_eq!(x.dims(), &[6, 4]);
    }

    #[test]
    fn test_sample_is_deterministic_given_rng() {
        let gan = Wgan::seeded(tiny(), &Device::Cpu, &mut ChaCha8Rng::seed_from_u64(0)).unwrap();
        let a: Vec<Vec<f32>> = gan.sample(3, &mut ChaCha8Rng::seed_from_u64(9)).unwrap().to_vec2().unwrap();
        let b: Vec<Vec<f32>> = gan.sample(3, &mut ChaCha8Rng::seed_from_u64(9)).unwrap().to_vec2().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_same_seed_gives_same_parameters() {
        let a = Wgan::seeded(tiny(), &Device::Cpu, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();
        let b = Wgan::seeded(tiny(), &Device::Cpu, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();
        let (x, _) = batch(3);

        let sa: Vec<f32> = a.critic_score(&x).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let sb: Vec<f32> = b.critic_score(&x).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(sa, sb);

        let ga: Vec<Vec<f32>> = a.sample(3, &mut ChaCha8Rng::seed_from_u64(1)).unwrap().to_vec2().unwrap();
        let gb: Vec<Vec<f32>> = b.sample(3, &mut ChaCha8Rng::seed_from_u64(1)).unwrap().to_vec2().unwrap();
        assert_eq!(ga, gb);
    }

    #[test]
    fn test_train_requires_optimizers() {
        let mut gan = Wgan::seeded(tiny(), &Device::Cpu, &mut ChaCha8Rng::seed_from_u64(0)).unwrap();
        let (x, y) = batch(4);
        assert!(matches!(gan.train_a_batch(&x, &y), Err(DgrError::Config(_))));
    }

    #[test]
    fn test_train_rejects_wrong_feature_dim() {
        let mut gan = ready(tiny());
        let x = Tensor::zeros((4, 7), DType::F32, &Device::Cpu).unwrap();
        let y = Tensor::zeros(4, DType::U32, &Device::Cpu).unwrap();
        assert!(matches!(
            gan.train_a_batch(&x, &y),
            Err(DgrError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_train_reports_components_and_clips_critic() {
        let mut gan = ready(tiny());
        let (x, y) = batch(8);
        let result = gan.train_a_batch(&x, &y).unwrap();

        assert_eq!(result.get("g_loss"), Some(result.loss));
        let c_loss = result.get("c_loss").unwrap();
        assert_eq!(result.get("w_distance"), Some(-c_loss));

        for var in gan.critic_varmap().all_vars() {
            let max: f32 = var.as_tensor().abs().unwrap().max_all().unwrap().to_scalar().unwrap();
            assert!(max <= 0.01 + 1e-6);
        }
    }

    #[test]
    fn test_deep_copy_is_isolated() {
        let mut gan = ready(tiny());
        let copy = gan.deep_copy().unwrap();
        assert!(!copy.is_ready());

        let before: Vec<Vec<f32>> = copy.sample(4, &mut ChaCha8Rng::seed_from_u64(3)).unwrap().to_vec2().unwrap();
        let (x, y) = batch(8);
        for _ in 0..3 {
            gan.train_a_batch(&x, &y).unwrap();
        }
        let after: Vec<Vec<f32>> = copy.sample(4, &mut ChaCha8Rng::seed_from_u64(3)).unwrap().to_vec2().unwrap();
        assert_eq!(before, after);

        let live: Vec<Vec<f32>> = gan.sample(4, &mut ChaCha8Rng::seed_from_u64(3)).unwrap().to_vec2().unwrap();
        assert_ne!(before, live);
    }

    #[test]
    fn test_zero_latent_rejected() {
        let config = WganConfig { z_size: 0, ..tiny() };
        assert!(Wgan::seeded(config, &Device::Cpu, &mut ChaCha8Rng::seed_from_u64(0)).is_err());
    }
}
