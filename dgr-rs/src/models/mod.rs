//! Reference architectures for the scholar's generator and solver.
//!
//! Both models are small MLPs over flat feature vectors. Parameters are
//! initialised from an explicit RNG so a run is reproducible from its seed.

mod mlp;
mod wgan;

pub use mlp::MlpClassifier;
pub use wgan::{Wgan, WganConfig};

use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;
use rand::Rng;

use crate::error::{DgrError, Result};

/// Insert `{prefix}.weight` / `{prefix}.bias` for a linear layer into `varmap`,
/// drawn uniformly from `±1/sqrt(in_dim)`.
///
/// Layers are then bound to these variables through a `VarBuilder`, which
/// returns existing entries instead of initialising new ones.
pub(crate) fn init_linear<R: Rng + ?Sized>(
    varmap: &VarMap,
    prefix: &str,
    in_dim: usize,
    out_dim: usize,
    device: &Device,
    rng: &mut R,
) -> Result<()> {
    #[allow(clippy::cast_precision_loss)]
    let bound = 1.0 / (in_dim as f32).sqrt();
    let weight: Vec<f32> = (0..in_dim * out_dim)
        .map(|_| rng.gen_range(-bound..bound))
        .collect();
    let bias: Vec<f32> = (0..out_dim).map(|_| rng.gen_range(-bound..bound)).collect();

    let weight = Tensor::from_vec(weight, (out_dim, in_dim), device)?;
    let bias = Tensor::from_vec(bias, out_dim, device)?;

    let mut data = varmap
        .data()
        .lock()
        .map_err(|_| DgrError::Training("parameter map lock poisoned".into()))?;
    data.insert(format!("{prefix}.weight"), Var::from_tensor(&weight)?);
    data.insert(format!("{prefix}.bias"), Var::from_tensor(&bias)?);
    Ok(())
}

/// Total number of scalar parameters in `varmap`.
#[must_use]
pub fn parameter_count(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}
