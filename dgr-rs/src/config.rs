//! Configuration parsing and validation.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DgrError, Result};

/// Main configuration for a Deep Generative Replay experiment.
///
/// # Example
///
/// ```rust
/// use dgr_rs::DgrConfig;
///
/// # fn main() -> dgr_rs::Result<()> {
/// let mut config = DgrConfig::from_preset("permuted-clusters")?;
/// config.training.importance_of_new_task = 0.3;
/// config.validate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DgrConfig {
    /// Experiment (task sequence) to run.
    pub experiment: Experiment,

    /// How earlier tasks are rehearsed.
    #[serde(default)]
    pub replay_mode: ReplayMode,

    /// Synthetic dataset settings.
    #[serde(default)]
    pub data: DataSettings,

    /// Generator (WGAN) settings.
    #[serde(default)]
    pub generator: GeneratorSettings,

    /// Solver (MLP classifier) settings.
    #[serde(default)]
    pub solver: SolverSettings,

    /// Training hyperparameters.
    #[serde(default)]
    pub training: TrainingConfig,

    /// Directory where per-task checkpoints are written.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Random seed for parameter init, data shuffling and replay decisions.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Train on CUDA when available.
    #[serde(default)]
    pub cuda: bool,
}

fn default_checkpoint_dir() -> String {
    "./checkpoints".into()
}

fn default_seed() -> u64 {
    42
}

/// Task sequences the CLI knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Experiment {
    /// One cluster problem, each task applies its own input permutation.
    PermutedClusters,
    /// Two tasks: plain clusters, then the shifted domain.
    ClustersShifted,
    /// Two tasks: shifted domain, then plain clusters.
    ShiftedClusters,
}

impl Experiment {
    /// Name used in configs and on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PermutedClusters => "permuted-clusters",
            Self::ClustersShifted => "clusters-shifted",
            Self::ShiftedClusters => "shifted-clusters",
        }
    }

    /// Number of tasks this experiment trains on.
    #[must_use]
    pub fn task_count(self, data: &DataSettings) -> usize {
        match self {
            Self::PermutedClusters => data.tasks,
            Self::ClustersShifted | Self::ShiftedClusters => 2,
        }
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Experiment {
    type Err = DgrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "permuted-clusters" => Ok(Self::PermutedClusters),
            "clusters-shifted" => Ok(Self::ClustersShifted),
            "shifted-clusters" => Ok(Self::ShiftedClusters),
            _ => Err(DgrError::Config(format!("Given undefined experiment: {s}"))),
        }
    }
}

/// Strategy for rehearsing earlier tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplayMode {
    /// Replay samples drawn from a frozen copy of the previous scholar.
    #[default]
    GenerativeReplay,
    /// Replay the literal datasets of earlier tasks.
    ExactReplay,
    /// Train every task independently.
    None,
}

impl ReplayMode {
    /// Name used in configs and on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GenerativeReplay => "generative-replay",
            Self::ExactReplay => "exact-replay",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReplayMode {
    type Err = DgrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "generative-replay" => Ok(Self::GenerativeReplay),
            "exact-replay" => Ok(Self::ExactReplay),
            "none" => Ok(Self::None),
            _ => Err(DgrError::Config(format!("Unknown replay mode: {s}"))),
        }
    }
}

/// Synthetic dataset settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Number of permuted tasks (`permuted-clusters` only).
    #[serde(default = "default_tasks")]
    pub tasks: usize,

    /// Training examples per task.
    #[serde(default = "default_examples_per_task")]
    pub examples_per_task: usize,

    /// Held-out examples per task.
    #[serde(default = "default_test_examples")]
    pub test_examples_per_task: usize,

    /// Input feature dimension.
    #[serde(default = "default_input_dim")]
    pub input_dim: usize,

    /// Number of classes.
    #[serde(default = "default_classes")]
    pub classes: usize,

    /// Seed for the per-task permutations.
    #[serde(default)]
    pub permutation_seed: u64,

    /// Standard deviation of each class cluster.
    #[serde(default = "default_cluster_std")]
    pub cluster_std: f32,
}

fn default_tasks() -> usize {
    5
}
fn default_examples_per_task() -> usize {
    1000
}
fn default_test_examples() -> usize {
    200
}
fn default_input_dim() -> usize {
    32
}
fn default_classes() -> usize {
    10
}
fn default_cluster_std() -> f32 {
    0.5
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            tasks: default_tasks(),
            examples_per_task: default_examples_per_task(),
            test_examples_per_task: default_test_examples(),
            input_dim: default_input_dim(),
            classes: default_classes(),
            permutation_seed: 0,
            cluster_std: default_cluster_std(),
        }
    }
}

/// Generator (WGAN) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSettings {
    /// Latent noise size.
    #[serde(default = "default_z_size")]
    pub z_size: usize,

    /// Hidden width of the generator network.
    #[serde(default = "default_hidden")]
    pub g_hidden_size: usize,

    /// Hidden width of the critic network.
    #[serde(default = "default_hidden")]
    pub c_hidden_size: usize,

    /// Critic updates performed per generator update.
    #[serde(default = "default_c_updates")]
    pub critic_updates_per_generator_update: usize,

    /// Critic weights are clamped to `[-weight_clip, weight_clip]`.
    #[serde(default = "default_weight_clip")]
    pub weight_clip: f64,
}

fn default_z_size() -> usize {
    16
}
fn default_hidden() -> usize {
    64
}
fn default_c_updates() -> usize {
    5
}
fn default_weight_clip() -> f64 {
    0.01
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            z_size: default_z_size(),
            g_hidden_size: default_hidden(),
            c_hidden_size: default_hidden(),
            critic_updates_per_generator_update: default_c_updates(),
            weight_clip: default_weight_clip(),
        }
    }
}

/// Solver (MLP classifier) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Number of hidden layers.
    #[serde(default = "default_depth")]
    pub depth: usize,

    /// Hidden layer width.
    #[serde(default = "default_solver_hidden")]
    pub hidden_size: usize,
}

fn default_depth() -> usize {
    2
}
fn default_solver_hidden() -> usize {
    128
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            depth: default_depth(),
            hidden_size: default_solver_hidden(),
        }
    }
}

/// Training hyperparameters.
///
/// # Example
///
/// ```rust
/// use dgr_rs::TrainingConfig;
///
/// let training = TrainingConfig {
///     generator_iterations: 500,
///     solver_iterations: 250,
///     importance_of_new_task: 0.3,
///     ..Default::default()
/// };
///
/// assert_eq!(training.batch_size, 32);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Generator iterations per task.
    #[serde(default = "default_generator_iterations")]
    pub generator_iterations: usize,

    /// Solver iterations per task.
    #[serde(default = "default_solver_iterations")]
    pub solver_iterations: usize,

    /// Expected fraction of iterations drawn from the new task's data.
    #[serde(default = "default_importance")]
    pub importance_of_new_task: f64,

    /// Batch size (real and replayed batches alike).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Examples evaluated per test set.
    #[serde(default = "default_test_size")]
    pub test_size: usize,

    /// Samples drawn when reporting on a trained scholar.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Learning rate for every optimizer.
    #[serde(default = "default_lr")]
    pub learning_rate: f64,

    /// Weight decay for every optimizer.
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,

    /// Log losses every N iterations.
    #[serde(default = "default_loss_log_interval")]
    pub loss_log_interval: usize,

    /// Evaluate solver precision every N iterations.
    #[serde(default = "default_eval_log_interval")]
    pub eval_log_interval: usize,

    /// Log generator sample statistics every N iterations.
    #[serde(default = "default_sample_log_interval")]
    pub sample_log_interval: usize,
}

fn default_generator_iterations() -> usize {
    2000
}
fn default_solver_iterations() -> usize {
    1000
}
fn default_importance() -> f64 {
    0.5
}
fn default_batch_size() -> usize {
    32
}
fn default_test_size() -> usize {
    1024
}
fn default_sample_size() -> usize {
    36
}
fn default_lr() -> f64 {
    1e-3
}
fn default_weight_decay() -> f64 {
    1e-5
}
fn default_loss_log_interval() -> usize {
    30
}
fn default_eval_log_interval() -> usize {
    50
}
fn default_sample_log_interval() -> usize {
    100
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            generator_iterations: default_generator_iterations(),
            solver_iterations: default_solver_iterations(),
            importance_of_new_task: default_importance(),
            batch_size: default_batch_size(),
            test_size: default_test_size(),
            sample_size: default_sample_size(),
            learning_rate: default_lr(),
            weight_decay: default_weight_decay(),
            loss_log_interval: default_loss_log_interval(),
            eval_log_interval: default_eval_log_interval(),
            sample_log_interval: default_sample_log_interval(),
        }
    }
}

impl DgrConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create a configuration from an experiment name.
    ///
    /// Available presets: `"permuted-clusters"`, `"clusters-shifted"`,
    /// `"shifted-clusters"`.
    ///
    /// ```rust
    /// use dgr_rs::DgrConfig;
    /// use dgr_rs::config::Experiment;
    ///
    /// # fn main() -> dgr_rs::Result<()> {
    /// let config = DgrConfig::from_preset("shifted-clusters")?;
    /// assert_eq!(config.experiment, Experiment::ShiftedClusters);
    /// assert!(DgrConfig::from_preset("svhn").is_err());
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Config`] for an unknown experiment name.
    pub fn from_preset(preset: &str) -> Result<Self> {
        let experiment = preset.parse::<Experiment>()?;
        Ok(Self::for_experiment(experiment))
    }

    /// Default configuration for an experiment.
    #[must_use]
    pub fn for_experiment(experiment: Experiment) -> Self {
        Self {
            experiment,
            replay_mode: ReplayMode::default(),
            data: DataSettings::default(),
            generator: GeneratorSettings::default(),
            solver: SolverSettings::default(),
            training: TrainingConfig::default(),
            checkpoint_dir: default_checkpoint_dir(),
            seed: default_seed(),
            cuda: false,
        }
    }

    /// Small configuration that trains in well under a second on CPU.
    #[must_use]
    pub fn tiny() -> Self {
        Self {
            data: DataSettings {
                tasks: 3,
                examples_per_task: 100,
                test_examples_per_task: 40,
                input_dim: 8,
                classes: 4,
                ..Default::default()
            },
            generator: GeneratorSettings {
                z_size: 4,
                g_hidden_size: 16,
                c_hidden_size: 16,
                critic_updates_per_generator_update: 2,
                ..Default::default()
            },
            solver: SolverSettings {
                depth: 1,
                hidden_size: 16,
            },
            training: TrainingConfig {
                generator_iterations: 5,
                solver_iterations: 5,
                batch_size: 10,
                test_size: 40,
                sample_size: 8,
                ..Default::default()
            },
            ..Self::for_experiment(Experiment::PermutedClusters)
        }
    }

    /// Number of tasks the configured experiment trains on.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.experiment.task_count(&self.data)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let t = &self.training;

        if !(0.0..=1.0).contains(&t.importance_of_new_task) {
            return Err(DgrError::Config(format!(
                "training.importance_of_new_task must be within [0, 1], got {}",
                t.importance_of_new_task
            )));
        }
        if t.batch_size == 0 {
            return Err(DgrError::Config("training.batch_size must be > 0".into()));
        }
        if t.test_size == 0 {
            return Err(DgrError::Config("training.test_size must be > 0".into()));
        }
        if t.learning_rate <= 0.0 || !t.learning_rate.is_finite() {
            return Err(DgrError::Config(
                "training.learning_rate must be positive".into(),
            ));
        }
        if t.loss_log_interval == 0 || t.eval_log_interval == 0 || t.sample_log_interval == 0 {
            return Err(DgrError::Config("log intervals must be > 0".into()));
        }

        if self.task_count() == 0 {
            return Err(DgrError::Config("data.tasks must be > 0".into()));
        }
        if self.data.examples_per_task == 0 {
            return Err(DgrError::Config(
                "data.examples_per_task must be > 0".into(),
            ));
        }
        if self.data.test_examples_per_task == 0 {
            return Err(DgrError::Config(
                "data.test_examples_per_task must be > 0".into(),
            ));
        }
        if self.data.input_dim == 0 {
            return Err(DgrError::Config("data.input_dim must be > 0".into()));
        }
        if self.data.classes < 2 {
            return Err(DgrError::Config("data.classes must be >= 2".into()));
        }

        let g = &self.generator;
        if g.z_size == 0 || g.g_hidden_size == 0 || g.c_hidden_size == 0 {
            return Err(DgrError::Config(
                "generator sizes must be > 0".into(),
            ));
        }
        if g.critic_updates_per_generator_update == 0 {
            return Err(DgrError::Config(
                "generator.critic_updates_per_generator_update must be > 0".into(),
            ));
        }
        if g.weight_clip <= 0.0 {
            return Err(DgrError::Config("generator.weight_clip must be > 0".into()));
        }

        if self.solver.depth == 0 || self.solver.hidden_size == 0 {
            return Err(DgrError::Config(
                "solver.depth and solver.hidden_size must be > 0".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_serialization() {
        let config = DgrConfig::for_experiment(Experiment::ClustersShifted);
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("clusters-shifted"));
        assert!(yaml.contains("generative-replay"));
        let restored: DgrConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(restored.experiment, Experiment::ClustersShifted);
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config: DgrConfig = serde_yaml::from_str("experiment: permuted-clusters\n").unwrap();
        assert_eq!(config.replay_mode, ReplayMode::GenerativeReplay);
        assert_eq!(config.training.generator_iterations, 2000);
        assert_eq!(config.training.solver_iterations, 1000);
        assert_eq!(config.data.tasks, 5);
        assert_eq!(config.checkpoint_dir, "./checkpoints");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_replay_mode_in_yaml_is_rejected() {
        let yaml = "experiment: permuted-clusters\nreplay_mode: exect-replay\n";
        let result: std::result::Result<DgrConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_replay_mode_from_str() {
        assert_eq!(
            "generative-replay".parse::<ReplayMode>().unwrap(),
            ReplayMode::GenerativeReplay
        );
        assert_eq!("exact-replay".parse::<ReplayMode>().unwrap(), ReplayMode::ExactReplay);
        assert_eq!("none".parse::<ReplayMode>().unwrap(), ReplayMode::None);
        assert!(matches!(
            "replay-everything".parse::<ReplayMode>(),
            Err(DgrError::Config(_))
        ));
    }

    #[test]
    fn test_presets() {
        assert!(DgrConfig::from_preset("permuted-clusters").is_ok());
        assert!(DgrConfig::from_preset("clusters-shifted").is_ok());
        assert!(DgrConfig::from_preset("shifted-clusters").is_ok());
        assert!(matches!(
            DgrConfig::from_preset("permutated-mnist"),
            Err(DgrError::Config(_))
        ));
    }

    #[test]
    fn test_task_count() {
        let mut config = DgrConfig::for_experiment(Experiment::PermutedClusters);
        config.data.tasks = 7;
        assert_eq!(config.task_count(), 7);

        config.experiment = Experiment::ShiftedClusters;
        assert_eq!(config.task_count(), 2);
    }

    #[test]
    fn test_degenerate_importance_is_valid() {
        let mut config = DgrConfig::tiny();
        config.training.importance_of_new_task = 0.0;
        assert!(config.validate().is_ok());
        config.training.importance_of_new_task = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_out_of_range_importance() {
        let mut config = DgrConfig::tiny();
        config.training.importance_of_new_task = 1.5;
        assert!(config.validate().is_err());
        config.training.importance_of_new_task = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_dataset() {
        let mut config = DgrConfig::tiny();
        config.data.examples_per_task = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_test_split() {
        let mut config = DgrConfig::tiny();
        config.training.test_size = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DgrError::Config(ref msg) if msg.contains("test_size")));

        let mut config = DgrConfig::tiny();
        config.data.test_examples_per_task = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DgrError::Config(ref msg) if msg.contains("test_examples_per_task")));
    }

    #[test]
    fn test_validation_rejects_zero_batch_size() {
        let mut config = DgrConfig::tiny();
        config.training.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_tasks() {
        let mut config = DgrConfig::tiny();
        config.data.tasks = 0;
        assert!(config.validate().is_err());

        // two-domain experiments ignore data.tasks
        config.experiment = Experiment::ClustersShifted;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_generator_settings() {
        let mut config = DgrConfig::tiny();
        config.generator.critic_updates_per_generator_update = 0;
        assert!(config.validate().is_err());

        let mut config = DgrConfig::tiny();
        config.generator.weight_clip = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tiny_is_valid() {
        let config = DgrConfig::tiny();
        assert!(config.validate().is_ok());
        assert_eq!(config.task_count(), 3);
        assert_eq!(config.training.batch_size, 10);
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(DgrConfig::from_file("/nonexistent/path/config.yaml").is_err());
    }

    #[test]
    fn test_load_config_malformed_yaml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "experiment: [[[").unwrap();

        assert!(DgrConfig::from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_save_config_roundtrip() {
        let mut config = DgrConfig::tiny();
        config.replay_mode = ReplayMode::ExactReplay;
        let temp_file = NamedTempFile::new().unwrap();

        config.to_file(temp_file.path()).unwrap();
        let loaded = DgrConfig::from_file(temp_file.path()).unwrap();

        assert_eq!(loaded.replay_mode, ReplayMode::ExactReplay);
        assert_eq!(loaded.data.classes, config.data.classes);
        assert_eq!(loaded.training.batch_size, config.training.batch_size);
    }

    #[test]
    fn test_shipped_configs_are_valid() {
        for yaml in [
            include_str!("../configs/permuted-clusters.yaml"),
            include_str!("../configs/clusters-shifted-exact.yaml"),
            include_str!("../configs/shifted-clusters-none.yaml"),
        ] {
            let config: DgrConfig = serde_yaml::from_str(yaml).unwrap();
            config.validate().unwrap();
        }
    }
}
