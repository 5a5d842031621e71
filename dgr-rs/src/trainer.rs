//! Sequential task training.

use std::path::PathBuf;

use candle_core::Device;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::callbacks::{generator_training_callback, solver_training_callback, Callbacks, LogSettings};
use crate::checkpoint::{save_checkpoint, task_checkpoint_dir};
use crate::config::{DgrConfig, GeneratorSettings, ReplayMode};
use crate::dataset::{TaskSequence, TensorDataset};
use crate::error::{DgrError, Result};
use crate::evaluation::precision;
use crate::loss::CrossEntropy;
use crate::models::{parameter_count, MlpClassifier, Wgan, WganConfig};
use crate::optimizer::OptimizerConfig;
use crate::replay::{ExactReplay, FrozenScholar, ReplaySource, ReplayStats};
use crate::scholar::{Scholar, ScholarTrainOptions};
use crate::trainable::{Classifier, Generator, Solver};

/// Scholar built from the reference architectures.
pub type DefaultScholar = Scholar<Wgan, MlpClassifier>;

/// Generators whose optimizers the trainer can install.
pub trait ConfigureOptimizers {
    /// Install fresh optimizers and apply generator-specific settings.
    ///
    /// # Errors
    ///
    /// Returns an error if an optimizer cannot be created.
    fn configure_optimizers(&mut self, optimizer: &OptimizerConfig, settings: &GeneratorSettings) -> Result<()>;
}

impl ConfigureOptimizers for Wgan {
    fn configure_optimizers(&mut self, optimizer: &OptimizerConfig, settings: &GeneratorSettings) -> Result<()> {
        let g = optimizer.build_adamw(self.generator_varmap())?;
        let c = optimizer.build_adamw(self.critic_varmap())?;
        self.set_generator_optimizer(g);
        self.set_critic_optimizer(c);
        self.set_critic_updates_per_generator_update(settings.critic_updates_per_generator_update);
        Ok(())
    }
}

/// What a task was rehearsed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayKind {
    /// No replay source.
    None,
    /// A frozen scholar snapshot.
    Generative {
        /// Identifier of the snapshot.
        snapshot_id: u64,
    },
    /// The retained datasets of earlier tasks.
    Exact {
        /// Number of retained datasets.
        datasets: usize,
    },
}

/// Outcome of training one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// 1-based task index.
    pub task: usize,
    /// Replay source used while training this task.
    pub replay: ReplayKind,
    /// Generator pass counts.
    pub generator: ReplayStats,
    /// Solver pass counts.
    pub solver: ReplayStats,
    /// Solver precision on the test set of each task seen so far.
    pub precisions: Vec<f64>,
}

/// Outcome of a full sequential run.
#[derive(Debug, Clone, Default)]
pub struct TrainingSummary {
    /// One report per task, in order.
    pub reports: Vec<TaskReport>,
    /// Number of frozen snapshots taken.
    pub snapshots_created: usize,
}

impl TrainingSummary {
    /// Precision on every task after the final task.
    #[must_use]
    pub fn final_precisions(&self) -> &[f64] {
        self.reports.last().map_or(&[], |r| r.precisions.as_slice())
    }

    /// Mean of [`Self::final_precisions`].
    #[must_use]
    pub fn mean_final_precision(&self) -> Option<f64> {
        let p = self.final_precisions();
        if p.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = p.iter().sum::<f64>() / p.len() as f64;
        Some(mean)
    }
}

/// Pick the compute device.
///
/// CUDA is used only when requested, compiled in, and present.
/// `DGR_FORCE_CPU=1` always forces the CPU.
#[must_use]
pub fn select_device(cuda: bool) -> Device {
    let force_cpu = std::env::var("DGR_FORCE_CPU")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    let cuda_device = std::env::var("DGR_CUDA_DEVICE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    if !cuda {
        tracing::info!("Training device: CPU");
        return Device::Cpu;
    }
    if force_cpu {
        tracing::warn!("CPU mode forced via DGR_FORCE_CPU=1.");
        return Device::Cpu;
    }
    if !cfg!(feature = "cuda") {
        tracing::warn!("CUDA feature disabled; falling back to CPU. Enable with --features cuda.");
        return Device::Cpu;
    }
    match Device::cuda_if_available(cuda_device) {
        Ok(device @ Device::Cuda(_)) => {
            tracing::info!("Training device: CUDA (device {})", cuda_device);
            device
        }
        Ok(_) => {
            tracing::warn!("CUDA not available; falling back to CPU.");
            Device::Cpu
        }
        Err(err) => {
            tracing::warn!("CUDA init failed ({err}); falling back to CPU.");
            Device::Cpu
        }
    }
}

/// Sequential trainer.
///
/// # Example
///
/// ```no_run
/// use dgr_rs::{DgrConfig, Trainer};
///
/// # fn main() -> dgr_rs::Result<()> {
/// let config = DgrConfig::from_preset("permuted-clusters")?;
/// let trainer = Trainer::new(config)?;
/// let (_scholar, summary) = trainer.run()?;
/// println!("{:?}", summary.final_precisions());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Trainer {
    config: DgrConfig,
    device: Device,
    save_checkpoints: bool,
    show_progress: bool,
}

impl Trainer {
    /// Create a trainer. The configuration is validated first.
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Config`] if the configuration is invalid.
    pub fn new(config: DgrConfig) -> Result<Self> {
        config.validate()?;
        let device = select_device(config.cuda);
        Ok(Self {
            config,
            device,
            save_checkpoints: false,
            show_progress: true,
        })
    }

    /// Save a checkpoint under `checkpoint_dir/task-<n>` after each task.
    #[must_use]
    pub fn with_checkpoints(mut self, enabled: bool) -> Self {
        self.save_checkpoints = enabled;
        self
    }

    /// Draw progress bars.
    #[must_use]
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &DgrConfig {
        &self.config
    }

    /// The compute device.
    #[must_use]
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Label given to scholars built from this configuration.
    #[must_use]
    pub fn scholar_label(&self) -> String {
        format!("{}-{}", self.config.experiment, self.config.replay_mode)
    }

    /// Build an untrained scholar from the reference architectures.
    ///
    /// # Errors
    ///
    /// Returns an error if a model cannot be created.
    pub fn build_scholar<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<DefaultScholar> {
        let data = &self.config.data;
        let g = &self.config.generator;
        let generator = Wgan::seeded(
            WganConfig {
                z_size: g.z_size,
                data_dim: data.input_dim,
                g_hidden_size: g.g_hidden_size,
                c_hidden_size: g.c_hidden_size,
                critic_updates_per_generator_update: g.critic_updates_per_generator_update,
                weight_clip: g.weight_clip,
            },
            &self.device,
            rng,
        )?;
        let s = &self.config.solver;
        let solver = MlpClassifier::seeded(data.input_dim, data.classes, s.depth, s.hidden_size, &self.device, rng)?;
        tracing::info!(
            "Built scholar: generator {} params, critic {} params, solver {} params",
            parameter_count(generator.generator_varmap()),
            parameter_count(generator.critic_varmap()),
            parameter_count(solver.varmap())
        );
        Ok(Scholar::new(
            self.scholar_label(),
            generator,
            Solver::new(solver),
            &self.device,
        ))
    }

    /// Generate the configured task sequence, build a scholar seeded from
    /// `config.seed`, and train it on every task.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while generating data or training.
    pub fn run(&self) -> Result<(DefaultScholar, TrainingSummary)> {
        let tasks = TaskSequence::generate(&self.config)?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut scholar = self.build_scholar(&mut rng)?;
        let summary = self.train(&mut scholar, &tasks.train, &tasks.test, &mut rng)?;
        Ok((scholar, summary))
    }

    /// Train `scholar` on each task in order.
    ///
    /// Installs a cross-entropy criterion on the solver and fresh AdamW
    /// optimizers on the solver and generator, then for task `t`:
    /// builds the callbacks, runs one replay-mixed training call against the
    /// replay source of the configured mode, measures precision on the test
    /// sets of tasks `1..=t`, and updates the replay source (a new frozen
    /// snapshot, or the training sets of tasks `1..=t`).
    ///
    /// # Errors
    ///
    /// Returns [`DgrError::Config`] when no task is given or the test sets
    /// do not line up with the training sets, and the first error raised by
    /// training otherwise. No later task runs after an error.
    pub fn train<G, C>(
        &self,
        scholar: &mut Scholar<G, C>,
        train_datasets: &[TensorDataset],
        test_datasets: &[TensorDataset],
        rng: &mut dyn RngCore,
    ) -> Result<TrainingSummary>
    where
        G: Generator + ConfigureOptimizers + 'static,
        C: Classifier + 'static,
    {
        if train_datasets.is_empty() {
            return Err(DgrError::Config("no tasks to train".into()));
        }
        if test_datasets.len() != train_datasets.len() {
            return Err(DgrError::Config(format!(
                "{} training sets but {} test sets",
                train_datasets.len(),
                test_datasets.len()
            )));
        }

        let training = &self.config.training;
        let optimizer = OptimizerConfig::from_training(training);
        scholar.solver.set_criterion(Box::new(CrossEntropy));
        scholar.solver.set_optimizer(optimizer.build_adamw(scholar.solver.varmap())?);
        scholar.generator.configure_optimizers(&optimizer, &self.config.generator)?;

        let options = ScholarTrainOptions {
            importance_of_new_task: training.importance_of_new_task,
            batch_size: training.batch_size,
            generator_iterations: training.generator_iterations,
            solver_iterations: training.solver_iterations,
        };
        let mut settings = LogSettings::from(training);
        settings.show_progress = self.show_progress;

        let mode = self.config.replay_mode;
        let total = train_datasets.len();
        let mut snapshot: Option<FrozenScholar<G, C>> = None;
        let mut exact: Option<ExactReplay> = None;
        let mut summary = TrainingSummary::default();

        tracing::info!(
            "Starting {} training on {} tasks ({})",
            mode,
            total,
            scholar.label()
        );

        for (index, dataset) in train_datasets.iter().enumerate() {
            let task = index + 1;
            let (previous, replay): (Option<&dyn ReplaySource>, ReplayKind) = match mode {
                ReplayMode::GenerativeReplay => match snapshot.as_ref() {
                    Some(s) => (Some(s as &dyn ReplaySource), ReplayKind::Generative { snapshot_id: s.id() }),
                    None => (None, ReplayKind::None),
                },
                ReplayMode::ExactReplay => match exact.as_ref() {
                    Some(e) => (Some(e as &dyn ReplaySource), ReplayKind::Exact { datasets: e.dataset_count() }),
                    None => (None, ReplayKind::None),
                },
                ReplayMode::None => (None, ReplayKind::None),
            };
            tracing::info!("Task {}/{}: replay {:?}", task, total, replay);

            let mut generator_callbacks: Callbacks<'_, G> = vec![generator_training_callback(
                &settings,
                task,
                total,
                options.generator_iterations,
                rng.gen(),
            )?];
            let mut solver_callbacks: Callbacks<'_, Solver<C>> = vec![solver_training_callback(
                &settings,
                task,
                total,
                options.solver_iterations,
                test_datasets,
                &self.device,
            )?];

            let stats = scholar.train_with_replay(
                dataset,
                previous,
                &options,
                &mut generator_callbacks,
                &mut solver_callbacks,
                &mut *rng,
            )?;

            let precisions = test_datasets[..task]
                .iter()
                .map(|test| precision(&scholar.solver, test, training.test_size, training.batch_size, &self.device))
                .collect::<Result<Vec<_>>>()?;
            tracing::info!("Task {}/{} precision: {:?}", task, total, precisions);

            match mode {
                ReplayMode::GenerativeReplay => {
                    snapshot = Some(scholar.freeze()?);
                    summary.snapshots_created += 1;
                }
                ReplayMode::ExactReplay => {
                    exact = Some(ExactReplay::new(train_datasets[..task].to_vec(), &self.device)?);
                }
                ReplayMode::None => {}
            }

            if self.save_checkpoints {
                save_checkpoint(scholar, task_checkpoint_dir(&self.config.checkpoint_dir, task), task)?;
            }

            summary.reports.push(TaskReport {
                task,
                replay,
                generator: stats.generator,
                solver: stats.solver,
                precisions,
            });
        }

        Ok(summary)
    }

    /// Directory of the checkpoint written after the final task.
    #[must_use]
    pub fn final_checkpoint_dir(&self) -> PathBuf {
        task_checkpoint_dir(&self.config.checkpoint_dir, self.config.task_count())
    }
}
