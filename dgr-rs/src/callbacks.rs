//! Per-batch training callbacks.
//!
//! A callback observes the trainable after every step of a training pass. It
//! cannot fail: anything that goes wrong inside one (a sampling or evaluation
//! error) is logged and training continues.

use candle_core::Device;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::TrainingConfig;
use crate::dataset::TensorDataset;
use crate::error::Result;
use crate::evaluation::{feature_stats, precision};
use crate::trainable::{BatchResult, Classifier, Generator, Solver};

/// Observer invoked after each training step with the trainable, the step's
/// result, and the zero-based iteration index.
pub trait TrainingCallback<T: ?Sized> {
    /// Handle one completed step.
    fn on_batch(&mut self, trainable: &T, result: &BatchResult, iteration: usize);
}

impl<T: ?Sized, F> TrainingCallback<T> for F
where
    F: FnMut(&T, &BatchResult, usize),
{
    fn on_batch(&mut self, trainable: &T, result: &BatchResult, iteration: usize) {
        self(trainable, result, iteration);
    }
}

/// Ordered callback list for one training pass.
pub type Callbacks<'a, T> = Vec<Box<dyn TrainingCallback<T> + 'a>>;

/// Logging cadence shared by the generator and solver callbacks.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Log losses every this many iterations.
    pub loss_log_interval: usize,
    /// Log solver precision every this many iterations.
    pub eval_log_interval: usize,
    /// Log generated-sample statistics every this many iterations.
    pub sample_log_interval: usize,
    /// Examples per test set used for precision.
    pub test_size: usize,
    /// Examples drawn for sample statistics.
    pub sample_size: usize,
    /// Batch size for evaluation.
    pub batch_size: usize,
    /// Draw an `indicatif` progress bar.
    pub show_progress: bool,
}

impl From<&TrainingConfig> for LogSettings {
    fn from(training: &TrainingConfig) -> Self {
        Self {
            loss_log_interval: training.loss_log_interval,
            eval_log_interval: training.eval_log_interval,
            sample_log_interval: training.sample_log_interval,
            test_size: training.test_size,
            sample_size: training.sample_size,
            batch_size: training.batch_size,
            show_progress: true,
        }
    }
}

fn is_due(iteration: usize, interval: usize) -> bool {
    interval > 0 && iteration % interval == 0
}

fn progress_bar(settings: &LogSettings, iterations: usize, prefix: String) -> Result<ProgressBar> {
    if !settings.show_progress {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(iterations as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>6}/{len:6} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_prefix(prefix);
    Ok(pb)
}

/// Progress and loss/sample logging for a generator pass on task
/// `task` of `total_tasks` (both 1-based).
///
/// # Errors
///
/// Returns an error if the progress bar template is invalid.
pub fn generator_training_callback<'a, G: Generator + 'a>(
    settings: &LogSettings,
    task: usize,
    total_tasks: usize,
    iterations: usize,
    sample_seed: u64,
) -> Result<Box<dyn TrainingCallback<G> + 'a>> {
    let settings = settings.clone();
    let pb = progress_bar(&settings, iterations, format!("<Gen> task {task}/{total_tasks}"))?;
    let mut rng = ChaCha8Rng::seed_from_u64(sample_seed);

    Ok(Box::new(move |generator: &G, result: &BatchResult, iteration: usize| {
        pb.set_message(format!("g_loss: {:.4}", result.loss));
        pb.inc(1);
        let step = iteration + 1;

        if is_due(step, settings.loss_log_interval) {
            tracing::info!(
                task,
                step,
                loss = result.loss,
                components = ?result.components,
                "generator step"
            );
        }
        if is_due(step, settings.sample_log_interval) {
            match generator
                .sample(settings.sample_size, &mut rng)
                .and_then(|x| feature_stats(&x))
            {
                Ok((mean, std)) => tracing::info!(task, step, mean, std, "generated samples"),
                Err(err) => tracing::warn!(task, step, "failed to sample generator: {err}"),
            }
        }
        if step == iterations {
            pb.finish_with_message(format!("g_loss: {:.4}", result.loss));
        }
    }))
}

/// Progress, loss and precision logging for a solver pass on task `task` of
/// `total_tasks`.
///
/// Precision is measured on the test sets of tasks `1..=task`, which must be
/// the leading entries of `test_datasets`.
///
/// # Errors
///
/// Returns an error if the progress bar template is invalid.
pub fn solver_training_callback<'a, C: Classifier + 'a>(
    settings: &LogSettings,
    task: usize,
    total_tasks: usize,
    iterations: usize,
    test_datasets: &'a [TensorDataset],
    device: &Device,
) -> Result<Box<dyn TrainingCallback<Solver<C>> + 'a>> {
    let settings = settings.clone();
    let device = device.clone();
    let pb = progress_bar(&settings, iterations, format!("<Sol> task {task}/{total_tasks}"))?;
    let seen = &test_datasets[..task.min(test_datasets.len())];

    Ok(Box::new(move |solver: &Solver<C>, result: &BatchResult, iteration: usize| {
        pb.set_message(format!("loss: {:.4}", result.loss));
        pb.inc(1);
        let step = iteration + 1;

        if is_due(step, settings.loss_log_interval) {
            tracing::info!(task, step, loss = result.loss, "solver step");
        }
        if is_due(step, settings.eval_log_interval) {
            for (i, dataset) in seen.iter().enumerate() {
                match precision(solver, dataset, settings.test_size, settings.batch_size, &device) {
                    Ok(p) => tracing::info!(task, step, eval_task = i + 1, precision = p, "solver precision"),
                    Err(err) => tracing::warn!(task, step, eval_task = i + 1, "evaluation failed: {err}"),
                }
            }
        }
        if step == iterations {
            pb.finish_with_message(format!("loss: {:.4}", result.loss));
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MlpClassifier, Wgan, WganConfig};

    fn quiet() -> LogSettings {
        LogSettings {
            loss_log_interval: 1,
            eval_log_interval: 1,
            sample_log_interval: 1,
            test_size: 4,
            sample_size: 3,
            batch_size: 2,
            show_progress: false,
        }
    }

    #[test]
    fn test_closure_is_a_callback() {
        let mut calls = Vec::new();
        {
            let mut cb = |t: &str, r: &BatchResult, i: usize| calls.push((t.len(), r.loss, i));
            cb.on_batch("abc", &BatchResult::new(1.5), 7);
        }
        assert_eq!(calls, vec![(3, 1.5, 7)]);
    }

    #[test]
    fn test_boxed_callback_list() {
        let mut order = Vec::new();
        {
            let mut callbacks: Callbacks<'_, str> = Vec::new();
            callbacks.push(Box::new(|_: &str, _: &BatchResult, i: usize| order.push(i)));
            for callback in &mut callbacks {
                callback.on_batch("", &BatchResult::new(0.0), 4);
            }
        }
        assert_eq!(order, vec![4]);
    }

    #[test]
    fn test_is_due() {
        assert!(is_due(30, 30));
        assert!(!is_due(31, 30));
        assert!(!is_due(5, 0));
    }

    #[test]
    fn test_log_settings_from_training() {
        let training = TrainingConfig::default();
        let settings = LogSettings::from(&training);
        assert_eq!(settings.loss_log_interval, training.loss_log_interval);
        assert_eq!(settings.test_size, training.test_size);
    }

    #[test]
    fn test_generator_callback_runs() {
        let config = WganConfig {
            z_size: 2,
            data_dim: 3,
            g_hidden_size: 4,
            c_hidden_size: 4,
            ..WganConfig::default()
        };
        let gan = Wgan::seeded(config, &Device::Cpu, &mut ChaCha8Rng::seed_from_u64(0)).unwrap();
        let mut cb = generator_training_callback::<Wgan>(&quiet(), 1, 1, 2, 0).unwrap();
        cb.on_batch(&gan, &BatchResult::new(0.1).with("c_loss", 0.2), 0);
        cb.on_batch(&gan, &BatchResult::new(0.1), 1);
    }

    #[test]
    fn test_solver_callback_runs() {
        let device = Device::Cpu;
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let solver = Solver::new(MlpClassifier::seeded(2, 2, 1, 4, &device, &mut rng).unwrap());
        let tests = vec![TensorDataset::new(vec![0.0; 8], vec![0, 1, 0, 1], 2, 2).unwrap()];
        let mut cb = solver_training_callback::<MlpClassifier>(&quiet(), 2, 2, 1, &tests, &device).unwrap();
        cb.on_batch(&solver, &BatchResult::new(0.3), 0);
    }
}
