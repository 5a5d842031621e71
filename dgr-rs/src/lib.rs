//! # dgr-rs
//!
//! Continual learning with Deep Generative Replay.
//!
//! A [`Scholar`] pairs a generator with a solver. Tasks are learned one after
//! another; while learning a new task, batches for earlier tasks are rehearsed
//! by sampling a frozen snapshot of the previous scholar, whose own solver
//! labels the generated inputs.
//!
//! ## Features
//!
//! - **Replay modes** - generative replay, exact replay of retained data, or none
//! - **Pluggable models** - any [`Generator`] and [`trainable::Classifier`] pair
//! - **YAML Configuration** - experiments described in one config file
//! - **Checkpoints** - safetensors parameters plus JSON metadata
//!
//! ## Quick Start (CLI)
//!
//! ```bash
//! # Write a config for an experiment
//! dgr init config.yaml --preset permuted-clusters
//!
//! # Validate and train
//! dgr validate config.yaml
//! dgr train config.yaml
//!
//! # Evaluate the final checkpoint
//! dgr test config.yaml
//! ```
//!
//! ## Quick Start (Library)
//!
//! ```no_run
//! use dgr_rs::{DgrConfig, Trainer};
//!
//! # fn main() -> dgr_rs::Result<()> {
//! let config = DgrConfig::from_file("config.yaml")?;
//! let trainer = Trainer::new(config)?;
//! let (scholar, summary) = trainer.run()?;
//! println!("{}: {:?}", scholar.label(), summary.final_precisions());
//! # Ok(())
//! # }
//! ```
//!
//! ## Driving the replay loop directly
//!
//! ```rust
//! use dgr_rs::{DgrConfig, Trainer, TaskSequence};
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! # fn main() -> dgr_rs::Result<()> {
//! let config = DgrConfig::tiny();
//! let tasks = TaskSequence::generate(&config)?;
//! let trainer = Trainer::new(config)?.with_progress(false);
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(7);
//! let mut scholar = trainer.build_scholar(&mut rng)?;
//! let summary = trainer.train(&mut scholar, &tasks.train, &tasks.test, &mut rng)?;
//! assert_eq!(summary.reports.len(), 3);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod callbacks;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod loss;
pub mod models;
pub mod optimizer;
pub mod replay;
pub mod scholar;
pub mod trainable;
pub mod trainer;

pub use config::{DgrConfig, ReplayMode, TrainingConfig};
pub use dataset::{DataLoader, TaskSequence, TensorDataset};
pub use error::{DgrError, Result};
pub use replay::{ExactReplay, FrozenScholar, ReplayOptions, ReplaySource};
pub use scholar::Scholar;
pub use trainable::{BatchResult, BatchTrainable, Generator, Solver};
pub use trainer::{ReplayKind, TrainingSummary, Trainer};
