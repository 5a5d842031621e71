//! CLI entry point for dgr-rs.

use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dgr_rs::checkpoint::load_checkpoint;
use dgr_rs::evaluation::{precision, SampleReport};
use dgr_rs::{DgrConfig, Result, TaskSequence, Trainer};

#[derive(Parser)]
#[command(name = "dgr")]
#[command(about = "Continual learning with Deep Generative Replay")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        config: String,
    },
    /// Train a scholar on every task of the experiment
    Train {
        /// Path to configuration file
        config: String,
        /// Override the configured seed
        #[arg(long)]
        seed: Option<u64>,
        /// Skip writing per-task checkpoints
        #[arg(long)]
        no_checkpoint: bool,
    },
    /// Evaluate a trained checkpoint on every task
    Test {
        /// Path to configuration file
        config: String,
        /// Checkpoint directory (defaults to the final task's checkpoint)
        #[arg(long)]
        checkpoint: Option<String>,
    },
    /// Generate a sample configuration file
    Init {
        /// Output path for config file
        #[arg(default_value = "config.yaml")]
        output: String,
        /// Experiment preset (permuted-clusters, clusters-shifted, shifted-clusters)
        #[arg(long, default_value = "permuted-clusters")]
        preset: String,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            tracing::info!("Validating configuration: {}", config);
            let config = DgrConfig::from_file(&config)?;
            config.validate()?;
            println!("✓ Configuration is valid");
            println!("  Experiment: {}", config.experiment);
            println!("  Replay mode: {}", config.replay_mode);
            println!("  Tasks: {}", config.task_count());
        }
        Commands::Train {
            config,
            seed,
            no_checkpoint,
        } => {
            tracing::info!("Starting training with config: {}", config);
            let mut config = DgrConfig::from_file(&config)?;
            if let Some(seed) = seed {
                config.seed = seed;
            }

            let trainer = Trainer::new(config)?.with_checkpoints(!no_checkpoint);
            let (_, summary) = trainer.run()?;
            for report in &summary.reports {
                println!(
                    "Task {}: replay {:?}, precision {:?}",
                    report.task, report.replay, report.precisions
                );
            }
            if let Some(mean) = summary.mean_final_precision() {
                println!("✓ Training complete, mean precision {mean:.4}");
            }
        }
        Commands::Test { config, checkpoint } => {
            let config = DgrConfig::from_file(&config)?;
            let trainer = Trainer::new(config)?;
            let dir = checkpoint.map_or_else(|| trainer.final_checkpoint_dir(), Into::into);
            tracing::info!("Testing checkpoint: {}", dir.display());

            let mut rng = ChaCha8Rng::seed_from_u64(trainer.config().seed);
            let scholar = trainer.build_scholar(&mut rng)?;
            let metadata = load_checkpoint(&scholar, &dir)?;
            let tasks = TaskSequence::generate(trainer.config())?;
            let training = &trainer.config().training;

            println!("Scholar {} after {} tasks", metadata.label, metadata.tasks_completed);
            for (i, test) in tasks.test.iter().enumerate() {
                let p = precision(
                    &scholar.solver,
                    test,
                    training.test_size,
                    training.batch_size,
                    trainer.device(),
                )?;
                println!("  Task {}: precision {p:.4}", i + 1);
            }
            let (x, y) = scholar.sample(training.sample_size, &mut rng)?;
            let report = SampleReport::from_batch(&x, &y, trainer.config().data.classes)?;
            println!("  Samples: {report}");
        }
        Commands::Init { output, preset } => {
            tracing::info!("Generating config for preset: {}", preset);
            let config = DgrConfig::from_preset(&preset)?;
            config.to_file(&output)?;
            println!("✓ Configuration written to: {output}");
        }
    }

    Ok(())
}
