use candle_core::Device;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use dgr_rs::callbacks::Callbacks;
use dgr_rs::loss::CrossEntropy;
use dgr_rs::optimizer::OptimizerConfig;
use dgr_rs::replay::train_with_replay_loop;
use dgr_rs::trainer::DefaultScholar;
use dgr_rs::{BatchTrainable, DataLoader, DgrConfig, ReplayOptions, Solver, TaskSequence, Trainer};

fn prepared_scholar(trainer: &Trainer) -> DefaultScholar {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let mut scholar = trainer.build_scholar(&mut rng).unwrap();
    let opt = OptimizerConfig::default();
    scholar.solver.set_optimizer(opt.build_adamw(scholar.solver.varmap()).unwrap());
    scholar.solver.set_criterion(Box::new(CrossEntropy));
    scholar
        .generator
        .set_generator_optimizer(opt.build_adamw(scholar.generator.generator_varmap()).unwrap());
    scholar
        .generator
        .set_critic_optimizer(opt.build_adamw(scholar.generator.critic_varmap()).unwrap());
    scholar
}

fn benchmark_replay(c: &mut Criterion) {
    let config = DgrConfig::tiny();
    let tasks = TaskSequence::generate(&config).unwrap();
    let trainer = Trainer::new(config).unwrap().with_progress(false);
    let mut scholar = prepared_scholar(&trainer);
    let frozen = scholar.freeze().unwrap();
    let device = Device::Cpu;

    c.bench_function("solver_train_a_batch", |b| {
        let mut loader = DataLoader::new(&tasks.train[0], 10, &device, 0).unwrap();
        b.iter(|| {
            let (x, y) = loader.next_batch().unwrap();
            black_box(scholar.solver.train_a_batch(&x, &y).unwrap())
        });
    });

    c.bench_function("generator_train_a_batch", |b| {
        let mut loader = DataLoader::new(&tasks.train[0], 10, &device, 0).unwrap();
        b.iter(|| {
            let (x, y) = loader.next_batch().unwrap();
            black_box(scholar.generator.train_a_batch(&x, &y).unwrap())
        });
    });

    c.bench_function("frozen_scholar_sample_32", |b| {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        b.iter(|| black_box(frozen.sample(32, &mut rng).unwrap()));
    });

    c.bench_function("replay_loop_20_iterations", |b| {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let options = ReplayOptions {
            importance_of_new_task: 0.5,
            batch_size: 10,
            iterations: 20,
        };
        b.iter(|| {
            let mut loader = DataLoader::new(&tasks.train[1], 10, &device, 0).unwrap();
            let mut callbacks: Callbacks<'_, Solver<_>> = Vec::new();
            black_box(
                train_with_replay_loop(
                    &mut scholar.solver,
                    &mut loader,
                    Some(&frozen),
                    &options,
                    &mut callbacks,
                    &mut rng,
                )
                .unwrap(),
            )
        });
    });
}

criterion_group!(benches, benchmark_replay);
criterion_main!(benches);
