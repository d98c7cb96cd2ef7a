use std::thread;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion};
use gatekeep::{
    field, Client, ClientBuilder, Context, Experiment, FeatureRule, FeatureSetBuilder,
};

fn build_shared_client() -> Client {
    let mut builder = FeatureSetBuilder::new();
    for i in 0..20 {
        builder = builder.feature(&format!("f{i}"), |f| {
            f.default_value(false)
                .rule(FeatureRule::force(true).when(field("plan").equals("enterprise")))
                .rule(FeatureRule::experiment(
                    Experiment::from_legacy(format!("exp{i}"), [false, true], None, 1.0).unwrap(),
                ))
        });
    }
    let features = builder.build().unwrap();

    let context = Context::new()
        .with_attribute("id", "user-12345")
        .with_attribute("plan", "pro");
    ClientBuilder::new(context).features(features).build()
}

fn bench_throughput(c: &mut Criterion) {
    let thread_counts = [1, 2, 4, 8];

    let mut group = c.benchmark_group("throughput");
    group.measurement_time(Duration::from_secs(5));

    for &threads in &thread_counts {
        let client = build_shared_client();

        group.bench_function(format!("{threads}_threads"), |b| {
            b.iter_custom(|iters| {
                let per_thread = iters / threads as u64;
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let client = client.clone();
                        thread::spawn(move || {
                            let key = format!("f{}", t % 20);
                            let start = Instant::now();
                            for _ in 0..per_thread {
                                let _ = client.evaluate_feature(&key);
                            }
                            start.elapsed()
                        })
                    })
                    .collect();

                let mut max_elapsed = Duration::ZERO;
                for h in handles {
                    let elapsed = h.join().unwrap();
                    if elapsed > max_elapsed {
                        max_elapsed = elapsed;
                    }
                }
                max_elapsed
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
