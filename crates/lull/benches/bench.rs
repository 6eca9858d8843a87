use core::{convert::Infallible, hint::black_box};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use lull::{
    AutoCloseConfig, Coordinator, CoordinatorConfig, PoolPolicy, Registry, TaskContext,
    TaskHandle, TaskId,
};
use std::time::Instant;
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;

const TOTAL_TASKS: usize = 4096;

fn config(pool: PoolPolicy) -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_auto_close(AutoCloseConfig::disabled())
        .with_pool(pool)
}

/// Dispatches `TOTAL_TASKS` trivial requests and waits for every release.
fn bench_dispatch(c: &mut Criterion, group_name: &str, pool: PoolPolicy, worker_threads: usize) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_TASKS as u64));

    group.bench_function(format!("elems/{TOTAL_TASKS}"), |b| {
        let rt = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(worker_threads)
            .build()
            .unwrap();

        b.to_async(&rt).iter_custom(|iters| async move {
            let start = Instant::now();

            for _ in 0..iters {
                let coordinator = Coordinator::new(
                    |n: u64, _ctx: TaskContext| async move {
                        black_box(n);
                        Ok::<_, Infallible>(())
                    },
                    config(pool),
                )
                .unwrap();

                for n in 0..TOTAL_TASKS as u64 {
                    black_box(coordinator.dispatch(n).unwrap());
                }
                while coordinator.outstanding() > 0 {
                    tokio::task::yield_now().await;
                }
                coordinator.shutdown().await;
            }

            start.elapsed()
        });
    });

    group.finish();
}

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    group.throughput(Throughput::Elements(TOTAL_TASKS as u64));

    group.bench_function(format!("retain_release/{TOTAL_TASKS}"), |b| {
        let registry = Registry::new();
        b.iter(|| {
            for raw in 0..TOTAL_TASKS as u64 {
                let id = TaskId::from_raw(raw);
                registry
                    .retain(id, TaskHandle::new(id, CancellationToken::new()))
                    .unwrap();
            }
            for raw in 0..TOTAL_TASKS as u64 {
                black_box(registry.release(TaskId::from_raw(raw)));
            }
        });
    });

    group.finish();
}

fn benchmark_dispatch_unbounded(c: &mut Criterion) {
    bench_dispatch(c, "dispatch/unbounded", PoolPolicy::Unbounded, 4);
}

fn benchmark_dispatch_bounded(c: &mut Criterion) {
    bench_dispatch(c, "dispatch/bounded_16", PoolPolicy::Bounded(16), 4);
}

fn benchmark_dispatch_single_thread(c: &mut Criterion) {
    bench_dispatch(c, "dispatch/unbounded_1_thread", PoolPolicy::Unbounded, 1);
}

criterion_group!(
    benches,
    benchmark_dispatch_unbounded,
    benchmark_dispatch_bounded,
    benchmark_dispatch_single_thread,
    bench_registry,
);
criterion_main!(benches);
