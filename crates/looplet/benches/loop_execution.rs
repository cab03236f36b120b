use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use looplet::{gather, sleep, EventLoop};
use std::time::Duration;

fn bench_spawn_and_drive(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_and_drive");

    for task_count in [10u64, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(task_count),
            &task_count,
            |b, &task_count| {
                b.iter(|| {
                    let event_loop = EventLoop::new();
                    let handles: Vec<_> = (0..task_count)
                        .map(|n| event_loop.spawn(async move { Ok(black_box(n) * 2) }).unwrap())
                        .collect();
                    let main = event_loop
                        .spawn(async move { Ok(gather(handles).await?) })
                        .unwrap();
                    let values = event_loop.run_until_complete(&main).unwrap();
                    event_loop.close();
                    values
                });
            },
        );
    }

    group.finish();
}

fn bench_timer_heavy_workload(c: &mut Criterion) {
    c.bench_function("timer_heavy_workload", |b| {
        b.iter(|| {
            let event_loop = EventLoop::new();
            let handles: Vec<_> = (1..=100u64)
                .map(|n| {
                    event_loop
                        .spawn(async move {
                            sleep(Duration::from_millis(black_box(n))).await;
                            Ok(n)
                        })
                        .unwrap()
                })
                .collect();
            let main = event_loop
                .spawn(async move { Ok(gather(handles).await?) })
                .unwrap();
            let values = event_loop.run_until_complete(&main).unwrap();
            event_loop.close();
            values
        });
    });
}

criterion_group!(benches, bench_spawn_and_drive, bench_timer_heavy_workload);
criterion_main!(benches);
