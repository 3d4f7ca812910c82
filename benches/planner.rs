use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use weft::{App, Res, ResMut};

struct UpdateStage;

macro_rules! reader_writer_chain {
    ($app:expr, $n:expr) => {{
        fn read(_v: Res<i32>) {}
        fn write(mut v: ResMut<i32>) {
            *v += 1;
        }

        for i in 0..$n {
            if i % 2 == 0 {
                $app.register_system::<UpdateStage, _>(write as fn(ResMut<i32>));
            } else {
                $app.register_system::<UpdateStage, _>(read as fn(Res<i32>));
            }
        }
    }};
}

fn bench_cold_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner_cold");

    for size in [8usize, 32, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let app = App::new();
                app.emplace_global(0i32).unwrap();
                reader_writer_chain!(app, size);
                app.schedule::<UpdateStage>();
                weft::sync_wait(app.run_scheduler()).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_warm_plan(c: &mut Criterion) {
    let app = App::new();
    app.emplace_global(0i32).unwrap();
    reader_writer_chain!(app, 32);

    // One run to populate the plan cache, so the benchmarked iterations all
    // hit the warm path.
    app.schedule::<UpdateStage>();
    weft::sync_wait(app.run_scheduler()).unwrap();

    c.bench_function("planner_warm_32", |b| {
        b.iter(|| {
            app.schedule::<UpdateStage>();
            weft::sync_wait(app.run_scheduler()).unwrap();
        });
    });
}

criterion_group!(benches, bench_cold_plan, bench_warm_plan);
criterion_main!(benches);
