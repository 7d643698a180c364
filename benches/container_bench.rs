//! Benchmarks for the DI container

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use scoped_injector::{ConcurrentBucketMap, Constructible, Container, MapOptions, ResolveOverrides};
use std::hint::black_box;
use std::sync::Arc;

struct Config {
    port: u16,
}

impl Constructible for Config {
    type Dependencies = ();

    fn construct(_: ()) -> Self {
        Config { port: 8080 }
    }
}

struct Database {
    _config: Arc<Config>,
}

impl Constructible for Database {
    type Dependencies = Arc<Config>;

    fn parameter_names() -> &'static [&'static str] {
        &["config"]
    }

    fn construct(config: Arc<Config>) -> Self {
        Database { _config: config }
    }
}

struct Cache;

impl Constructible for Cache {
    type Dependencies = ();

    fn construct(_: ()) -> Self {
        Cache
    }
}

struct UserService {
    _db: Arc<Database>,
    _cache: Option<Arc<Cache>>,
}

impl Constructible for UserService {
    type Dependencies = (Arc<Database>, Option<Arc<Cache>>);

    fn construct((db, cache): Self::Dependencies) -> Self {
        UserService { _db: db, _cache: cache }
    }
}

fn graph(container: &Container) {
    container.singleton::<Config>().unwrap();
    container.transient::<Database>().unwrap();
    container.scoped::<Cache>().unwrap();
    container.transient::<UserService>().unwrap();
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    group.bench_function("graph_of_4", |b| {
        b.iter(|| {
            let container = Container::new();
            graph(&container);
            black_box(container)
        })
    });

    for count in [16usize, 256] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("named_values", count), &count, |b, &count| {
            let names: Vec<String> = (0..count).map(|i| format!("cfg{i}")).collect();
            b.iter(|| {
                let container = Container::new();
                for name in &names {
                    container.instance_named(name, Config { port: 1 }).unwrap();
                }
                black_box(container)
            })
        });
    }

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    let container = Container::new();
    graph(&container);

    group.bench_function("singleton_cached", |b| {
        b.iter(|| black_box(container.get::<Config>().unwrap()))
    });

    group.bench_function("transient_with_dep", |b| {
        b.iter(|| black_box(container.get::<Database>().unwrap()))
    });

    group.bench_function("transient_graph", |b| {
        b.iter(|| black_box(container.get::<UserService>().unwrap()))
    });

    let overrides = ResolveOverrides::new().parameter_of(Arc::new(Config { port: 9090 }));
    group.bench_function("transient_with_override", |b| {
        b.iter(|| black_box(container.get_with::<Database>(&overrides).unwrap()))
    });

    group.bench_function("not_registered", |b| {
        b.iter(|| black_box(container.get::<String>().is_err()))
    });

    group.finish();
}

fn bench_scoped(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoped");
    let root = Container::new();
    graph(&root);

    group.bench_function("create_scope", |b| b.iter(|| black_box(root.scope())));

    group.bench_function("scope_resolve_dispose", |b| {
        b.iter(|| {
            let scope = root.scope();
            let users = scope.get::<UserService>().unwrap();
            scope.dispose().unwrap();
            black_box(users)
        })
    });

    let scope = root.scope();
    scope.get::<Cache>().unwrap();
    group.bench_function("scoped_cached", |b| {
        b.iter(|| black_box(scope.get::<Cache>().unwrap()))
    });

    group.finish();
}

fn bench_bucket_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_map");

    for count in [64u64, 1024] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("insert", count), &count, |b, &count| {
            b.iter(|| {
                let map = ConcurrentBucketMap::with_options(MapOptions::default());
                for i in 0..count {
                    map.try_add(i, i);
                }
                black_box(map)
            })
        });

        let map = ConcurrentBucketMap::with_options(MapOptions::default());
        for i in 0..count {
            map.try_add(i, i);
        }
        group.bench_with_input(BenchmarkId::new("find", count), &count, |b, &count| {
            b.iter(|| {
                for i in 0..count {
                    black_box(map.try_find(&i));
                }
            })
        });
    }

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    let container = Container::new();
    graph(&container);

    group.bench_function("concurrent_reads_4", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let c = container.clone();
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let _ = c.get::<Config>().unwrap();
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_registration,
    bench_resolution,
    bench_scoped,
    bench_bucket_map,
    bench_concurrent,
);

criterion_main!(benches);
