use criterion::*;
use ecstore::test_util;
use xias::Xias;

fn create_entity(c: &mut Criterion) {
    let mut group = c.benchmark_group("create entity");

    let registry = test_util::registry();
    let types = test_util::Types::of(&registry);
    let shapes = [
        ("0 components", vec![]),
        ("1 component", vec![types.position]),
        ("2 components", vec![types.position, types.velocity]),
        ("4 components", vec![types.position, types.velocity, types.health, types.target]),
    ];

    for (name, shape) in &shapes {
        for log_entities in (0..=12).step_by(4) {
            let entities: u64 = 1 << log_entities;
            group.throughput(Throughput::Elements(entities));

            group.bench_with_input(
                BenchmarkId::new(format!("{name}/individual"), format!("{entities} entities")),
                &entities,
                |b, &entities| {
                    b.iter_batched(
                        || ecstore::Store::new(registry.clone()),
                        |mut store| {
                            for _ in 0..entities {
                                store.create_entity(shape).expect("valid types");
                            }
                            store
                        },
                        BatchSize::SmallInput,
                    );
                },
            );

            group.bench_with_input(
                BenchmarkId::new(format!("{name}/batch"), format!("{entities} entities")),
                &entities,
                |b, &entities| {
                    b.iter_batched(
                        || ecstore::Store::new(registry.clone()),
                        |mut store| {
                            let count = entities.small_int();
                            store.create_entities(shape, count).expect("valid types");
                            store
                        },
                        BatchSize::SmallInput,
                    );
                },
            );
        }
    }
}

criterion_group!(benches, create_entity);
criterion_main!(benches);
