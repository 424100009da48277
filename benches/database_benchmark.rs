use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nyarudb2::{Codec, Config, Database, Operator, WireFormat};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: u32,
    name: String,
    age: u32,
}

fn random_users(count: usize) -> Vec<User> {
    let mut rng = rand::thread_rng();
    let names = ["Alice", "Bob", "Charlie", "David", "Eve", "Mallory"];
    (0..count)
        .map(|i| User {
            id: i as u32,
            name: names[rng.gen_range(0..names.len())].to_string(),
            age: rng.gen_range(18..80),
        })
        .collect()
}

fn seeded_db(dir: &tempfile::TempDir, format: WireFormat, users: &[User]) -> Database {
    let mut config = Config::new(dir.path());
    config.format = format;
    config.codec = Codec::General;
    let db = Database::open(config).unwrap();
    db.create_index("Users", "age").unwrap();
    db.bulk_insert("Users", users).unwrap();
    db
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for format in [WireFormat::TagTree, WireFormat::Packed] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", format)),
            &format,
            |b, &format| {
                let users = random_users(100);
                b.iter_batched(
                    || tempfile::tempdir().unwrap(),
                    |dir| {
                        let db = seeded_db(&dir, format, &users);
                        black_box(db.count_documents("Users").unwrap());
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_query_strategies(c: &mut Criterion) {
    let users = random_users(2_000);

    let indexed_dir = tempfile::tempdir().unwrap();
    let indexed = seeded_db(&indexed_dir, WireFormat::TagTree, &users);

    let plain_dir = tempfile::tempdir().unwrap();
    let plain = {
        let db = Database::open(Config::new(plain_dir.path())).unwrap();
        db.bulk_insert("Users", &users).unwrap();
        db
    };

    let mut group = c.benchmark_group("query");
    group.bench_function("index_probe_equal", |b| {
        b.iter(|| {
            let hits: Vec<User> = indexed
                .query("Users")
                .where_field("age", Operator::equal(30))
                .execute()
                .unwrap();
            black_box(hits)
        });
    });
    group.bench_function("full_scan_equal", |b| {
        b.iter(|| {
            let hits: Vec<User> = plain
                .query("Users")
                .where_field("age", Operator::equal(30))
                .execute()
                .unwrap();
            black_box(hits)
        });
    });
    group.bench_function("index_range_between", |b| {
        b.iter(|| {
            let hits: Vec<User> = indexed
                .query("Users")
                .where_field("age", Operator::between(30, 40))
                .execute()
                .unwrap();
            black_box(hits)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_query_strategies);
criterion_main!(benches);
