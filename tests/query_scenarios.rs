use nyarudb2::{Config, Database, Operator, QueryPlan};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u32,
    name: String,
    age: u32,
}

fn user(id: u32, name: &str, age: u32) -> User {
    User {
        id,
        name: name.to_string(),
        age,
    }
}

fn seed_users(db: &Database) {
    let users = [
        user(1, "Alice", 30),
        user(2, "Bob", 25),
        user(3, "Charlie", 35),
        user(4, "David", 40),
        user(5, "Alice", 45),
    ];
    db.bulk_insert("Users", &users).unwrap();
}

fn ids(users: &[User]) -> Vec<u32> {
    let mut ids: Vec<u32> = users.iter().map(|u| u.id).collect();
    ids.sort();
    ids
}

fn open_db(dir: &tempfile::TempDir) -> Database {
    Database::open(Config::new(dir.path())).unwrap()
}

#[test]
fn equality_filter_returns_both_alices() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    seed_users(&db);

    let found: Vec<User> = db
        .query("Users")
        .where_field("name", Operator::equal("Alice"))
        .execute()
        .unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(ids(&found), [1, 5]);
}

#[test]
fn between_is_inclusive_on_both_ends() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    seed_users(&db);

    let found: Vec<User> = db
        .query("Users")
        .where_field("age", Operator::between(30, 40))
        .execute()
        .unwrap();
    assert_eq!(ids(&found), [1, 3, 4]);
}

#[test]
fn starts_with_matches_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    seed_users(&db);

    let found: Vec<User> = db
        .query("Users")
        .where_field("name", Operator::starts_with("A"))
        .execute()
        .unwrap();
    assert_eq!(ids(&found), [1, 5]);
}

#[test]
fn contains_matches_substring() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    seed_users(&db);

    let found: Vec<User> = db
        .query("Users")
        .where_field("name", Operator::contains("v"))
        .execute()
        .unwrap();
    assert_eq!(ids(&found), [4]);
}

#[test]
fn conjunction_applies_every_predicate() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    seed_users(&db);

    let found: Vec<User> = db
        .query("Users")
        .where_field("name", Operator::equal("Alice"))
        .where_field("age", Operator::greater_than(30))
        .execute()
        .unwrap();
    assert_eq!(ids(&found), [5]);
}

#[test]
fn every_strategy_returns_the_same_records() {
    // Full scan.
    let plain_dir = tempfile::tempdir().unwrap();
    let plain = open_db(&plain_dir);
    seed_users(&plain);

    // Index probe.
    let indexed_dir = tempfile::tempdir().unwrap();
    let indexed = open_db(&indexed_dir);
    indexed.create_index("Users", "age").unwrap();
    seed_users(&indexed);

    // Partition-pruned shard scan.
    let partitioned_dir = tempfile::tempdir().unwrap();
    let partitioned = open_db(&partitioned_dir);
    partitioned.set_partition_key("Users", "age").unwrap();
    seed_users(&partitioned);

    for op in [
        Operator::equal(30),
        Operator::between(30, 40),
        Operator::greater_than(30),
        Operator::less_or_equal(35),
        Operator::in_list([25, 45]),
    ] {
        let full = plain.query::<User>("Users").where_field("age", op.clone());
        let probe = indexed.query::<User>("Users").where_field("age", op.clone());
        let pruned = partitioned
            .query::<User>("Users")
            .where_field("age", op.clone());

        assert!(matches!(full.plan(), QueryPlan::FullScan));
        assert!(matches!(probe.plan(), QueryPlan::IndexScan { .. }));
        assert!(matches!(pruned.plan(), QueryPlan::ShardScan { .. }));

        let expected = ids(&full.execute().unwrap());
        assert_eq!(ids(&probe.execute().unwrap()), expected, "op {:?}", op);
        assert_eq!(ids(&pruned.execute().unwrap()), expected, "op {:?}", op);
    }
}

#[test]
fn index_execution_orders_by_key_then_arrival() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    db.create_index("Users", "age").unwrap();
    seed_users(&db);

    let found: Vec<User> = db
        .query("Users")
        .where_field("age", Operator::between(25, 45))
        .execute()
        .unwrap();
    // Ascending age, no residual reordering.
    assert_eq!(
        found.iter().map(|u| u.age).collect::<Vec<_>>(),
        [25, 30, 35, 40, 45]
    );
}

#[test]
fn numeric_comparisons_ignore_digit_width() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    db.create_index("Users", "age").unwrap();
    db.bulk_insert(
        "Users",
        &[user(1, "Young", 9), user(2, "Old", 100), user(3, "Mid", 50)],
    )
    .unwrap();

    let found: Vec<User> = db
        .query("Users")
        .where_field("age", Operator::greater_than(10))
        .execute()
        .unwrap();
    assert_eq!(ids(&found), [2, 3]);
}

#[test]
fn unknown_collection_queries_are_empty() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    let found: Vec<User> = db
        .query("Nowhere")
        .where_field("name", Operator::equal("Alice"))
        .execute()
        .unwrap();
    assert!(found.is_empty());
    assert_eq!(db.count_documents("Nowhere").unwrap(), 0);
}

#[test]
fn query_count_matches_execute() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir);
    seed_users(&db);
    let query = db
        .query::<User>("Users")
        .where_field("age", Operator::greater_or_equal(35));
    assert_eq!(query.count().unwrap(), query.execute().unwrap().len());
}
