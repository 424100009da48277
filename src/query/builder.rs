use std::marker::PhantomData;

use crate::core::database::Database;
use crate::core::error::Result;
use crate::query::executor::DocumentStream;
use crate::query::planner::QueryPlan;
use crate::query::predicate::{Operator, Predicate};
use crate::serialization::Record;

/// Composable query over one collection. Each `where_field` call adds a
/// conjunct; execution picks an index probe, a targeted shard scan or a
/// full scan based on the collection's stats.
///
/// ```no_run
/// # use nyarudb2::{Database, Operator};
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Serialize, Deserialize)]
/// # struct User { id: u32, name: String, age: u32 }
/// # fn demo(db: &Database) -> nyarudb2::Result<()> {
/// let adults: Vec<User> = db
///     .query("Users")
///     .where_field("age", Operator::greater_or_equal(18))
///     .where_field("name", Operator::starts_with("A"))
///     .execute()?;
/// # Ok(())
/// # }
/// ```
pub struct Query<'a, T: Record> {
    db: &'a Database,
    collection: String,
    predicates: Vec<Predicate>,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Record> Query<'a, T> {
    pub(crate) fn new(db: &'a Database, collection: &str) -> Self {
        Query {
            db,
            collection: collection.to_string(),
            predicates: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Add a predicate; all predicates must hold (logical AND).
    pub fn where_field(mut self, field: &str, op: Operator) -> Self {
        self.predicates.push(Predicate::new(field, op));
        self
    }

    /// The strategy the planner would pick right now.
    pub fn plan(&self) -> QueryPlan {
        self.db.plan_with(&self.collection, &self.predicates)
    }

    /// Lazy stream of matching documents.
    pub fn stream(&self) -> Result<DocumentStream<T>> {
        self.db
            .stream_with(&self.collection, self.predicates.clone())
    }

    /// All matching documents, eagerly collected.
    pub fn execute(&self) -> Result<Vec<T>> {
        self.stream()?.collect()
    }

    /// Number of matching documents.
    pub fn count(&self) -> Result<usize> {
        let mut count = 0;
        for record in self.stream()? {
            record?;
            count += 1;
        }
        Ok(count)
    }
}
