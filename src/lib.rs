//! NyaruDB2: an embedded document database for local, single-process
//! applications.
//!
//! Documents are serde records addressed by collection name, partitioned
//! across on-disk shards keyed by a field of the document, optionally
//! indexed by secondary B-tree indexes, and queryable through a composable
//! predicate DSL that streams matches lazily.
//!
//! ```no_run
//! use nyarudb2::{Config, Database, Operator};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct User {
//!     id: u32,
//!     name: String,
//!     age: u32,
//! }
//!
//! fn main() -> nyarudb2::Result<()> {
//!     let db = Database::open(Config::new("./data"))?;
//!     db.set_partition_key("Users", "name")?;
//!     db.create_index("Users", "age")?;
//!
//!     db.insert("Users", &User { id: 1, name: "Alice".into(), age: 30 })?;
//!
//!     let thirties: Vec<User> = db
//!         .query("Users")
//!         .where_field("age", Operator::between(30, 39))
//!         .execute()?;
//!     println!("{} users in their thirties", thirties.len());
//!     Ok(())
//! }
//! ```

pub mod compression;
pub mod core;
pub mod index;
pub mod query;
pub mod serialization;
pub mod storage;

pub use crate::compression::codec::Codec;
pub use crate::core::config::Config;
pub use crate::core::database::Database;
pub use crate::core::error::{Error, Result};
pub use crate::core::stats::{CollectionStats, IndexFieldStats};
pub use crate::core::types::CancellationToken;
pub use crate::index::btree::BTreeIndex;
pub use crate::query::builder::Query;
pub use crate::query::executor::DocumentStream;
pub use crate::query::planner::QueryPlan;
pub use crate::query::predicate::{Operator, Predicate};
pub use crate::serialization::{Record, WireFormat};
pub use crate::storage::metadata::{FieldBounds, ShardInfo};
