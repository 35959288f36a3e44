#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

extern crate alloc;

mod bucket;
mod config;
mod error;
mod segment;

/// The concurrent table and its introspection helpers.
pub mod hash_table;

pub mod hashing;

pub use config::MAX_HOP_RANGE;
pub use config::TableConfig;
pub use error::ConstructionError;
pub use error::TableError;
#[cfg(any(test, feature = "stats"))]
pub use hash_table::DebugStats;
pub use hash_table::HopscotchTable;
pub use hashing::BuildKeyHasher;
pub use hashing::DefaultHashBuilder;
pub use hashing::KeyEq;
pub use hashing::KeyEquivalent;
pub use hashing::KeyHasher;
