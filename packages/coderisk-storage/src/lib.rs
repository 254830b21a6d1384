//! Persistent storage: a Staging Store (§4.1, raw GitHub records) and a
//! Graph Store (§4.8, the queryable property-graph projection). SQLite
//! backs both behind the `sql` feature — the same statements run
//! unmodified against PostgreSQL in production (§5).

pub mod error;
pub mod graph;
pub mod staging;

pub use error::{ErrorKind, Result, StorageError};
pub use graph::{CoChangeEntry, GraphStore, OwnershipChurn};
pub use staging::{
    BranchRecord, ContributorRecord, DataClass, DataCounts, FileChangeKind, FileDiffRecord, LanguagesRecord, NaturalKey, StagingStore,
};

#[cfg(feature = "sql")]
pub use graph::sql::SqlGraphStore;
#[cfg(feature = "sql")]
pub use staging::sql::SqlStagingStore;
