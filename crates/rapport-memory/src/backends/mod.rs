//! Storage adapter implementations.

pub mod memory;
pub mod sqlite;
pub mod wide_column;

pub use memory::InMemoryAdapter;
pub use sqlite::{SqliteAdapter, SqliteConfig};
pub use wide_column::{InMemoryWideColumn, VersionedRow, WideColumnAdapter, WideColumnSession};
