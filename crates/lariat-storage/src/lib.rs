//! Storage realisations for the Lariat URL shortener.
//!
//! Three interchangeable implementations of the
//! [`Storage`](lariat_core::Storage) contract: an in-memory map for tests
//! and development, an append-only file store that rehydrates the map at
//! startup, and a PostgreSQL store for production.

pub mod file;
pub mod memory;
pub mod postgres;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
