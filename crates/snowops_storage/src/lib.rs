#![forbid(unsafe_code)]

pub mod context;
pub mod error;
pub mod memory;
pub mod repo;
pub mod sqlite;

pub use context::CallContext;
pub use error::StorageError;
pub use memory::ContractStore;
pub use sqlite::SqliteContractStore;
