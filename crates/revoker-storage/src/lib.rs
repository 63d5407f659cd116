//! The Storage Gateway: the single typed interface every other component
//! uses to read and mutate certificate status and the key block-list.

mod gateway;
mod insert;
mod mysql;

#[cfg(feature = "test-util")]
mod fake;

pub use gateway::StorageGateway;
pub use insert::{insert_many, SqlValue};
pub use mysql::MySqlStorageGateway;

#[cfg(feature = "test-util")]
pub use fake::FakeStorageGateway;
