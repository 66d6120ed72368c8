//! Storage adapters implementing the ledger ports.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
