//! Transactional money-movement core: deposits, withdrawals, transfers and
//! merchant payment sessions, each guarded by a per-user rate limiter and a
//! fraud gate and committed atomically to the ledger.

pub mod adapters;
pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod policy;
pub mod ports;
pub mod scorer;
pub mod services;
pub mod validation;

pub use error::{BankError, BankResult};
pub use services::BankingService;
