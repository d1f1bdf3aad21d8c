//! Budget server access.
//!
//! - [`api`]: the `BudgetApi` trait, one method per remote operation
//! - [`http_api`]: REST implementation over reqwest
//! - [`memory`]: in-process implementation used by tests and demos
//! - [`client`]: the shared lifecycle coordinator in front of either

pub mod api;
pub mod client;
pub mod http_api;
pub mod memory;
pub mod types;

pub use api::BudgetApi;
pub use client::{BackendClient, ConnectionStatus};
pub use http_api::HttpBudgetApi;
pub use memory::InMemoryBudgetApi;
pub use types::*;
