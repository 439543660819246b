//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Classified proxy request:
//!     → allowlist.rs (normalize peer address, check allowlist)
//!     → brute_force.rs (reject locked-out addresses)
//!     → credentials.rs (verify Proxy-Authorization)
//!     → access_control.rs (order the gates, update the ledger)
//!     → Pass to relay
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any gate failure
//! - Every credential failure looks the same to the client
//! - The ledger is injected, never global

pub mod access_control;
pub mod allowlist;
pub mod brute_force;
pub mod credentials;

pub use access_control::{AccessControl, Denial};
pub use brute_force::BruteForceLedger;
