//! Land Registry Contracts
//!
//! Escrow, offer, property and user contracts on top of [`ledger_core`].
//!
//! # Architecture
//!
//! - **Guards**: every status is a closed enum; each operation declares the
//!   statuses it may start from
//! - **Timestamps**: taken from the transaction envelope, never a local clock
//! - **Records**: typed JSON documents tagged with `docType`, read and written
//!   through the transaction handle passed to every operation
//! - **Dispatch**: named string invocations parsed into typed commands;
//!   queries are evaluated read-only, everything else is committed
//!
//! # Namespaces
//!
//! Each contract owns one ledger namespace and keys its records by bare id.
//! Transfer records live next to properties under `TXN_<id>` so a transfer
//! commits as a single write set.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

#[macro_use]
pub mod guard;

pub mod dispatch;
pub mod error;
pub mod escrow;
pub mod offer;
pub mod property;
pub mod record;
pub mod timestamp;
pub mod user;

// Re-exports
pub use dispatch::{Command, Contract, Dispatcher, Envelope, Invocation, Outcome, Response};
pub use error::{Error, Result};
pub use guard::{ClosedEnum, Lifecycle};
pub use record::{HistoryEntry, Record};
