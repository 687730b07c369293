//! Core types for the Lumera credits and generation-job platform.
//!
//! This crate provides the foundational types shared by the store, the
//! reconciler, and the HTTP service:
//!
//! - **Identifiers**: `AccountId`, `TransactionId`, `JobId`
//! - **Ledger**: `CreditTransaction`, `TransactionKind`, `Account`
//! - **Jobs**: `Job`, `JobState`, `ProviderKind`
//!
//! # Credits
//!
//! A credit is the platform's internal unit of spendable balance for
//! generation and training requests. Balances and amounts are stored as
//! `i64` integers; there are no fractional credits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod ids;
pub mod job;
pub mod ledger;

pub use account::Account;
pub use ids::{AccountId, IdError, JobId, TransactionId};
pub use job::{Job, JobState, ProviderKind};
pub use ledger::{CreditTransaction, TransactionKind};
