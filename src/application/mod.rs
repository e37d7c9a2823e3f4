//! Application layer containing the core business logic orchestration.
//!
//! This module defines the `Wallet`, the single entry point for account and
//! payment operations, and the sync pass that drives pending payments and
//! compliance negotiations forward.

pub mod ledger_account;
pub mod wallet;
