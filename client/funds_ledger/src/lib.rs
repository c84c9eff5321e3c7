//! Funds ledger client.
//!
//! Lets a connected wallet deposit tokens against a post, list its deposits,
//! and later sell them based on reported engagement, all through an escrow
//! contract reached over JSON-RPC.
//!
//! | Concern               | Module                                   |
//! |-----------------------|------------------------------------------|
//! | Amount normalization  | [`units`]                                |
//! | Wallet/provider seam  | [`chain`], [`rpc`]                       |
//! | Bound signer, handles | [`session`], [`contracts`]               |
//! | Approve → deposit     | [`orchestrator`], [`lifecycle`]          |
//! | Portfolio             | [`portfolio`]                            |
//! | HTTP shell            | [`api`], [`config`]                      |

pub mod api;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod errors;
pub mod lifecycle;
pub mod orchestrator;
pub mod portfolio;
pub mod rpc;
pub mod session;
pub mod units;

#[cfg(test)]
mod mock;

pub use errors::{LedgerError, Result};
