//! Batched native-token airdrop for Solana-compatible ledgers.
//!
//! Recipients are read from a CSV file, validated up front, grouped into
//! transactions of `batch_size` transfers and submitted `concurrent_batches`
//! at a time. See [`distributor::Distributor::run`] for the full pipeline.

pub mod amount;
pub mod batcher;
pub mod config;
pub mod distributor;
pub mod error;
pub mod ledger;
pub mod recipients;
pub mod report;
pub mod submitter;
pub mod validator;
pub mod wallet;
