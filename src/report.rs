use rust_decimal::Decimal;
use serde::Serialize;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::fmt;
use std::time::Duration;

use crate::amount::lamports_to_sol;
use crate::submitter::TransferOutcome;

/// Builds block explorer links: `<base>/tx/<signature>?cluster=<cluster>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerLinks {
    base: String,
    cluster: String,
}

impl ExplorerLinks {
    pub fn new(base: &str, cluster: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            cluster: cluster.to_string(),
        }
    }

    pub fn tx_url(&self, signature: &Signature) -> String {
        format!("{}/tx/{}?cluster={}", self.base, signature, self.cluster)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessfulBatch {
    pub batch_index: usize,
    pub signature: String,
    pub explorer_url: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRecipient {
    pub batch_index: usize,
    pub address: String,
    pub error: String,
    pub retry_count: u32,
}

/// Summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct DistributionResult {
    pub successful_count: usize,
    pub failed_count: usize,
    pub total_transactions: usize,
    pub successful: Vec<SuccessfulBatch>,
    pub failed: Vec<FailedRecipient>,
    pub elapsed_secs: f64,
    pub initial_balance: Decimal,
    /// `None` when the post-run balance query failed
    pub final_balance: Option<Decimal>,
    #[serde(skip)]
    initial_lamports: u64,
    #[serde(skip)]
    final_lamports: Option<u64>,
}

impl DistributionResult {
    pub fn new(initial_lamports: u64) -> Self {
        Self {
            successful_count: 0,
            failed_count: 0,
            total_transactions: 0,
            successful: Vec::new(),
            failed: Vec::new(),
            elapsed_secs: 0.0,
            initial_balance: lamports_to_sol(initial_lamports),
            final_balance: None,
            initial_lamports,
            final_lamports: None,
        }
    }

    /// Fold one batch outcome in. Only called after a concurrency group has joined.
    pub fn record(&mut self, outcome: TransferOutcome, links: &ExplorerLinks) {
        match outcome {
            TransferOutcome::Success {
                batch_index,
                signature,
                addresses,
            } => {
                self.successful_count += addresses.len();
                self.total_transactions += 1;
                self.successful.push(SuccessfulBatch {
                    batch_index,
                    signature: signature.to_string(),
                    explorer_url: links.tx_url(&signature),
                    recipients: addresses.iter().map(Pubkey::to_string).collect(),
                });
            }
            TransferOutcome::Failure {
                batch_index,
                addresses,
                error,
                retry_count,
            } => {
                self.failed_count += addresses.len();
                self.failed.extend(addresses.iter().map(|address| FailedRecipient {
                    batch_index,
                    address: address.to_string(),
                    error: error.clone(),
                    retry_count,
                }));
            }
        }
    }

    pub fn finish(&mut self, final_lamports: Option<u64>, elapsed: Duration) {
        self.final_lamports = final_lamports;
        self.final_balance = final_lamports.map(lamports_to_sol);
        self.elapsed_secs = elapsed.as_secs_f64();
    }

    pub fn initial_lamports(&self) -> u64 {
        self.initial_lamports
    }

    pub fn final_lamports(&self) -> Option<u64> {
        self.final_lamports
    }
}

impl fmt::Display for DistributionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Distribution complete!")?;
        writeln!(f, "Successful transfers: {}", self.successful_count)?;
        writeln!(f, "Failed transfers: {}", self.failed_count)?;
        writeln!(f, "Transactions: {}", self.total_transactions)?;
        writeln!(f, "Elapsed time: {:.2}s", self.elapsed_secs)?;
        writeln!(f, "Initial balance: {} SOL", self.initial_balance)?;
        match self.final_balance {
            Some(balance) => writeln!(f, "Final balance: {} SOL", balance)?,
            None => writeln!(f, "Final balance: unknown")?,
        }

        if !self.successful.is_empty() {
            writeln!(f, "\nSuccessful batches:")?;
            for batch in &self.successful {
                writeln!(
                    f,
                    "  #{} ({} recipients): {}",
                    batch.batch_index,
                    batch.recipients.len(),
                    batch.explorer_url
                )?;
            }
        }

        if !self.failed.is_empty() {
            writeln!(f, "\nFailed recipients:")?;
            for failed in &self.failed {
                writeln!(
                    f,
                    "  {} (batch #{}, {} retries): {}",
                    failed.address, failed.batch_index, failed.retry_count, failed.error
                )?;
            }
        }
        Ok(())
    }
}
