use thiserror::Error;

use crate::distributor::Stage;
use crate::validator::InvalidAddress;

/// Errors returned by a [`crate::ledger::Ledger`] implementation
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("RPC client error: {0}")]
    RpcClient(#[from] solana_client::client_error::ClientError),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("confirmation timed out: {0}")]
    ConfirmationTimeout(String),
}

/// Run-aborting failures. Anything listed here stops the run before funds move.
#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("recipient list is empty")]
    NoRecipients,

    #[error("failed to query sender balance: {0}")]
    Balance(#[source] LedgerError),

    #[error(
        "insufficient balance: need {required} lamports ({transfers} for transfers + {fee_buffer} fee buffer), have {available}"
    )]
    InsufficientBalance {
        required: u64,
        transfers: u64,
        fee_buffer: u64,
        available: u64,
    },

    #[error("transfer total overflows: {recipients} recipients x {lamports} lamports")]
    AmountOverflow { recipients: usize, lamports: u64 },

    #[error("{} invalid recipient address(es):\n{}", .0.len(), format_invalid(.0))]
    InvalidAddresses(Vec<InvalidAddress>),
}

impl DistributionError {
    /// The stage the run was trying to enter when it aborted
    pub fn failed_stage(&self) -> Stage {
        match self {
            Self::NoRecipients
            | Self::Balance(_)
            | Self::InsufficientBalance { .. }
            | Self::AmountOverflow { .. } => Stage::BalanceChecked,
            Self::InvalidAddresses(_) => Stage::Validated,
        }
    }
}

fn format_invalid(invalid: &[InvalidAddress]) -> String {
    invalid
        .iter()
        .map(|entry| format!("  row {}: {:?}", entry.row, entry.address))
        .collect::<Vec<_>>()
        .join("\n")
}
