use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};
use tracing::{info, warn};

use crate::error::LedgerError;

/// The network operations a distribution run needs.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn balance(&self, owner: &Pubkey) -> Result<u64, LedgerError>;

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    /// Submit and wait until the transaction reaches the ledger's configured commitment.
    async fn send_and_confirm(&self, transaction: &Transaction) -> Result<Signature, LedgerError>;
}

/// Ledger backed by a single Solana JSON-RPC endpoint at `confirmed` commitment.
pub struct RpcLedger {
    client: RpcClient,
}

impl RpcLedger {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            client: RpcClient::new_with_commitment(
                rpc_url.to_string(),
                CommitmentConfig::confirmed(),
            ),
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    /// Log the node version. A failure here is only a warning, the run decides.
    pub async fn probe(&self) {
        match self.client.get_version().await {
            Ok(version) => info!(
                url = %self.url(),
                version = %version.solana_core,
                "RPC endpoint reachable"
            ),
            Err(e) => warn!(url = %self.url(), "RPC endpoint probe failed: {}", e),
        }
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn balance(&self, owner: &Pubkey) -> Result<u64, LedgerError> {
        Ok(self.client.get_balance(owner).await?)
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        Ok(self.client.get_latest_blockhash().await?)
    }

    async fn send_and_confirm(&self, transaction: &Transaction) -> Result<Signature, LedgerError> {
        Ok(self.client.send_and_confirm_transaction(transaction).await?)
    }
}
