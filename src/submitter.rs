use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_instruction,
    transaction::Transaction,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::amount::TokenAmount;
use crate::batcher::Batch;
use crate::error::LedgerError;
use crate::ledger::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base_delay * retry`.
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Result of submitting one batch. Failures are data, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Success {
        batch_index: usize,
        signature: Signature,
        addresses: Vec<Pubkey>,
    },
    Failure {
        batch_index: usize,
        addresses: Vec<Pubkey>,
        error: String,
        retry_count: u32,
    },
}

impl TransferOutcome {
    pub fn addresses(&self) -> &[Pubkey] {
        match self {
            Self::Success { addresses, .. } | Self::Failure { addresses, .. } => addresses,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

pub struct TransferSubmitter<L> {
    ledger: Arc<L>,
    sender: Arc<Keypair>,
    retry: RetryPolicy,
}

impl<L: Ledger> TransferSubmitter<L> {
    pub fn new(ledger: Arc<L>, sender: Arc<Keypair>, retry: RetryPolicy) -> Self {
        Self {
            ledger,
            sender,
            retry,
        }
    }

    pub fn sender_pubkey(&self) -> Pubkey {
        self.sender.pubkey()
    }

    /// Send `amount` to every recipient of `batch` in a single transaction.
    ///
    /// Not idempotent: if an attempt lands on the ledger but its confirmation
    /// is lost, the retry sends the whole batch again.
    pub async fn submit(&self, batch: &Batch, amount: TokenAmount) -> TransferOutcome {
        let lamports = amount.lamports();
        let mut retries = 0;

        loop {
            match self.attempt(&batch.recipients, lamports).await {
                Ok(signature) => {
                    info!(
                        batch = batch.index,
                        recipients = batch.recipients.len(),
                        %signature,
                        "batch confirmed"
                    );
                    return TransferOutcome::Success {
                        batch_index: batch.index,
                        signature,
                        addresses: batch.recipients.clone(),
                    };
                }
                Err(e) if retries >= self.retry.max_retries => {
                    warn!(batch = batch.index, retries, "batch failed, giving up: {}", e);
                    return TransferOutcome::Failure {
                        batch_index: batch.index,
                        addresses: batch.recipients.clone(),
                        error: e.to_string(),
                        retry_count: retries,
                    };
                }
                Err(e) => {
                    retries += 1;
                    let delay = self.retry.delay(retries);
                    warn!(
                        batch = batch.index,
                        retry = retries,
                        max_retries = self.retry.max_retries,
                        "batch attempt failed, retrying in {}ms: {}",
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, recipients: &[Pubkey], lamports: u64) -> Result<Signature, LedgerError> {
        // a fresh blockhash makes every attempt a distinct transaction
        let recent_blockhash = self.ledger.latest_blockhash().await?;
        let transaction =
            create_batch_transaction(&self.sender, recipients, lamports, recent_blockhash);
        debug!(signature = %transaction.signatures[0], "sending transaction");
        self.ledger.send_and_confirm(&transaction).await
    }
}

/// One transfer instruction per recipient, all paid and signed by `sender`.
pub fn create_batch_transaction(
    sender: &Keypair,
    recipients: &[Pubkey],
    lamports: u64,
    recent_blockhash: Hash,
) -> Transaction {
    let instructions: Vec<_> = recipients
        .iter()
        .map(|to| system_instruction::transfer(&sender.pubkey(), to, lamports))
        .collect();

    Transaction::new_signed_with_payer(
        &instructions,
        Some(&sender.pubkey()),
        &[sender],
        recent_blockhash,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{Fault, MockLedger, FEE_PER_SIGNATURE};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const SOL: u64 = 1_000_000_000;

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    fn amount(s: &str) -> TokenAmount {
        TokenAmount::new(Decimal::from_str(s).unwrap()).unwrap()
    }

    fn batch(n: usize) -> Batch {
        Batch {
            index: 0,
            recipients: (0..n).map(|_| Pubkey::new_unique()).collect(),
        }
    }

    fn setup(max_retries: u32) -> (Arc<MockLedger>, TransferSubmitter<MockLedger>) {
        let sender = Arc::new(Keypair::new());
        let ledger = Arc::new(MockLedger::with_balance(sender.pubkey(), SOL));
        let submitter = TransferSubmitter::new(ledger.clone(), sender, fast_retry(max_retries));
        (ledger, submitter)
    }

    #[test]
    fn test_backoff_grows_with_attempt_number() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(1500));
    }

    #[test]
    fn test_batch_transaction_has_one_transfer_per_recipient() {
        let sender = Keypair::new();
        let recipients: Vec<Pubkey> = (0..5).map(|_| Pubkey::new_unique()).collect();
        let tx = create_batch_transaction(&sender, &recipients, 42, Hash::new_unique());

        assert_eq!(tx.message.instructions.len(), 5);
        assert_eq!(tx.signatures.len(), 1);
        assert_eq!(tx.message.account_keys[0], sender.pubkey());
        assert!(tx.verify().is_ok());
    }

    #[tokio::test]
    async fn test_successful_batch() {
        let (ledger, submitter) = setup(3);
        let batch = batch(4);

        let outcome = submitter.submit(&batch, amount("0.001")).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.addresses(), batch.recipients.as_slice());
        assert_eq!(ledger.attempts(), 1);
        for r in &batch.recipients {
            assert_eq!(ledger.balance_of(r), 1_000_000);
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let (ledger, submitter) = setup(3);
        let batch = batch(2);
        ledger.script(
            batch.recipients[0],
            [
                Fault::Reject("node is behind".into()),
                Fault::Reject("blockhash not found".into()),
            ],
        );

        let outcome = submitter.submit(&batch, amount("0.01")).await;

        assert!(outcome.is_success());
        assert_eq!(ledger.attempts(), 3);
        assert_eq!(ledger.posted().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_failure_outcome() {
        let (ledger, submitter) = setup(3);
        let batch = batch(3);
        ledger.reject_always(batch.recipients[0], "account in use");

        let outcome = submitter.submit(&batch, amount("0.001")).await;

        match outcome {
            TransferOutcome::Failure {
                addresses,
                error,
                retry_count,
                ..
            } => {
                assert_eq!(retry_count, 3);
                assert_eq!(addresses, batch.recipients);
                assert!(error.contains("account in use"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(ledger.attempts(), 4);
        assert!(ledger.posted().is_empty());
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let (ledger, submitter) = setup(0);
        let batch = batch(1);
        ledger.reject_always(batch.recipients[0], "boom");

        let outcome = submitter.submit(&batch, amount("0.001")).await;

        assert!(matches!(outcome, TransferOutcome::Failure { retry_count: 0, .. }));
        assert_eq!(ledger.attempts(), 1);
    }

    // Known boundary: a retry after a lost confirmation double-sends the batch.
    #[tokio::test]
    async fn test_lost_confirmation_duplicates_transfers() {
        let (ledger, submitter) = setup(3);
        let batch = batch(3);
        ledger.script(batch.recipients[0], [Fault::LostConfirmation]);

        let outcome = submitter.submit(&batch, amount("0.01")).await;

        assert!(outcome.is_success());
        let posted = ledger.posted();
        assert_eq!(posted.len(), 2);
        assert_ne!(posted[0].signature, posted[1].signature);
        for r in &batch.recipients {
            assert_eq!(ledger.balance_of(r), 2 * 10_000_000);
        }
        assert_eq!(
            ledger.balance_of(&submitter.sender_pubkey()),
            SOL - 2 * (3 * 10_000_000 + FEE_PER_SIGNATURE)
        );
    }
}
