use futures::future::join_all;
use solana_sdk::{pubkey::Pubkey, signature::Keypair};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::amount::{lamports_to_sol, TokenAmount};
use crate::batcher::into_batches;
use crate::error::DistributionError;
use crate::ledger::Ledger;
use crate::recipients::Recipient;
use crate::report::{DistributionResult, ExplorerLinks};
use crate::submitter::{RetryPolicy, TransferSubmitter};
use crate::validator::validate_all;

/// Progress of a run. Stages only ever advance one step at a time, except
/// that any stage before `Summarized` may drop into `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    BalanceChecked,
    Validated,
    Batched,
    Submitting,
    Summarized,
    Aborted,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Init => Some(Stage::BalanceChecked),
            Stage::BalanceChecked => Some(Stage::Validated),
            Stage::Validated => Some(Stage::Batched),
            Stage::Batched => Some(Stage::Submitting),
            Stage::Submitting => Some(Stage::Summarized),
            Stage::Summarized | Stage::Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Summarized | Stage::Aborted)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct DistributionSettings {
    pub batch_size: NonZeroUsize,
    pub concurrent_batches: NonZeroUsize,
    pub retry: RetryPolicy,
    /// pause between concurrency groups
    pub group_cooldown: Duration,
    /// lamports held back for transaction fees during the balance check
    pub fee_buffer: u64,
    pub explorer: ExplorerLinks,
}

pub struct Distributor<L> {
    ledger: Arc<L>,
    submitter: TransferSubmitter<L>,
    settings: DistributionSettings,
    stage: Mutex<Stage>,
}

impl<L: Ledger> Distributor<L> {
    pub fn new(ledger: Arc<L>, sender: Keypair, settings: DistributionSettings) -> Self {
        let submitter = TransferSubmitter::new(ledger.clone(), Arc::new(sender), settings.retry);
        Self {
            ledger,
            submitter,
            settings,
            stage: Mutex::new(Stage::Init),
        }
    }

    /// Stage reached by the most recent run.
    pub fn stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sender_pubkey(&self) -> Pubkey {
        self.submitter.sender_pubkey()
    }

    /// Send `amount` to every recipient.
    ///
    /// Returns an error only when the run aborts before any transfer is sent.
    /// Batches that fail after all retries are reported in the result instead.
    /// An aborted run leaves the distributor in [`Stage::Aborted`].
    pub async fn run(
        &self,
        recipients: &[Recipient],
        amount: TokenAmount,
    ) -> Result<DistributionResult, DistributionError> {
        self.set_stage(Stage::Init);
        let outcome = self.execute(recipients, amount).await;
        if let Err(e) = &outcome {
            self.abort(e);
        }
        outcome
    }

    async fn execute(
        &self,
        recipients: &[Recipient],
        amount: TokenAmount,
    ) -> Result<DistributionResult, DistributionError> {
        let start_time = Instant::now();

        if recipients.is_empty() {
            return Err(DistributionError::NoRecipients);
        }

        // Init -> BalanceChecked
        let sender = self.sender_pubkey();
        let initial_balance = self
            .ledger
            .balance(&sender)
            .await
            .map_err(DistributionError::Balance)?;
        let transfers = amount
            .lamports()
            .checked_mul(recipients.len() as u64)
            .ok_or(DistributionError::AmountOverflow {
                recipients: recipients.len(),
                lamports: amount.lamports(),
            })?;
        let required = transfers.saturating_add(self.settings.fee_buffer);
        if initial_balance < required {
            return Err(DistributionError::InsufficientBalance {
                required,
                transfers,
                fee_buffer: self.settings.fee_buffer,
                available: initial_balance,
            });
        }
        info!(
            %sender,
            balance = %lamports_to_sol(initial_balance),
            required = %lamports_to_sol(required),
            "balance check passed"
        );
        self.advance(Stage::BalanceChecked);

        // BalanceChecked -> Validated
        let pubkeys = validate_all(recipients).map_err(DistributionError::InvalidAddresses)?;
        self.advance(Stage::Validated);

        // Validated -> Batched
        let batches = into_batches(&pubkeys, self.settings.batch_size);
        info!(
            recipients = pubkeys.len(),
            batches = batches.len(),
            batch_size = self.settings.batch_size.get(),
            "recipients batched"
        );
        self.advance(Stage::Batched);

        // Batched -> Submitting
        self.advance(Stage::Submitting);
        let mut result = DistributionResult::new(initial_balance);
        let group_size = self.settings.concurrent_batches.get();
        let group_count = batches.len().div_ceil(group_size);

        for (group_index, group) in batches.chunks(group_size).enumerate() {
            if group_index > 0 && !self.settings.group_cooldown.is_zero() {
                debug!(
                    "cooling down for {}ms",
                    self.settings.group_cooldown.as_millis()
                );
                tokio::time::sleep(self.settings.group_cooldown).await;
            }

            info!(
                "Sending group {} of {} ({} batches)",
                group_index + 1,
                group_count,
                group.len()
            );
            let outcomes =
                join_all(group.iter().map(|batch| self.submitter.submit(batch, amount))).await;

            // single-threaded aggregation once every batch in the group resolved
            for outcome in outcomes {
                result.record(outcome, &self.settings.explorer);
            }
            info!(
                successful = result.successful_count,
                failed = result.failed_count,
                total = pubkeys.len(),
                "progress"
            );
        }

        // Submitting -> Summarized
        let final_balance = match self.ledger.balance(&sender).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!("failed to query final balance: {}", e);
                None
            }
        };
        result.finish(final_balance, start_time.elapsed());
        self.advance(Stage::Summarized);

        Ok(result)
    }

    fn set_stage(&self, stage: Stage) {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner) = stage;
    }

    fn advance(&self, to: Stage) {
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert_eq!(stage.next(), Some(to), "stages advance one step at a time");
        debug!("stage {} -> {}", *stage, to);
        *stage = to;
    }

    fn abort(&self, error: &DistributionError) {
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        let from = *stage;
        debug_assert!(!from.is_terminal(), "run already finished");
        warn!(
            from = %from,
            failed = %error.failed_stage(),
            "distribution aborted: {}",
            error
        );
        *stage = Stage::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{Fault, Flight, MockLedger, FEE_PER_SIGNATURE};
    use crate::validator::InvalidAddress;
    use rust_decimal::Decimal;
    use solana_sdk::signature::Signer;
    use std::collections::HashSet;
    use std::str::FromStr;

    const SOL: u64 = 1_000_000_000;

    fn settings(
        batch_size: usize,
        concurrent_batches: usize,
        max_retries: u32,
    ) -> DistributionSettings {
        DistributionSettings {
            batch_size: NonZeroUsize::new(batch_size).unwrap(),
            concurrent_batches: NonZeroUsize::new(concurrent_batches).unwrap(),
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
            },
            group_cooldown: Duration::from_millis(1),
            fee_buffer: 10_000_000,
            explorer: ExplorerLinks::new("https://explorer.solana.com", "devnet"),
        }
    }

    fn amount(s: &str) -> TokenAmount {
        TokenAmount::new(Decimal::from_str(s).unwrap()).unwrap()
    }

    fn recipients(n: usize) -> Vec<Recipient> {
        Recipient::numbered((0..n).map(|_| Pubkey::new_unique().to_string()))
    }

    fn pubkey(recipient: &Recipient) -> Pubkey {
        Pubkey::from_str(&recipient.address).unwrap()
    }

    fn setup(
        balance: u64,
        settings: DistributionSettings,
    ) -> (Arc<MockLedger>, Distributor<MockLedger>) {
        let sender = Keypair::new();
        let ledger = Arc::new(MockLedger::with_balance(sender.pubkey(), balance));
        let distributor = Distributor::new(ledger.clone(), sender, settings);
        (ledger, distributor)
    }

    #[test]
    fn test_stages_are_linear() {
        let mut stage = Stage::Init;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                Stage::Init,
                Stage::BalanceChecked,
                Stage::Validated,
                Stage::Batched,
                Stage::Submitting,
                Stage::Summarized,
            ]
        );
        assert_eq!(Stage::Aborted.next(), None);
        assert!(Stage::Aborted.is_terminal());
    }

    #[tokio::test]
    async fn test_hundred_recipients_in_ten_batches() {
        let (ledger, distributor) = setup(SOL, settings(10, 3, 3));
        let recipients = recipients(100);

        let result = distributor.run(&recipients, amount("0.001")).await.unwrap();

        assert_eq!(result.successful_count, 100);
        assert_eq!(result.failed_count, 0);
        assert_eq!(result.total_transactions, 10);
        assert_eq!(ledger.posted().len(), 10);
        assert!(result.failed.is_empty());
        assert_eq!(distributor.stage(), Stage::Summarized);

        let paid: HashSet<String> = result
            .successful
            .iter()
            .flat_map(|b| b.recipients.iter().cloned())
            .collect();
        assert_eq!(
            paid,
            recipients.iter().map(|r| r.address.clone()).collect::<HashSet<_>>()
        );
        for r in &recipients {
            assert_eq!(ledger.balance_of(&pubkey(r)), 1_000_000);
        }
    }

    #[tokio::test]
    async fn test_balance_accounting() {
        let (ledger, distributor) = setup(SOL, settings(7, 2, 2));
        let recipients = recipients(30);
        let failing = pubkey(&recipients[7]);
        ledger.reject_always(failing, "blockhash not found");

        let result = distributor.run(&recipients, amount("0.002")).await.unwrap();

        assert_eq!(result.successful_count, 23);
        assert_eq!(result.failed_count, 7);
        assert_eq!(result.total_transactions, 4);

        let spent = result.initial_lamports() - result.final_lamports().unwrap();
        let fees = result.total_transactions as u64 * FEE_PER_SIGNATURE;
        assert_eq!(spent, 2_000_000 * result.successful_count as u64 + fees);
        assert_eq!(
            result.final_lamports(),
            Some(ledger.balance_of(&distributor.sender_pubkey()))
        );
    }

    #[tokio::test]
    async fn test_invalid_address_aborts_before_submission() {
        let (ledger, distributor) = setup(SOL, settings(10, 3, 3));
        let mut recipients = recipients(5);
        recipients[0].address = "definitely-not-a-pubkey".to_string();

        let err = distributor.run(&recipients, amount("0.001")).await.unwrap_err();

        assert_eq!(err.failed_stage(), Stage::Validated);
        assert_eq!(distributor.stage(), Stage::Aborted);
        match err {
            DistributionError::InvalidAddresses(invalid) => assert_eq!(
                invalid,
                vec![InvalidAddress {
                    row: 2,
                    address: "definitely-not-a-pubkey".to_string()
                }]
            ),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ledger.attempts(), 0);
        assert!(ledger.posted().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_balance_aborts() {
        // 100 * 0.001 = 0.1 SOL, plus 0.01 buffer
        let (ledger, distributor) = setup(109_999_999, settings(10, 3, 3));

        let err = distributor
            .run(&recipients(100), amount("0.001"))
            .await
            .unwrap_err();

        assert_eq!(err.failed_stage(), Stage::BalanceChecked);
        assert_eq!(distributor.stage(), Stage::Aborted);
        assert!(matches!(
            err,
            DistributionError::InsufficientBalance {
                required: 110_000_000,
                available: 109_999_999,
                ..
            }
        ));
        assert_eq!(ledger.attempts(), 0);
    }

    #[tokio::test]
    async fn test_exact_balance_passes() {
        let (_, distributor) = setup(110_000_000 + 10 * FEE_PER_SIGNATURE, settings(10, 3, 3));
        let result = distributor.run(&recipients(100), amount("0.001")).await.unwrap();
        assert_eq!(result.successful_count, 100);
    }

    #[tokio::test]
    async fn test_empty_recipients_abort() {
        let (ledger, distributor) = setup(SOL, settings(10, 3, 3));
        let err = distributor.run(&[], amount("0.001")).await.unwrap_err();
        assert!(matches!(err, DistributionError::NoRecipients));
        assert_eq!(distributor.stage(), Stage::Aborted);
        assert_eq!(ledger.balance_queries(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_batch_lands_in_failed_list() {
        let (ledger, distributor) = setup(SOL, settings(4, 2, 3));
        let recipients = recipients(10);
        let doomed: Vec<&str> = recipients[4..8].iter().map(|r| r.address.as_str()).collect();
        ledger.reject_always(pubkey(&recipients[4]), "Transaction simulation failed");

        let result = distributor.run(&recipients, amount("0.001")).await.unwrap();

        assert_eq!(result.successful_count, 6);
        assert_eq!(result.failed_count, 4);
        let failed: HashSet<&str> = result.failed.iter().map(|f| f.address.as_str()).collect();
        assert_eq!(failed, doomed.into_iter().collect::<HashSet<_>>());
        for f in &result.failed {
            assert_eq!(f.retry_count, 3);
            assert!(f.error.contains("Transaction simulation failed"));
        }
        // 2 successful batches once each, doomed batch 1 + 3 retries
        assert_eq!(ledger.attempts(), 2 + 4);
    }

    #[tokio::test]
    async fn test_lost_confirmation_double_pays_batch() {
        let (ledger, distributor) = setup(SOL, settings(5, 2, 3));
        let recipients = recipients(10);
        let first = pubkey(&recipients[0]);
        ledger.script(first, [Fault::LostConfirmation]);

        let result = distributor.run(&recipients, amount("0.01")).await.unwrap();

        // reported once, but paid twice on the ledger
        assert_eq!(result.successful_count, 10);
        assert_eq!(result.total_transactions, 2);
        assert_eq!(ledger.posted().len(), 3);
        assert_eq!(ledger.balance_of(&first), 2 * 10_000_000);
        assert_eq!(ledger.balance_of(&pubkey(&recipients[9])), 10_000_000);
    }

    #[tokio::test]
    async fn test_groups_never_exceed_concurrency_limit() {
        let cooldown = Duration::from_millis(100);
        let mut settings = settings(2, 3, 0);
        settings.group_cooldown = cooldown;
        let sender = Keypair::new();
        let ledger = Arc::new(
            MockLedger::with_balance(sender.pubkey(), SOL).with_latency(Duration::from_millis(20)),
        );
        let distributor = Distributor::new(ledger.clone(), sender, settings);
        // 12 recipients in 6 batches of 2, sent as two groups of 3
        let recipients = recipients(12);
        let group_of = |first: Option<Pubkey>| {
            let first = first.expect("batch has a recipient");
            let index = recipients.iter().position(|r| pubkey(r) == first).unwrap();
            index / 2 / 3
        };

        let started = Instant::now();
        let result = distributor.run(&recipients, amount("0.001")).await.unwrap();

        assert_eq!(result.successful_count, 12);
        assert_eq!(ledger.max_in_flight(), 3);

        let flights: Vec<(Flight, usize, Instant)> = ledger
            .flights()
            .into_iter()
            .map(|f| (f.kind, group_of(f.first_recipient), f.at))
            .collect();
        assert_eq!(flights.len(), 12);
        let times = |kind: Flight, group: usize| -> Vec<Instant> {
            flights
                .iter()
                .filter(|(k, g, _)| *k == kind && *g == group)
                .map(|(_, _, at)| *at)
                .collect()
        };
        let first_group_done = times(Flight::End, 0).into_iter().max().unwrap();
        let second_group_begins = times(Flight::Start, 1).into_iter().min().unwrap();
        assert!(second_group_begins >= first_group_done + cooldown);

        // no cooldown before the first group
        let first_start = times(Flight::Start, 0).into_iter().min().unwrap();
        assert!(first_start.duration_since(started) < cooldown);
    }

    #[tokio::test]
    async fn test_single_group_skips_cooldown() {
        let cooldown = Duration::from_secs(5);
        let mut settings = settings(5, 4, 0);
        settings.group_cooldown = cooldown;
        let sender = Keypair::new();
        let ledger = Arc::new(
            MockLedger::with_balance(sender.pubkey(), SOL).with_latency(Duration::from_millis(10)),
        );
        let distributor = Distributor::new(ledger.clone(), sender, settings);

        let started = Instant::now();
        let result = distributor.run(&recipients(20), amount("0.001")).await.unwrap();

        assert_eq!(result.total_transactions, 4);
        assert_eq!(ledger.max_in_flight(), 4);
        assert!(started.elapsed() < cooldown);
    }
}
