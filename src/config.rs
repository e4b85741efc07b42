use anyhow::{anyhow, bail, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::Keypair;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::amount::{sol_to_lamports, TokenAmount};
use crate::distributor::DistributionSettings;
use crate::report::ExplorerLinks;
use crate::submitter::RetryPolicy;
use crate::wallet::keypair_from_json;

/// Environment variables are read as `AIRDROP_<FIELD>`, e.g. `AIRDROP_WALLET_SECRET`.
pub const ENV_PREFIX: &str = "AIRDROP";

/// Transfers per transaction that still fit the 1232-byte packet limit.
pub const MAX_TRANSFERS_PER_TX: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // RPC endpoint URL
    pub rpc_url: String,
    // cluster name used in explorer links
    pub cluster: String,
    pub explorer_url: String,
    pub recipients_file: PathBuf,
    // JSON byte array, normally supplied through AIRDROP_WALLET_SECRET
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_secret: Option<String>,
    // Default amount per recipient (in SOL) when none is given on the command line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    pub batch_size: usize,
    // Number of batches in flight at once
    pub concurrent_batches: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub group_cooldown_ms: u64,
    // SOL held back for fees during the balance check
    pub fee_buffer: Decimal,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.devnet.solana.com".to_string(),
            cluster: "devnet".to_string(),
            explorer_url: "https://explorer.solana.com".to_string(),
            recipients_file: PathBuf::from("recipients.csv"),
            wallet_secret: None,
            amount: None,
            batch_size: 10,
            concurrent_batches: 5,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            group_cooldown_ms: 1000,
            fee_buffer: Decimal::new(1, 2), // 0.01 SOL
        }
    }
}

impl Config {
    /// Layer an optional config file and `AIRDROP_*` environment variables over the defaults.
    pub fn load(config_path: &str) -> Result<Self> {
        Self::load_with_prefix(config_path, ENV_PREFIX)
    }

    fn load_with_prefix(config_path: &str, prefix: &str) -> Result<Self> {
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::with_name(config_path).required(false))
            .add_source(::config::Environment::with_prefix(prefix))
            .build()
            .and_then(::config::Config::try_deserialize)
            .with_context(|| format!("Failed to load config from {} and environment", config_path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config_path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        if let Some(parent) = Path::new(config_path).parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.rpc_url).with_context(|| format!("Invalid rpc_url: {}", self.rpc_url))?;
        Url::parse(&self.explorer_url)
            .with_context(|| format!("Invalid explorer_url: {}", self.explorer_url))?;
        if self.batch_size == 0 || self.batch_size > MAX_TRANSFERS_PER_TX {
            bail!(
                "batch_size must be between 1 and {}, got {}",
                MAX_TRANSFERS_PER_TX,
                self.batch_size
            );
        }
        if self.concurrent_batches == 0 {
            bail!("concurrent_batches must be at least 1");
        }
        if self.fee_buffer.is_sign_negative() {
            bail!("fee_buffer must not be negative, got {}", self.fee_buffer);
        }
        Ok(())
    }

    // Get sender keypair from the wallet secret
    pub fn sender_keypair(&self) -> Result<Keypair> {
        let secret = self.wallet_secret.as_deref().ok_or_else(|| {
            anyhow!("No wallet secret provided, set {}_WALLET_SECRET", ENV_PREFIX)
        })?;
        keypair_from_json(secret).context("Invalid wallet secret")
    }

    /// Amount from the command line, falling back to the configured default.
    pub fn amount(&self, cli_amount: Option<Decimal>) -> Result<TokenAmount> {
        let amount = cli_amount.or(self.amount).ok_or_else(|| {
            anyhow!(
                "No amount given, pass one as an argument or set {}_AMOUNT",
                ENV_PREFIX
            )
        })?;
        TokenAmount::new(amount).context("Invalid amount")
    }

    pub fn distribution(&self) -> Result<DistributionSettings> {
        let batch_size = NonZeroUsize::new(self.batch_size)
            .ok_or_else(|| anyhow!("batch_size must be at least 1"))?;
        let concurrent_batches = NonZeroUsize::new(self.concurrent_batches)
            .ok_or_else(|| anyhow!("concurrent_batches must be at least 1"))?;
        let fee_buffer = sol_to_lamports(self.fee_buffer).context("Invalid fee_buffer")?;

        Ok(DistributionSettings {
            batch_size,
            concurrent_batches,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
            },
            group_cooldown: Duration::from_millis(self.group_cooldown_ms),
            fee_buffer,
            explorer: ExplorerLinks::new(&self.explorer_url, &self.cluster),
        })
    }
}
