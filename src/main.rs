use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use solana_sdk::signature::Signer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sol_airdrop_bot::amount::lamports_to_sol;
use sol_airdrop_bot::config::{Config, ENV_PREFIX};
use sol_airdrop_bot::distributor::Distributor;
use sol_airdrop_bot::ledger::{Ledger, RpcLedger};
use sol_airdrop_bot::{recipients, wallet};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Batched SOL airdrop to a CSV list of recipients")]
struct Args {
    /// Amount of SOL per recipient (defaults to AIRDROP_AMOUNT)
    amount: Option<Decimal>,

    /// Path to config file
    #[clap(short, long, default_value = "airdrop.json")]
    config: String,

    /// Recipients CSV file (overrides recipients_file from config)
    #[clap(short, long)]
    recipients: Option<PathBuf>,

    /// Print the final report as JSON
    #[clap(long)]
    json: bool,

    /// Generate a new sender wallet and a default config file
    #[clap(short, long)]
    init: bool,

    /// Show sender wallet address and balance (useful for funding)
    #[clap(short, long)]
    show_wallet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.init {
        return init(&args.config);
    }

    // Load config
    let config = Config::load(&args.config)?;
    let sender = config.sender_keypair()?;

    if args.show_wallet {
        let ledger = RpcLedger::new(&config.rpc_url);
        let balance = ledger
            .balance(&sender.pubkey())
            .await
            .context("Failed to fetch sender balance")?;
        println!("Sender wallet: {}", sender.pubkey());
        println!("Balance: {} SOL", lamports_to_sol(balance));
        return Ok(());
    }

    let amount = config.amount(args.amount)?;
    let recipients_file = args.recipients.unwrap_or_else(|| config.recipients_file.clone());
    let recipients = recipients::load(&recipients_file)
        .with_context(|| format!("Failed to load recipients from {}", recipients_file.display()))?;
    let settings = config.distribution()?;

    println!("Using RPC endpoint: {}", config.rpc_url);
    println!("Sender wallet: {}", sender.pubkey());
    println!("Recipients: {} (from {})", recipients.len(), recipients_file.display());
    println!("Amount per recipient: {}", amount);

    let ledger = Arc::new(RpcLedger::new(&config.rpc_url));
    ledger.probe().await;

    let distributor = Distributor::new(ledger, sender, settings);
    let result = match distributor.run(&recipients, amount).await {
        Ok(result) => result,
        Err(e) => {
            let failed = e.failed_stage();
            return Err(e).context(format!(
                "Distribution aborted before reaching {failed}, no funds were sent"
            ));
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result);
    }

    Ok(())
}

fn init(config_path: &str) -> Result<()> {
    let wallet_path = PathBuf::from(config_path).with_file_name("wallet.json");
    let keypair = wallet::generate(&wallet_path)?;

    let config = Config::default();
    config.save(config_path)?;

    println!("Default config generated at: {}", config_path);
    println!("Sender wallet secret written to: {}", wallet_path.display());
    println!("Sender wallet public key: {}", keypair.pubkey());
    println!(
        "Export it before running: export {}_WALLET_SECRET=\"$(cat {})\"",
        ENV_PREFIX,
        wallet_path.display()
    );
    println!("Please fund this wallet before running transfers");
    Ok(())
}
