use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use clap::Parser;
use distributor::{init_tracing, AssetType, DistributorConfig, ReservationPolicy, Runner};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

const GWEI: u128 = 1_000_000_000;

/// Sends native and token transfers to every row of a recipient file,
/// resuming from the audit log after a crash or restart.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// JSON-RPC endpoint of the node (http:// or https://)
    #[arg(long, env = "DISTRIBUTOR_RPC_URL")]
    rpc_url: String,

    /// Basic-auth user for the RPC endpoint
    #[arg(long, env = "DISTRIBUTOR_RPC_USER")]
    rpc_user: Option<String>,

    /// Basic-auth password for the RPC endpoint
    #[arg(long, env = "DISTRIBUTOR_RPC_PASSWORD", hide_env_values = true)]
    rpc_password: Option<String>,

    /// Hex private key of the funding account
    #[arg(long, env = "DISTRIBUTOR_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// Recipient file with `address,amount` rows
    #[arg(short, long, env = "DISTRIBUTOR_RECIPIENTS", default_value = "recipients.csv")]
    recipients: PathBuf,

    /// Audit log, appended to and replayed on restart
    #[arg(short, long, env = "DISTRIBUTOR_LOG", default_value = "distribution_log.csv")]
    log: PathBuf,

    /// Asset passes to run, in order
    #[arg(long, env = "DISTRIBUTOR_ASSETS", value_delimiter = ',', default_value = "TOKEN,NATIVE")]
    assets: Vec<AssetType>,

    /// Token contract for TOKEN transfers
    #[arg(long, env = "DISTRIBUTOR_TOKEN")]
    token: Option<Address>,

    /// Decimals of the token contract
    #[arg(long, env = "DISTRIBUTOR_TOKEN_DECIMALS", default_value_t = 18)]
    token_decimals: u8,

    /// Chain id; read from the node when omitted
    #[arg(long, env = "DISTRIBUTOR_CHAIN_ID")]
    chain_id: Option<u64>,

    /// Transfers per batch (and in flight at once)
    #[arg(short, long, env = "DISTRIBUTOR_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Pause between batches, in milliseconds
    #[arg(long, env = "DISTRIBUTOR_BATCH_DELAY_MS", default_value_t = 1_000)]
    batch_delay_ms: u64,

    /// Amounts must be strictly greater than this to be sent
    #[arg(long, env = "DISTRIBUTOR_MIN_AMOUNT", default_value = "0")]
    min_amount: Decimal,

    /// Addresses never paid, comma separated
    #[arg(long, env = "DISTRIBUTOR_BLACKLIST", value_delimiter = ',')]
    blacklist: Vec<Address>,

    /// Priority fee per gas, in gwei
    #[arg(long, env = "DISTRIBUTOR_PRIORITY_FEE_GWEI", default_value_t = 50)]
    priority_fee_gwei: u64,

    /// Maximum fee per gas, in gwei
    #[arg(long, env = "DISTRIBUTOR_MAX_FEE_GWEI", default_value_t = 300)]
    max_fee_gwei: u64,

    #[arg(long, env = "DISTRIBUTOR_NATIVE_GAS_LIMIT", default_value_t = 21_000)]
    native_gas_limit: u64,

    #[arg(long, env = "DISTRIBUTOR_TOKEN_GAS_LIMIT", default_value_t = 100_000)]
    token_gas_limit: u64,

    /// What happens to the sequence number of a transfer the node rejected
    #[arg(long, env = "DISTRIBUTOR_RESERVATION_POLICY", default_value = "reserve-always")]
    reservation_policy: ReservationPolicy,

    /// Count a transfer as successful once the node accepts it, without waiting for a receipt
    #[arg(long, env = "DISTRIBUTOR_NO_WAIT")]
    no_wait: bool,

    /// How long to wait for a receipt, in seconds
    #[arg(long, env = "DISTRIBUTOR_CONFIRMATION_TIMEOUT_SECS", default_value_t = 120)]
    confirmation_timeout_secs: u64,

    /// Delay between receipt lookups, in milliseconds
    #[arg(long, env = "DISTRIBUTOR_RECEIPT_POLL_MS", default_value_t = 2_000)]
    receipt_poll_ms: u64,

    /// Per-request RPC timeout, in seconds
    #[arg(long, env = "DISTRIBUTOR_RPC_TIMEOUT_SECS", default_value_t = 10)]
    rpc_timeout_secs: u64,

    /// Attempts per RPC request before giving up
    #[arg(long, env = "DISTRIBUTOR_RPC_MAX_ATTEMPTS", default_value_t = 3)]
    rpc_max_attempts: usize,

    /// Skip the countdown before sending (for unattended restarts)
    #[arg(short = 'y', long, env = "DISTRIBUTOR_SKIP_CONFIRMATION")]
    yes: bool,

    /// Countdown before sending, in seconds
    #[arg(long, env = "DISTRIBUTOR_COUNTDOWN_SECS", default_value_t = 10)]
    countdown_secs: u64,
}

impl Cli {
    fn into_parts(self) -> Result<(DistributorConfig, PrivateKeySigner)> {
        let signer = PrivateKeySigner::from_str(self.private_key.trim())
            .context("DISTRIBUTOR_PRIVATE_KEY is not a valid private key")?;

        let mut builder = DistributorConfig::builder()
            .rpc_url(self.rpc_url)
            .rpc_timeout(Duration::from_secs(self.rpc_timeout_secs))
            .rpc_max_attempts(self.rpc_max_attempts)
            .recipients_path(self.recipients)
            .log_path(self.log)
            .assets(self.assets)
            .token_decimals(self.token_decimals)
            .concurrency_limit(self.concurrency)
            .batch_delay(Duration::from_millis(self.batch_delay_ms))
            .min_amount(self.min_amount)
            .blacklist(self.blacklist)
            .fees(
                u128::from(self.priority_fee_gwei) * GWEI,
                u128::from(self.max_fee_gwei) * GWEI,
            )
            .native_gas_limit(self.native_gas_limit)
            .token_gas_limit(self.token_gas_limit)
            .reservation_policy(self.reservation_policy)
            .await_confirmation(!self.no_wait)
            .confirmation_timeout(Duration::from_secs(self.confirmation_timeout_secs))
            .receipt_poll_interval(Duration::from_millis(self.receipt_poll_ms))
            .skip_countdown(self.yes)
            .countdown(Duration::from_secs(self.countdown_secs));

        if let Some(user) = self.rpc_user {
            builder = builder.rpc_credentials(user, self.rpc_password.unwrap_or_default());
        }
        if let Some(token) = self.token {
            builder = builder.token_contract(token);
        }
        if let Some(chain_id) = self.chain_id {
            builder = builder.chain_id(chain_id);
        }

        Ok((builder.build()?, signer))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let (config, signer) = match Cli::parse().into_parts() {
        Ok(parts) => parts,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "invalid configuration");
            return ExitCode::from(2);
        }
    };

    let runner = match Runner::new(config, signer) {
        Ok(runner) => runner,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "failed to initialise runner");
            return ExitCode::FAILURE;
        }
    };

    match runner.run_until_ctrl_c().await {
        Ok(summary) if summary.cancelled => {
            tracing::warn!("run stopped before completion; restart to resume");
            ExitCode::from(130)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(stage = ?err.stage(), error = %err, "distribution run failed");
            ExitCode::FAILURE
        }
    }
}
