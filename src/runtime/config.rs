use crate::processor::sequence::ReservationPolicy;
use crate::runtime::telemetry;
use crate::transfer::AssetType;
use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const GWEI: u128 = 1_000_000_000;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RPC_MAX_ATTEMPTS: usize = 3;
const DEFAULT_CONCURRENCY_LIMIT: usize = 10;
const DEFAULT_BATCH_DELAY_MS: u64 = 1_000;
const DEFAULT_TOKEN_DECIMALS: u8 = 18;
const DEFAULT_PRIORITY_FEE_WEI: u128 = 50 * GWEI;
const DEFAULT_MAX_FEE_WEI: u128 = 300 * GWEI;
const DEFAULT_NATIVE_GAS_LIMIT: u64 = 21_000;
const DEFAULT_TOKEN_GAS_LIMIT: u64 = 100_000;
const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RECEIPT_POLL_MS: u64 = 2_000;
const DEFAULT_COUNTDOWN_SECS: u64 = 10;
const MIN_NATIVE_GAS_LIMIT: u64 = 21_000;
const MAX_TOKEN_DECIMALS: u8 = 36;
pub const DEFAULT_LOG_PATH: &str = "distribution_log.csv";

/// Runtime configuration for a distribution run.
///
/// All instances must be constructed via [`DistributorConfig::builder`] or
/// [`DistributorConfig::new`] so invariants are validated before the engine
/// observes the values. The engine never reads configuration from anywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributorConfig {
    rpc_url: String,
    rpc_user: Option<String>,
    rpc_password: Option<String>,
    rpc_timeout: Duration,
    rpc_max_attempts: usize,
    chain_id: Option<u64>,
    recipients_path: PathBuf,
    log_path: PathBuf,
    assets: Vec<AssetType>,
    token_contract: Option<Address>,
    token_decimals: u8,
    concurrency_limit: usize,
    batch_delay: Duration,
    min_amount: Decimal,
    blacklist: HashSet<Address>,
    max_priority_fee_per_gas: u128,
    max_fee_per_gas: u128,
    native_gas_limit: u64,
    token_gas_limit: u64,
    reservation_policy: ReservationPolicy,
    await_confirmation: bool,
    confirmation_timeout: Duration,
    receipt_poll_interval: Duration,
    skip_countdown: bool,
    countdown: Duration,
    metrics_interval: Duration,
}

pub struct DistributorConfigParams {
    pub rpc_url: String,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
    pub rpc_timeout: Duration,
    pub rpc_max_attempts: usize,
    pub chain_id: Option<u64>,
    pub recipients_path: PathBuf,
    pub log_path: PathBuf,
    pub assets: Vec<AssetType>,
    pub token_contract: Option<Address>,
    pub token_decimals: u8,
    pub concurrency_limit: usize,
    pub batch_delay: Duration,
    pub min_amount: Decimal,
    pub blacklist: HashSet<Address>,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub native_gas_limit: u64,
    pub token_gas_limit: u64,
    pub reservation_policy: ReservationPolicy,
    pub await_confirmation: bool,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub skip_countdown: bool,
    pub countdown: Duration,
    pub metrics_interval: Duration,
}

impl DistributorConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> DistributorConfigBuilder {
        DistributorConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: DistributorConfigParams) -> Result<Self> {
        let DistributorConfigParams {
            rpc_url,
            rpc_user,
            rpc_password,
            rpc_timeout,
            rpc_max_attempts,
            chain_id,
            recipients_path,
            log_path,
            assets,
            token_contract,
            token_decimals,
            concurrency_limit,
            batch_delay,
            min_amount,
            blacklist,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            native_gas_limit,
            token_gas_limit,
            reservation_policy,
            await_confirmation,
            confirmation_timeout,
            receipt_poll_interval,
            skip_countdown,
            countdown,
            metrics_interval,
        } = params;

        let config = Self {
            rpc_url: rpc_url.trim().to_owned(),
            rpc_user: trimmed_optional(rpc_user),
            rpc_password: rpc_password.filter(|value| !value.is_empty()),
            rpc_timeout,
            rpc_max_attempts,
            chain_id,
            recipients_path,
            log_path,
            assets,
            token_contract,
            token_decimals,
            concurrency_limit,
            batch_delay,
            min_amount,
            blacklist,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            native_gas_limit,
            token_gas_limit,
            reservation_policy,
            await_confirmation,
            confirmation_timeout,
            receipt_poll_interval,
            skip_countdown,
            countdown,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Full RPC URL (including scheme).
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn rpc_user(&self) -> Option<&str> {
        self.rpc_user.as_deref()
    }

    pub fn rpc_password(&self) -> Option<&str> {
        self.rpc_password.as_deref()
    }

    /// Per-request timeout applied to every JSON-RPC call.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Attempts per RPC call before a transport failure is final.
    pub fn rpc_max_attempts(&self) -> usize {
        self.rpc_max_attempts
    }

    /// Chain id override. `None` means it is read from the node.
    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    pub fn recipients_path(&self) -> &Path {
        &self.recipients_path
    }

    /// Durable audit log, also the source of resume state.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Asset passes in execution order.
    pub fn assets(&self) -> &[AssetType] {
        &self.assets
    }

    pub fn token_contract(&self) -> Option<Address> {
        self.token_contract
    }

    pub fn token_decimals(&self) -> u8 {
        self.token_decimals
    }

    /// Window size; also the maximum number of transfers in flight.
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Pause between two batches.
    pub fn batch_delay(&self) -> Duration {
        self.batch_delay
    }

    /// Amounts must be strictly greater than this to be sent.
    pub fn min_amount(&self) -> Decimal {
        self.min_amount
    }

    pub fn blacklist(&self) -> &HashSet<Address> {
        &self.blacklist
    }

    pub fn max_priority_fee_per_gas(&self) -> u128 {
        self.max_priority_fee_per_gas
    }

    pub fn max_fee_per_gas(&self) -> u128 {
        self.max_fee_per_gas
    }

    pub fn native_gas_limit(&self) -> u64 {
        self.native_gas_limit
    }

    pub fn token_gas_limit(&self) -> u64 {
        self.token_gas_limit
    }

    pub fn reservation_policy(&self) -> ReservationPolicy {
        self.reservation_policy
    }

    /// Whether a transfer only counts once its receipt is observed.
    pub fn await_confirmation(&self) -> bool {
        self.await_confirmation
    }

    pub fn confirmation_timeout(&self) -> Duration {
        self.confirmation_timeout
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        self.receipt_poll_interval
    }

    /// Skips the pre-run countdown, for unattended restarts.
    pub fn skip_countdown(&self) -> bool {
        self.skip_countdown
    }

    pub fn countdown(&self) -> Duration {
        self.countdown
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.rpc_url)?;

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        if self.rpc_max_attempts == 0 {
            bail!("rpc_max_attempts must be greater than 0");
        }

        if self.recipients_path.as_os_str().is_empty() {
            bail!("recipients_path cannot be empty");
        }

        if self.log_path.as_os_str().is_empty() {
            bail!("log_path cannot be empty");
        }

        if self.assets.is_empty() {
            bail!("assets must name at least one asset type");
        }

        let unique: HashSet<AssetType> = self.assets.iter().copied().collect();
        if unique.len() != self.assets.len() {
            bail!("assets must not repeat an asset type");
        }

        if self.assets.contains(&AssetType::Token) {
            match self.token_contract {
                None => bail!("token_contract is required when TOKEN transfers are enabled"),
                Some(contract) if contract == Address::ZERO => {
                    bail!("token_contract cannot be the zero address")
                }
                Some(_) => {}
            }
        }

        if self.token_decimals > MAX_TOKEN_DECIMALS {
            bail!("token_decimals must be at most {MAX_TOKEN_DECIMALS}");
        }

        if self.concurrency_limit == 0 {
            bail!("concurrency_limit must be greater than 0");
        }

        if self.min_amount.is_sign_negative() {
            bail!("min_amount cannot be negative");
        }

        if self.max_fee_per_gas == 0 {
            bail!("max_fee_per_gas must be greater than 0");
        }

        if self.max_priority_fee_per_gas > self.max_fee_per_gas {
            bail!("max_priority_fee_per_gas cannot exceed max_fee_per_gas");
        }

        if self.native_gas_limit < MIN_NATIVE_GAS_LIMIT {
            bail!("native_gas_limit must be at least {MIN_NATIVE_GAS_LIMIT}");
        }

        if self.token_gas_limit == 0 {
            bail!("token_gas_limit must be greater than 0");
        }

        if self.await_confirmation {
            if self.confirmation_timeout.is_zero() {
                bail!("confirmation_timeout must be greater than 0");
            }
            if self.receipt_poll_interval.is_zero() {
                bail!("receipt_poll_interval must be greater than 0");
            }
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct DistributorConfigBuilder {
    rpc_url: Option<String>,
    rpc_user: Option<String>,
    rpc_password: Option<String>,
    rpc_timeout: Option<Duration>,
    rpc_max_attempts: Option<usize>,
    chain_id: Option<u64>,
    recipients_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
    assets: Option<Vec<AssetType>>,
    token_contract: Option<Address>,
    token_decimals: Option<u8>,
    concurrency_limit: Option<usize>,
    batch_delay: Option<Duration>,
    min_amount: Option<Decimal>,
    blacklist: HashSet<Address>,
    max_priority_fee_per_gas: Option<u128>,
    max_fee_per_gas: Option<u128>,
    native_gas_limit: Option<u64>,
    token_gas_limit: Option<u64>,
    reservation_policy: Option<ReservationPolicy>,
    await_confirmation: Option<bool>,
    confirmation_timeout: Option<Duration>,
    receipt_poll_interval: Option<Duration>,
    skip_countdown: bool,
    countdown: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl DistributorConfigBuilder {
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    pub fn rpc_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.rpc_user = Some(user.into());
        self.rpc_password = Some(password.into());
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn rpc_max_attempts(mut self, attempts: usize) -> Self {
        self.rpc_max_attempts = Some(attempts);
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn recipients_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.recipients_path = Some(path.into());
        self
    }

    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn assets(mut self, assets: impl IntoIterator<Item = AssetType>) -> Self {
        self.assets = Some(assets.into_iter().collect());
        self
    }

    pub fn token_contract(mut self, contract: Address) -> Self {
        self.token_contract = Some(contract);
        self
    }

    pub fn token_decimals(mut self, decimals: u8) -> Self {
        self.token_decimals = Some(decimals);
        self
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = Some(delay);
        self
    }

    pub fn min_amount(mut self, amount: Decimal) -> Self {
        self.min_amount = Some(amount);
        self
    }

    pub fn blacklist(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        self.blacklist.extend(addresses);
        self
    }

    pub fn fees(mut self, max_priority_fee_per_gas: u128, max_fee_per_gas: u128) -> Self {
        self.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
        self.max_fee_per_gas = Some(max_fee_per_gas);
        self
    }

    pub fn native_gas_limit(mut self, gas: u64) -> Self {
        self.native_gas_limit = Some(gas);
        self
    }

    pub fn token_gas_limit(mut self, gas: u64) -> Self {
        self.token_gas_limit = Some(gas);
        self
    }

    pub fn reservation_policy(mut self, policy: ReservationPolicy) -> Self {
        self.reservation_policy = Some(policy);
        self
    }

    pub fn await_confirmation(mut self, wait: bool) -> Self {
        self.await_confirmation = Some(wait);
        self
    }

    pub fn confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = Some(timeout);
        self
    }

    pub fn receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = Some(interval);
        self
    }

    pub fn skip_countdown(mut self, skip: bool) -> Self {
        self.skip_countdown = skip;
        self
    }

    pub fn countdown(mut self, countdown: Duration) -> Self {
        self.countdown = Some(countdown);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<DistributorConfig> {
        let params = DistributorConfigParams {
            rpc_url: self.rpc_url.context("rpc_url is required")?,
            rpc_user: self.rpc_user,
            rpc_password: self.rpc_password,
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            rpc_max_attempts: self.rpc_max_attempts.unwrap_or(DEFAULT_RPC_MAX_ATTEMPTS),
            chain_id: self.chain_id,
            recipients_path: self
                .recipients_path
                .context("recipients_path is required")?,
            log_path: self
                .log_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
            assets: self
                .assets
                .unwrap_or_else(|| vec![AssetType::Token, AssetType::Native]),
            token_contract: self.token_contract,
            token_decimals: self.token_decimals.unwrap_or(DEFAULT_TOKEN_DECIMALS),
            concurrency_limit: self.concurrency_limit.unwrap_or(DEFAULT_CONCURRENCY_LIMIT),
            batch_delay: self
                .batch_delay
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_BATCH_DELAY_MS)),
            min_amount: self.min_amount.unwrap_or(Decimal::ZERO),
            blacklist: self.blacklist,
            max_priority_fee_per_gas: self
                .max_priority_fee_per_gas
                .unwrap_or(DEFAULT_PRIORITY_FEE_WEI),
            max_fee_per_gas: self.max_fee_per_gas.unwrap_or(DEFAULT_MAX_FEE_WEI),
            native_gas_limit: self.native_gas_limit.unwrap_or(DEFAULT_NATIVE_GAS_LIMIT),
            token_gas_limit: self.token_gas_limit.unwrap_or(DEFAULT_TOKEN_GAS_LIMIT),
            reservation_policy: self.reservation_policy.unwrap_or_default(),
            await_confirmation: self.await_confirmation.unwrap_or(true),
            confirmation_timeout: self
                .confirmation_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS)),
            receipt_poll_interval: self
                .receipt_poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_RECEIPT_POLL_MS)),
            skip_countdown: self.skip_countdown,
            countdown: self
                .countdown
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_COUNTDOWN_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        DistributorConfig::new(params)
    }
}

fn trimmed_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("rpc_url must start with http:// or https://");
    }
    Ok(())
}
