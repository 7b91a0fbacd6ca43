use crate::intake::RecipientLoader;
use crate::journal::{AuditLogger, ProcessedLedger};
use crate::processor::dispatcher::{BatchDispatcher, DispatchParams};
use crate::processor::executor::EvmTransferExecutor;
use crate::processor::sequence::SequenceCoordinator;
use crate::rpc::{ChainClient, EvmRpcClient};
use crate::runtime::config::DistributorConfig;
use crate::runtime::error::{RunError, RunStage};
use crate::runtime::summary::{AssetSummary, RunSummary};
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::transfer::{AssetType, Recipient};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Wires configuration, chain access and the audit log into one distribution
/// run, and handles OS signals for graceful shutdowns.
pub struct Runner {
    config: DistributorConfig,
    signer: PrivateKeySigner,
    client: Arc<dyn ChainClient>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
}

impl Runner {
    /// Creates a runner talking to the node named in `config`.
    pub fn new(config: DistributorConfig, signer: PrivateKeySigner) -> Result<Self> {
        let client = EvmRpcClient::from_config(&config)?;
        Ok(Self::with_client(config, signer, Arc::new(client)))
    }

    pub fn with_client(
        config: DistributorConfig,
        signer: PrivateKeySigner,
        client: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            config,
            signer,
            client,
            telemetry: Arc::new(Telemetry::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Runs to completion, stopping at the next batch boundary if Ctrl-C
    /// (SIGINT) is received.
    pub async fn run_until_ctrl_c(&self) -> Result<RunSummary, RunError> {
        let shutdown = self.shutdown.clone();
        let listener = tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => tracing::warn!(
                            "Ctrl-C received; finishing the in-flight batch before stopping"
                        ),
                        Err(err) => tracing::error!(error = %err, "failed to listen for Ctrl-C"),
                    }
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        let outcome = self.run().await;
        listener.abort();
        outcome
    }

    /// Performs one full distribution run over every configured asset.
    pub async fn run(&self) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();
        let funding = self.signer.address();

        tracing::info!(
            funding = %funding,
            rpc_url = self.config.rpc_url(),
            recipients = %self.config.recipients_path().display(),
            log = %self.config.log_path().display(),
            assets = ?self.config.assets(),
            concurrency = self.config.concurrency_limit(),
            policy = %self.config.reservation_policy(),
            "distribution run configured"
        );

        if !self.countdown().await {
            summary.cancelled = true;
            return Ok(summary);
        }

        let list = RecipientLoader::from_config(&self.config)
            .load_path(self.config.recipients_path())
            .map_err(|err| RunError::new(RunStage::LoadRecipients, err))?;
        summary.load_report = list.report.clone();

        let ledger = ProcessedLedger::load(self.config.log_path())
            .map_err(|err| RunError::new(RunStage::ReadLedger, err))?;
        let mut logger = AuditLogger::open(self.config.log_path())
            .map_err(|err| RunError::new(RunStage::OpenLog, err))?;

        let chain_id = self
            .resolve_chain_id()
            .await
            .map_err(|err| RunError::new(RunStage::FetchChainId, err))?;

        let reporter_shutdown = self.shutdown.child_token();
        let reporter = spawn_metrics_reporter(
            self.telemetry.clone(),
            self.client.clone(),
            reporter_shutdown.clone(),
            self.config.metrics_interval(),
        );

        let outcome = self
            .run_passes(&list.recipients, &ledger, &mut logger, chain_id, &mut summary)
            .await;

        reporter_shutdown.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter task failed");
        }
        outcome?;

        summary.rpc = self.client.metrics_snapshot();
        summary.log();
        Ok(summary)
    }

    async fn run_passes(
        &self,
        recipients: &[Recipient],
        ledger: &ProcessedLedger,
        logger: &mut AuditLogger,
        chain_id: u64,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        for &asset in self.config.assets() {
            if self.shutdown.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let pending = ledger.pending(asset, recipients);
            let already_processed = recipients.len() - pending.len();

            if pending.is_empty() {
                tracing::info!(asset = %asset, already_processed, "nothing left to send");
                let mut pass = AssetSummary::new(asset);
                pass.already_processed = already_processed;
                summary.assets.push(pass);
                continue;
            }

            tracing::info!(
                asset = %asset,
                pending = pending.len(),
                already_processed,
                "starting asset pass"
            );

            let executor = self
                .executor_for(asset, chain_id)
                .map_err(|err| RunError::new(RunStage::PrepareExecutor, err))?;
            let sequence = SequenceCoordinator::initialize(
                self.client.as_ref(),
                self.signer.address(),
                self.config.reservation_policy(),
            )
            .await
            .map_err(|err| RunError::new(RunStage::FetchSequence, err))?;

            let dispatcher = BatchDispatcher::new(
                &executor,
                &mut *logger,
                sequence,
                DispatchParams {
                    concurrency_limit: self.config.concurrency_limit(),
                    batch_delay: self.config.batch_delay(),
                },
                self.telemetry.clone(),
                self.shutdown.clone(),
            );

            let mut pass = dispatcher.run(pending).await?;
            pass.already_processed = already_processed;
            let cancelled = pass.cancelled;
            summary.assets.push(pass);

            if cancelled {
                summary.cancelled = true;
                break;
            }
        }

        Ok(())
    }

    fn executor_for(&self, asset: AssetType, chain_id: u64) -> Result<EvmTransferExecutor> {
        EvmTransferExecutor::for_asset(
            asset,
            &self.config,
            self.client.clone(),
            self.signer.clone(),
            chain_id,
        )
    }

    async fn resolve_chain_id(&self) -> Result<u64> {
        if let Some(chain_id) = self.config.chain_id() {
            return Ok(chain_id);
        }

        let chain_id = self
            .client
            .chain_id()
            .await
            .context("failed to read chain id from node")?;
        tracing::info!(chain_id, "chain id resolved from node");
        Ok(chain_id)
    }

    /// Gives the operator a window to abort before anything is sent. Returns
    /// `false` when the run was cancelled during the countdown.
    async fn countdown(&self) -> bool {
        if self.config.skip_countdown() || self.config.countdown().is_zero() {
            return !self.shutdown.is_cancelled();
        }

        tracing::warn!(
            seconds = self.config.countdown().as_secs(),
            "starting distribution after countdown; press Ctrl-C to abort"
        );

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                tracing::warn!("run aborted during countdown");
                false
            }
            _ = sleep(self.config.countdown()) => true,
        }
    }
}
