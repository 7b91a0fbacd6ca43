use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{
    address, address_hex, assert_batches_do_not_overlap, funding_signer, init_tracing,
    MemoryChain, Workspace,
};
use anyhow::Result;
use distributor::{AssetType, LogStatus, ReservationPolicy, Runner};

fn recipients(count: u8) -> String {
    (1..=count)
        .map(|byte| format!("{},{}\n", address_hex(byte), byte))
        .collect()
}

#[tokio::test]
async fn sequence_numbers_continue_from_the_pending_count() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    workspace.write_recipients(&recipients(3))?;
    let chain = Arc::new(MemoryChain::new(10));

    let summary = Runner::with_client(workspace.config().build()?, funding_signer(), chain.clone())
        .run()
        .await?;

    let mut nonces = chain.submitted_nonces();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![10, 11, 12]);

    let native = summary.asset(AssetType::Native).expect("native pass summary");
    assert_eq!(native.batches, 2);
    assert_eq!(native.first_sequence, Some(10));
    assert_eq!(native.next_sequence, Some(13));
    Ok(())
}

#[tokio::test]
async fn a_batch_starts_only_after_the_previous_one_resolved() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    workspace.write_recipients(&recipients(5))?;
    let chain = Arc::new(MemoryChain::new(10).with_send_delay(Duration::from_millis(20)));

    Runner::with_client(workspace.config().build()?, funding_signer(), chain.clone())
        .run()
        .await?;

    assert_eq!(chain.submitted().len(), 5);
    assert!(chain.max_in_flight() <= 2, "at most one window in flight");
    assert_batches_do_not_overlap(&chain.events(), 10, 2);
    Ok(())
}

#[tokio::test]
async fn every_attempt_is_logged_once_and_failures_do_not_stop_the_run() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    workspace.write_recipients(&recipients(4))?;
    let chain = Arc::new(MemoryChain::new(0));
    chain.reject_once(1, "insufficient funds for gas * price + value");

    let summary = Runner::with_client(workspace.config().build()?, funding_signer(), chain.clone())
        .run()
        .await?;

    assert_eq!(summary.total_succeeded(), 3);
    assert_eq!(summary.total_failed(), 1);

    let rows = workspace.read_log()?;
    assert_eq!(rows.len(), 4);
    let failed: Vec<_> = rows
        .iter()
        .filter(|row| row.status == LogStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.contains("insufficient funds"), "{failed:?}");
    assert!(failed[0].reference.is_empty());

    // The rejected number stays burned under the default policy.
    let mut nonces = chain.submitted_nonces();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![0, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn reserve_on_acceptance_fills_a_rejected_number_in_the_same_batch() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    workspace.write_recipients(&recipients(3))?;
    let chain = Arc::new(MemoryChain::new(10));
    chain.reject_once(10, "insufficient funds for gas * price + value");

    let config = workspace
        .config()
        .reservation_policy(ReservationPolicy::ReserveOnAcceptance)
        .build()?;
    let summary = Runner::with_client(config, funding_signer(), chain.clone())
        .run()
        .await?;

    let submitted = chain.submitted();
    let mut nonces: Vec<u64> = submitted.iter().map(|tx| tx.nonce).collect();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![10, 11], "no gap is left behind");

    let third = submitted
        .iter()
        .find(|tx| tx.to == Some(address(0x03)))
        .expect("third recipient sent");
    assert_eq!(third.nonce, 10);

    let native = summary.asset(AssetType::Native).expect("native pass summary");
    assert!(native.unfilled_sequences.is_empty());
    assert_eq!(native.failed, 1);
    assert_eq!(native.batches, 1);
    Ok(())
}

#[tokio::test]
async fn confirmed_transfers_are_not_stranded_behind_a_rejected_number() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    workspace.write_recipients(&recipients(3))?;
    let chain = Arc::new(MemoryChain::new(0).mining_in_order());
    chain.reject_once(0, "insufficient funds for gas * price + value");

    let config = workspace
        .config()
        .reservation_policy(ReservationPolicy::ReserveOnAcceptance)
        .await_confirmation(true)
        .confirmation_timeout(Duration::from_secs(2))
        .receipt_poll_interval(Duration::from_millis(10))
        .build()?;
    let summary = Runner::with_client(config.clone(), funding_signer(), chain.clone())
        .run()
        .await?;

    let rows = workspace.read_log()?;
    let status_of = |byte: u8| {
        rows.iter()
            .find(|row| row.address == address_hex(byte))
            .map(|row| row.status)
    };
    assert_eq!(status_of(0x01), Some(LogStatus::Failed));
    assert_eq!(status_of(0x02), Some(LogStatus::Success));
    assert_eq!(status_of(0x03), Some(LogStatus::Success));

    let native = summary.asset(AssetType::Native).expect("native pass summary");
    assert_eq!(native.succeeded, 2);
    assert!(native.unfilled_sequences.is_empty());

    // A restart pays only the recipient that was never accepted.
    Runner::with_client(config, funding_signer(), chain.clone())
        .run()
        .await?;
    let submitted = chain.submitted();
    assert_eq!(submitted.len(), 3);
    let retried = submitted.last().expect("retry sent");
    assert_eq!(retried.to, Some(address(0x01)));
    assert_eq!(retried.nonce, 2);
    Ok(())
}

#[tokio::test]
async fn a_trailing_gap_is_occupied_by_a_no_op_transfer() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    workspace.write_recipients(&recipients(2))?;
    let chain = Arc::new(MemoryChain::new(0).mining_in_order());
    chain.reject_once(0, "insufficient funds for gas * price + value");

    let config = workspace
        .config()
        .reservation_policy(ReservationPolicy::ReserveOnAcceptance)
        .await_confirmation(true)
        .confirmation_timeout(Duration::from_secs(2))
        .receipt_poll_interval(Duration::from_millis(10))
        .build()?;
    Runner::with_client(config, funding_signer(), chain.clone())
        .run()
        .await?;

    let funding = funding_signer().address();
    let filler = chain
        .submitted()
        .into_iter()
        .find(|tx| tx.to == Some(funding))
        .expect("no-op transfer sent");
    assert_eq!(filler.nonce, 0);

    let rows = workspace.read_log()?;
    assert_eq!(rows.len(), 2, "the no-op transfer is not logged");
    let second = rows
        .iter()
        .find(|row| row.address == address_hex(0x02))
        .expect("second recipient logged");
    assert_eq!(second.status, LogStatus::Success);
    Ok(())
}

#[tokio::test]
async fn reserve_on_acceptance_never_reuses_a_taken_number() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    workspace.write_recipients(&recipients(3))?;
    let chain = Arc::new(MemoryChain::new(10));
    chain.reject_once(10, "nonce too low");

    let config = workspace
        .config()
        .reservation_policy(ReservationPolicy::ReserveOnAcceptance)
        .build()?;
    Runner::with_client(config, funding_signer(), chain.clone())
        .run()
        .await?;

    let mut nonces = chain.submitted_nonces();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![11, 12]);
    Ok(())
}

#[tokio::test]
async fn token_pass_runs_before_native_and_refetches_the_sequence() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    workspace.write_recipients(&recipients(2))?;
    let chain = Arc::new(MemoryChain::new(4));
    let contract = address(0xcc);

    let config = workspace
        .config()
        .assets([AssetType::Token, AssetType::Native])
        .token_contract(contract)
        .token_decimals(6)
        .build()?;
    let summary = Runner::with_client(config, funding_signer(), chain.clone())
        .run()
        .await?;

    let submitted = chain.submitted();
    assert_eq!(submitted.len(), 4);
    assert!(submitted[..2].iter().all(|tx| tx.to == Some(contract)));
    assert!(submitted[2..].iter().all(|tx| tx.to != Some(contract)));

    let mut nonces = chain.submitted_nonces();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![4, 5, 6, 7]);

    assert_eq!(summary.asset(AssetType::Token).map(|s| s.succeeded), Some(2));
    assert_eq!(summary.asset(AssetType::Native).map(|s| s.first_sequence), Some(Some(6)));

    let rows = workspace.read_log()?;
    let assets: Vec<_> = rows.iter().map(|row| row.asset).collect();
    assert_eq!(
        assets,
        vec![AssetType::Token, AssetType::Token, AssetType::Native, AssetType::Native]
    );
    Ok(())
}
