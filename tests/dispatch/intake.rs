use std::sync::Arc;

use crate::support::helpers::{
    address, address_hex, funding_signer, init_tracing, MemoryChain, Workspace,
};
use anyhow::Result;
use distributor::{Runner, RunStage};
use rust_decimal::Decimal;

#[tokio::test]
async fn amounts_at_or_below_the_minimum_are_never_sent() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    workspace.write_recipients(&format!(
        "address,amount\n{},100\n{},40\n{},200\n{},50\n",
        address_hex(0x01),
        address_hex(0x02),
        address_hex(0x03),
        address_hex(0x04),
    ))?;
    let chain = Arc::new(MemoryChain::new(0));

    let config = workspace.config().min_amount(Decimal::from(50)).build()?;
    let summary = Runner::with_client(config, funding_signer(), chain.clone())
        .run()
        .await?;

    let mut sent: Vec<_> = chain.submitted().iter().filter_map(|tx| tx.to).collect();
    sent.sort();
    assert_eq!(sent, vec![address(0x01), address(0x03)]);
    assert_eq!(summary.load_report.below_minimum, 2);
    assert_eq!(summary.load_report.header_rows, 1);
    assert_eq!(workspace.read_log()?.len(), 2, "skipped rows are not logged");
    Ok(())
}

#[tokio::test]
async fn blacklist_matches_regardless_of_letter_case() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    let upper = format!("0x{}", address_hex(0xab)[2..].to_ascii_uppercase());
    workspace.write_recipients(&format!("{upper},5\n{},5\n", address_hex(0x01)))?;
    let chain = Arc::new(MemoryChain::new(0));

    let config = workspace.config().blacklist([address(0xab)]).build()?;
    let summary = Runner::with_client(config, funding_signer(), chain.clone())
        .run()
        .await?;

    let sent: Vec<_> = chain.submitted().iter().filter_map(|tx| tx.to).collect();
    assert_eq!(sent, vec![address(0x01)]);
    assert_eq!(summary.load_report.blacklisted, 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_and_invalid_rows_are_dropped_before_sending() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    workspace.write_recipients(&format!(
        "Address,Amount\n{a},1\nnot-an-address,2\n{b},abc\n{a},9\n{b},1e-2\n",
        a = address_hex(0x01),
        b = address_hex(0x02),
    ))?;
    let chain = Arc::new(MemoryChain::new(0));

    let summary = Runner::with_client(workspace.config().build()?, funding_signer(), chain.clone())
        .run()
        .await?;

    let report = &summary.load_report;
    assert_eq!(report.accepted, 2);
    assert_eq!(report.invalid_address, 1);
    assert_eq!(report.invalid_amount, 1);
    assert_eq!(report.duplicates, 1);

    let rows = workspace.read_log()?;
    let amounts: Vec<_> = rows.iter().map(|row| row.amount.as_str()).collect();
    assert!(amounts.contains(&"1"), "first occurrence wins: {amounts:?}");
    assert!(amounts.contains(&"0.01"), "exponent notation is rendered: {amounts:?}");
    Ok(())
}

#[tokio::test]
async fn missing_recipient_file_aborts_the_run() -> Result<()> {
    init_tracing();
    let workspace = Workspace::new()?;
    let chain = Arc::new(MemoryChain::new(0));

    let err = Runner::with_client(workspace.config().build()?, funding_signer(), chain.clone())
        .run()
        .await
        .expect_err("a missing recipient file is fatal");

    assert_eq!(err.stage(), RunStage::LoadRecipients);
    assert!(chain.submitted().is_empty());
    assert!(!workspace.log_path().exists(), "no log is created for an aborted run");
    Ok(())
}
