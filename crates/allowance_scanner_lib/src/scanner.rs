use crate::db::model::*;
use crate::db::ops::*;
use crate::error::AllowanceError;
use crate::events::{decode_event, PermissionKind, TokenStandard};
use crate::retry::call_with_retry;
use crate::rpc::{ChainClient, ChainClientProvider};
use crate::setup::ScanSetup;
use crate::utils::{address_to_db, address_to_topic};
use crate::err_from;
use serde::Serialize;
use sqlx::{Connection, SqliteConnection};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use web3::types::{Address, BlockNumber, Filter, FilterBuilder, H256};

const SCANNED_KINDS: [PermissionKind; 2] = [PermissionKind::PerToken, PermissionKind::AllAssets];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub chain_id: u64,
    pub tip: u64,
    pub windows_scanned: usize,
    pub windows_total: usize,
    pub events_stored: usize,
    pub events_ignored: usize,
    pub events_skipped: usize,
    pub scanned_to_block: Option<u64>,
    pub complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainScanResult {
    pub chain_id: u64,
    pub report: Option<ScanReport>,
    pub error: Option<String>,
    /// Set when the failure is worth retrying at the next scheduled scan.
    pub transient: bool,
}

#[derive(Debug, Default)]
struct WindowStats {
    stored: usize,
    ignored: usize,
    skipped: usize,
}

/// Splits `[0, tip]` into consecutive inclusive ranges of `window` blocks.
/// The last range ends exactly at `tip`.
pub fn block_windows(tip: u64, window: u64) -> Vec<(u64, u64)> {
    let window = window.max(1);
    let mut windows = Vec::with_capacity((tip / window + 1) as usize);
    let mut from = 0u64;
    loop {
        let to = from.saturating_add(window - 1).min(tip);
        windows.push((from, to));
        if to >= tip {
            break;
        }
        from = to + 1;
    }
    windows
}

fn window_filter(kind: PermissionKind, owner_topic: H256, from: u64, to: u64) -> Filter {
    FilterBuilder::default()
        .from_block(BlockNumber::Number(from.into()))
        .to_block(BlockNumber::Number(to.into()))
        .topics(Some(vec![kind.topic()]), Some(vec![owner_topic]), None, None)
        .build()
}

/// `ApprovalForAll` looks the same on ERC-721 and ERC-1155 collections, so
/// the standard comes from the metadata cache when it knows the token.
async fn apply_cached_standard(
    conn: &mut SqliteConnection,
    observation: &mut AllowanceObservation,
) -> Result<(), sqlx::Error> {
    if observation.kind != PermissionKind::AllAssets.as_str() {
        return Ok(());
    }
    if let Some(cached) =
        get_token_metadata(conn, observation.chain_id, &observation.token_addr).await?
    {
        if cached.standard == TokenStandard::Erc721.as_str()
            || cached.standard == TokenStandard::Erc1155.as_str()
        {
            observation.standard = cached.standard;
        }
    }
    Ok(())
}

async fn scan_window(
    conn: &Mutex<SqliteConnection>,
    client: &dyn ChainClient,
    setup: &ScanSetup,
    owner: Address,
    from: u64,
    to: u64,
) -> Result<WindowStats, AllowanceError> {
    let chain_id = client.chain_id();
    let policy = setup.retry_policy();
    let owner_topic = address_to_topic(owner);
    let mut stats = WindowStats::default();
    let mut observations = Vec::new();

    for kind in SCANNED_KINDS {
        let filter = window_filter(kind, owner_topic, from, to);
        let label = format!("eth_getLogs {} [{}, {}] on chain {}", kind, from, to, chain_id);
        let logs = call_with_retry(&policy, setup.request_timeout(), &label, || {
            client.logs(filter.clone())
        })
        .await?;
        for log in &logs {
            match decode_event(kind, log) {
                Ok(Some(event)) => observations.push(event.to_observation(chain_id)),
                Ok(None) => stats.ignored += 1,
                Err(err) => {
                    log::warn!("Skipping malformed {} log on chain {}: {}", kind, chain_id, err);
                    stats.skipped += 1;
                }
            }
        }
    }

    let owner_db = address_to_db(owner);
    let mut conn = conn.lock().await;
    let mut db_transaction = conn.begin().await.map_err(err_from!())?;
    for observation in &mut observations {
        apply_cached_standard(&mut db_transaction, observation)
            .await
            .map_err(err_from!())?;
        if upsert_allowance(&mut db_transaction, observation)
            .await
            .map_err(err_from!())?
        {
            stats.stored += 1;
        }
    }
    update_scan_watermark(&mut db_transaction, &owner_db, chain_id as i64, to as i64)
        .await
        .map_err(err_from!())?;
    db_transaction.commit().await.map_err(err_from!())?;

    log::debug!(
        "Window [{}, {}] on chain {}: {} stored, {} ignored, {} skipped",
        from,
        to,
        chain_id,
        stats.stored,
        stats.ignored,
        stats.skipped
    );
    Ok(stats)
}

async fn finish(
    conn: &Mutex<SqliteConnection>,
    owner: &str,
    chain_id: u64,
    status: &str,
    error: Option<&str>,
) -> Result<(), AllowanceError> {
    let mut conn = conn.lock().await;
    finish_scan_progress(&mut conn, owner, chain_id as i64, status, error)
        .await
        .map_err(err_from!())
}

/// Full historical sweep of one wallet on the client's chain.
///
/// Windows are visited in ascending order and each window is committed
/// before the next one is fetched. A failing window aborts the sweep but
/// everything committed so far stays, together with the coverage
/// watermark in `scan_progress`.
pub async fn scan_wallet(
    conn: &Mutex<SqliteConnection>,
    client: &dyn ChainClient,
    setup: &ScanSetup,
    wallet: Address,
    cancel: &CancellationToken,
) -> Result<ScanReport, AllowanceError> {
    let chain_id = client.chain_id();
    let owner = address_to_db(wallet);
    let policy = setup.retry_policy();

    let tip = call_with_retry(
        &policy,
        setup.request_timeout(),
        &format!("eth_blockNumber on chain {}", chain_id),
        || client.block_number(),
    )
    .await?;

    let windows = block_windows(tip, setup.window_size);
    log::info!(
        "Scanning {} on chain {} up to block {} in {} windows",
        owner,
        chain_id,
        tip,
        windows.len()
    );
    {
        let mut conn = conn.lock().await;
        start_scan_progress(&mut conn, &owner, chain_id as i64, tip as i64)
            .await
            .map_err(err_from!())?;
    }

    let mut report = ScanReport {
        chain_id,
        tip,
        windows_scanned: 0,
        windows_total: windows.len(),
        events_stored: 0,
        events_ignored: 0,
        events_skipped: 0,
        scanned_to_block: None,
        complete: false,
    };

    for (from, to) in windows {
        if cancel.is_cancelled() {
            log::info!(
                "Scan of {} on chain {} cancelled before block {}",
                owner,
                chain_id,
                from
            );
            finish(conn, &owner, chain_id, SCAN_STATUS_CANCELLED, None).await?;
            return Err(AllowanceError::Cancelled);
        }
        match scan_window(conn, client, setup, wallet, from, to).await {
            Ok(stats) => {
                report.windows_scanned += 1;
                report.events_stored += stats.stored;
                report.events_ignored += stats.ignored;
                report.events_skipped += stats.skipped;
                report.scanned_to_block = Some(to);
            }
            Err(err) => {
                log::error!(
                    "Scan of {} on chain {} failed at window [{}, {}]: {}",
                    owner,
                    chain_id,
                    from,
                    to,
                    err
                );
                finish(conn, &owner, chain_id, SCAN_STATUS_FAILED, Some(&err.to_string()))
                    .await?;
                return Err(err);
            }
        }
    }

    finish(conn, &owner, chain_id, SCAN_STATUS_COMPLETE, None).await?;
    report.complete = true;
    log::info!(
        "Scan of {} on chain {} complete: {} events stored, {} skipped",
        owner,
        chain_id,
        report.events_stored,
        report.events_skipped
    );
    Ok(report)
}

/// Scans the wallet on the given chains, or every enabled chain, one chain
/// at a time. A failing chain does not stop the others.
pub async fn scan_wallet_on_all_chains(
    conn: &Mutex<SqliteConnection>,
    provider: &dyn ChainClientProvider,
    setup: &ScanSetup,
    wallet: Address,
    chain_ids: Option<Vec<u64>>,
    cancel: &CancellationToken,
) -> Vec<ChainScanResult> {
    let chain_ids = chain_ids.unwrap_or_else(|| setup.enabled_chain_ids());
    let mut results = Vec::with_capacity(chain_ids.len());
    for chain_id in chain_ids {
        if cancel.is_cancelled() {
            results.push(ChainScanResult::failed(chain_id, &AllowanceError::Cancelled));
            continue;
        }
        let res = match provider.client(setup, chain_id) {
            Ok(client) => scan_wallet(conn, client.as_ref(), setup, wallet, cancel).await,
            Err(err) => Err(err),
        };
        match res {
            Ok(report) => results.push(ChainScanResult {
                chain_id,
                report: Some(report),
                error: None,
                transient: false,
            }),
            Err(err) => {
                if err.is_configuration() {
                    log::error!("Chain {} is misconfigured: {}", chain_id, err);
                }
                results.push(ChainScanResult::failed(chain_id, &err));
            }
        }
    }
    results
}

impl ChainScanResult {
    fn failed(chain_id: u64, err: &AllowanceError) -> Self {
        ChainScanResult {
            chain_id,
            report: None,
            error: Some(err.to_string()),
            transient: err.is_transient(),
        }
    }
}
