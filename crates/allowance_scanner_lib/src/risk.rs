use crate::db::model::AllowanceDao;
use crate::db::ops::*;
use crate::error::AllowanceError;
use crate::retry::call_with_retry;
use crate::rpc::ChainClientProvider;
use crate::setup::ScanSetup;
use crate::utils::address_to_db;
use crate::err_from;
use serde::Serialize;
use sqlx::{Connection, SqliteConnection};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use web3::types::Address;

pub const FLAG_UNLIMITED: &str = "UNLIMITED";
pub const FLAG_STALE: &str = "STALE";
pub const UNLIMITED_WEIGHT: i64 = 50;
pub const STALE_WEIGHT: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskAssessment {
    pub score: i64,
    pub flags: Vec<&'static str>,
}

impl RiskAssessment {
    pub fn flags_to_db(&self) -> String {
        self.flags.join(",")
    }
}

/// Stored amounts are canonical decimal strings, so zero is exactly "0".
fn amount_is_positive(amount: &str) -> bool {
    !amount.is_empty() && amount.bytes().any(|b| b != b'0')
}

/// Scores one permission against the chain tip.
///
/// Stale means more than `stale_threshold` blocks since the permission was
/// last observed while a non-zero amount is still granted. A tip below the
/// stored block (lagging endpoint) is never stale.
pub fn assess(
    amount: &str,
    is_unlimited: bool,
    last_seen_block: u64,
    tip: u64,
    stale_threshold: u64,
) -> RiskAssessment {
    let mut assessment = RiskAssessment {
        score: 0,
        flags: vec![],
    };
    if is_unlimited {
        assessment.score += UNLIMITED_WEIGHT;
        assessment.flags.push(FLAG_UNLIMITED);
    }
    let stale = tip.saturating_sub(last_seen_block) > stale_threshold;
    if stale && amount_is_positive(amount) {
        assessment.score += STALE_WEIGHT;
        assessment.flags.push(FLAG_STALE);
    }
    assessment
}

pub fn assess_row(row: &AllowanceDao, tip: u64, stale_threshold: u64) -> RiskAssessment {
    assess(
        &row.amount,
        row.is_unlimited,
        row.last_seen_block.max(0) as u64,
        tip,
        stale_threshold,
    )
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskRefreshReport {
    pub rows_updated: usize,
    pub rows_skipped: usize,
    pub tips: BTreeMap<u64, u64>,
    /// Chains whose rows kept their previous score, with the reason.
    pub failed_chains: BTreeMap<u64, String>,
}

/// Recomputes flags and score of every stored permission of the wallet.
///
/// The tip of each distinct chain is fetched once. Rows on a chain whose
/// tip cannot be fetched, or that is no longer configured, are left as
/// they are and reported in `failed_chains`.
pub async fn refresh_risk_for_wallet(
    conn: &Mutex<SqliteConnection>,
    provider: &dyn ChainClientProvider,
    setup: &ScanSetup,
    wallet: Address,
) -> Result<RiskRefreshReport, AllowanceError> {
    let owner = address_to_db(wallet);
    let rows = {
        let mut conn = conn.lock().await;
        get_allowances_by_owner(&mut conn, &owner)
            .await
            .map_err(err_from!())?
    };

    let mut by_chain: BTreeMap<u64, Vec<AllowanceDao>> = BTreeMap::new();
    for row in rows {
        by_chain.entry(row.chain_id as u64).or_default().push(row);
    }

    let mut report = RiskRefreshReport::default();
    let mut updates = Vec::new();
    for (chain_id, rows) in by_chain {
        let threshold = match setup.get_chain_setup(chain_id) {
            Ok(chain) => chain.stale_threshold_blocks,
            Err(err) => {
                report.rows_skipped += rows.len();
                report.failed_chains.insert(chain_id, err.to_string());
                continue;
            }
        };
        let tip = match fetch_tip(provider, setup, chain_id).await {
            Ok(tip) => tip,
            Err(err) => {
                log::warn!(
                    "Risk refresh of {} skips chain {}: {}",
                    owner,
                    chain_id,
                    err
                );
                report.rows_skipped += rows.len();
                report.failed_chains.insert(chain_id, err.to_string());
                continue;
            }
        };
        report.tips.insert(chain_id, tip);
        for row in rows {
            let assessment = assess_row(&row, tip, threshold);
            updates.push((row.id, assessment));
        }
    }

    let mut conn = conn.lock().await;
    let mut db_transaction = conn.begin().await.map_err(err_from!())?;
    for (id, assessment) in &updates {
        update_allowance_risk(
            &mut db_transaction,
            *id,
            assessment.score,
            &assessment.flags_to_db(),
        )
        .await
        .map_err(err_from!())?;
    }
    db_transaction.commit().await.map_err(err_from!())?;
    report.rows_updated = updates.len();

    log::info!(
        "Risk refreshed for {}: {} rows updated, {} skipped",
        owner,
        report.rows_updated,
        report.rows_skipped
    );
    Ok(report)
}

async fn fetch_tip(
    provider: &dyn ChainClientProvider,
    setup: &ScanSetup,
    chain_id: u64,
) -> Result<u64, AllowanceError> {
    let client = provider.client(setup, chain_id)?;
    call_with_retry(
        &setup.retry_policy(),
        setup.request_timeout(),
        &format!("eth_blockNumber on chain {}", chain_id),
        || client.block_number(),
    )
    .await
}
