use crate::db::create_sqlite_connection;
use crate::db::model::{AllowanceDao, ScanProgressDao, SpenderLabelDao, TokenMetadataDao};
use crate::db::ops::*;
use crate::error::AllowanceError;
use crate::metadata::{get_spender_info, get_token_metadata_cached, seed_spender_labels};
use crate::risk::{refresh_risk_for_wallet, RiskRefreshReport};
use crate::rpc::{ChainClientProvider, RpcPool};
use crate::scanner::{scan_wallet_on_all_chains, ChainScanResult};
use crate::setup::ScanSetup;
use crate::utils::address_to_db;
use crate::err_from;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use web3::types::Address;

pub const JOB_STATUS_RUNNING: &str = "running";
pub const JOB_STATUS_FINISHED: &str = "finished";
/// Finished jobs are kept this long for polling.
pub const JOB_RETENTION_MINUTES: i64 = 60;
/// Upper bound of finished jobs kept at once.
pub const MAX_FINISHED_JOBS: usize = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    pub id: String,
    pub wallet: String,
    pub chain_ids: Option<Vec<u64>>,
    pub status: String,
    pub results: Vec<ChainScanResult>,
    pub started_date: DateTime<Utc>,
    pub finished_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct SharedState {
    pub jobs: BTreeMap<String, ScanJob>,
}

impl SharedState {
    /// Drops finished jobs older than the retention period, then the oldest
    /// finished jobs above the cap. Running jobs are never dropped.
    pub fn prune_finished_jobs(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        let cutoff = now - chrono::Duration::minutes(JOB_RETENTION_MINUTES);
        self.jobs
            .retain(|_, job| job.finished_date.map(|d| d >= cutoff).unwrap_or(true));

        let mut finished: Vec<(DateTime<Utc>, String)> = self
            .jobs
            .values()
            .filter_map(|job| job.finished_date.map(|d| (d, job.id.clone())))
            .collect();
        if finished.len() > MAX_FINISHED_JOBS {
            finished.sort();
            let excess = finished.len() - MAX_FINISHED_JOBS;
            for (_, id) in finished.into_iter().take(excess) {
                self.jobs.remove(&id);
            }
        }
        let removed = before - self.jobs.len();
        if removed > 0 {
            log::debug!("Pruned {} finished scan jobs", removed);
        }
        removed
    }
}

/// Everything a caller needs to drive the engine, shared between the CLI
/// and the HTTP server.
#[derive(Clone)]
pub struct AllowanceRuntime {
    pub setup: ScanSetup,
    pub provider: Arc<dyn ChainClientProvider>,
    pub conn: Arc<Mutex<SqliteConnection>>,
    pub shared_state: Arc<Mutex<SharedState>>,
    pub cancel: CancellationToken,
}

pub async fn start_allowance_engine(
    setup: ScanSetup,
    db_filename: Option<&str>,
) -> Result<AllowanceRuntime, AllowanceError> {
    setup.validate()?;
    log::debug!("Starting allowance engine: {:#?}", setup);

    match db_filename {
        Some(file) => log::info!("connecting to sqlite file db: {}", file),
        None => log::info!("using in-memory sqlite db"),
    }
    let conn = create_sqlite_connection(db_filename, true).await?;
    let provider = Arc::new(RpcPool::from_setup(&setup));
    AllowanceRuntime::new(setup, conn, provider).await
}

impl AllowanceRuntime {
    pub async fn new(
        setup: ScanSetup,
        mut conn: SqliteConnection,
        provider: Arc<dyn ChainClientProvider>,
    ) -> Result<Self, AllowanceError> {
        seed_spender_labels(&mut conn, &setup).await?;
        Ok(AllowanceRuntime {
            setup,
            provider,
            conn: Arc::new(Mutex::new(conn)),
            shared_state: Arc::new(Mutex::new(SharedState::default())),
            cancel: CancellationToken::new(),
        })
    }

    pub async fn scan(&self, wallet: Address, chain_ids: Option<Vec<u64>>) -> Vec<ChainScanResult> {
        scan_wallet_on_all_chains(
            &self.conn,
            self.provider.as_ref(),
            &self.setup,
            wallet,
            chain_ids,
            &self.cancel,
        )
        .await
    }

    /// Runs the scan in the background and returns the job id to poll.
    pub async fn spawn_scan(&self, wallet: Address, chain_ids: Option<Vec<u64>>) -> String {
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = ScanJob {
            id: job_id.clone(),
            wallet: address_to_db(wallet),
            chain_ids: chain_ids.clone(),
            status: JOB_STATUS_RUNNING.to_string(),
            results: vec![],
            started_date: Utc::now(),
            finished_date: None,
        };
        {
            let mut state = self.shared_state.lock().await;
            state.prune_finished_jobs(Utc::now());
            state.jobs.insert(job_id.clone(), job);
        }

        let runtime = self.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            let results = runtime.scan(wallet, chain_ids).await;
            let mut state = runtime.shared_state.lock().await;
            if let Some(job) = state.jobs.get_mut(&id) {
                job.status = JOB_STATUS_FINISHED.to_string();
                job.results = results;
                job.finished_date = Some(Utc::now());
            }
            log::info!("Scan job {} finished", id);
        });
        job_id
    }

    pub async fn get_job(&self, job_id: &str) -> Option<ScanJob> {
        self.shared_state.lock().await.jobs.get(job_id).cloned()
    }

    pub async fn refresh_risk(&self, wallet: Address) -> Result<RiskRefreshReport, AllowanceError> {
        refresh_risk_for_wallet(&self.conn, self.provider.as_ref(), &self.setup, wallet).await
    }

    pub async fn list_allowances(
        &self,
        wallet: Address,
        risk_only: bool,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<(Vec<AllowanceDao>, usize), AllowanceError> {
        let owner = address_to_db(wallet);
        let mut conn = self.conn.lock().await;
        let rows = list_allowances(
            &mut conn,
            &owner,
            risk_only,
            Some(limit.unwrap_or(self.setup.page_size)),
            offset,
        )
        .await
        .map_err(err_from!())?;
        let total = get_allowance_count(&mut conn, &owner, risk_only)
            .await
            .map_err(err_from!())?;
        Ok((rows, total))
    }

    pub async fn coverage(&self, wallet: Address) -> Result<Vec<ScanProgressDao>, AllowanceError> {
        let mut conn = self.conn.lock().await;
        get_scan_progress(&mut conn, &address_to_db(wallet))
            .await
            .map_err(err_from!())
    }

    pub async fn token_metadata(
        &self,
        chain_id: u64,
        token: Address,
    ) -> Result<TokenMetadataDao, AllowanceError> {
        get_token_metadata_cached(&self.conn, self.provider.as_ref(), &self.setup, chain_id, token)
            .await
    }

    pub async fn spender_info(
        &self,
        chain_id: u64,
        spender: Address,
    ) -> Result<Option<SpenderLabelDao>, AllowanceError> {
        self.setup.get_chain_setup(chain_id)?;
        get_spender_info(&self.conn, chain_id, spender).await
    }

    /// Running scans stop before their next window.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
