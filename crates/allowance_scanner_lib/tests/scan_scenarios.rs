mod common;

use allowance_scanner_lib::db::create_sqlite_connection;
use allowance_scanner_lib::db::model::*;
use allowance_scanner_lib::db::ops::*;
use allowance_scanner_lib::error::AllowanceError;
use allowance_scanner_lib::events::{APPROVAL_FOR_ALL_TOPIC, APPROVAL_TOPIC};
use allowance_scanner_lib::scanner::{scan_wallet, scan_wallet_on_all_chains};
use allowance_scanner_lib::utils::address_to_db;
use common::*;
use sqlx::SqliteConnection;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use web3::types::{Bytes, U256};

async fn memory_db() -> Mutex<SqliteConnection> {
    Mutex::new(create_sqlite_connection(None, true).await.unwrap())
}

async fn stored(conn: &Mutex<SqliteConnection>, owner: u64) -> Vec<AllowanceDao> {
    let mut conn = conn.lock().await;
    get_allowances_by_owner(&mut conn, &address_to_db(addr(owner)))
        .await
        .unwrap()
}

async fn coverage(conn: &Mutex<SqliteConnection>, owner: u64) -> Vec<ScanProgressDao> {
    let mut conn = conn.lock().await;
    get_scan_progress(&mut conn, &address_to_db(addr(owner)))
        .await
        .unwrap()
}

const OWNER: u64 = 0xaa;
const TOKEN: u64 = 0xcc;
const NFT: u64 = 0xdd;

#[tokio::test]
async fn fresh_wallet_is_scanned_in_three_windows_per_event_shape() {
    let setup = test_setup();
    let conn = memory_db().await;
    let chain = ScriptedChain::new(1, 120_000, vec![]);

    let report = scan_wallet(&conn, chain.as_ref(), &setup, addr(OWNER), &CancellationToken::new())
        .await
        .unwrap();

    let expected = vec![(0, 49_999), (50_000, 99_999), (100_000, 120_000)];
    assert_eq!(chain.ranges_for(*APPROVAL_TOPIC), expected);
    assert_eq!(chain.ranges_for(*APPROVAL_FOR_ALL_TOPIC), expected);
    assert_eq!(chain.queries().len(), 6);
    assert!(report.complete);
    assert_eq!(report.windows_scanned, 3);
    assert_eq!(report.scanned_to_block, Some(120_000));

    let progress = coverage(&conn, OWNER).await;
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].status, SCAN_STATUS_COMPLETE);
    assert_eq!(progress[0].scanned_to_block, Some(120_000));
    assert_eq!(progress[0].target_block, Some(120_000));
}

#[tokio::test]
async fn revocation_after_unlimited_approval_wins() {
    let setup = test_setup();
    let conn = memory_db().await;
    // provider returns the newer log first
    let chain = ScriptedChain::new(
        1,
        120_000,
        vec![
            approval(addr(TOKEN), addr(OWNER), addr(0xb1), U256::zero(), 2000),
            approval(addr(TOKEN), addr(OWNER), addr(0xb1), U256::MAX, 1000),
        ],
    );

    scan_wallet(&conn, chain.as_ref(), &setup, addr(OWNER), &CancellationToken::new())
        .await
        .unwrap();

    let rows = stored(&conn, OWNER).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].amount, "0");
    assert!(!rows[0].is_unlimited);
    assert_eq!(rows[0].last_seen_block, 2000);
    assert_eq!(rows[0].kind, "per-token");
    assert_eq!(rows[0].standard, "ERC20");
    assert_eq!(rows[0].spender, address_to_db(addr(0xb1)));
}

#[tokio::test]
async fn rescanning_unchanged_chain_is_a_no_op() {
    let setup = test_setup();
    let conn = memory_db().await;
    let chain = ScriptedChain::new(
        1,
        120_000,
        vec![
            approval(addr(TOKEN), addr(OWNER), addr(0xb1), U256::MAX, 1000),
            approval(addr(TOKEN), addr(OWNER), addr(0xb2), U256::from(5), 70_000),
            approval_for_all(addr(NFT), addr(OWNER), addr(0xb3), true, 110_000),
        ],
    );
    let cancel = CancellationToken::new();

    scan_wallet(&conn, chain.as_ref(), &setup, addr(OWNER), &cancel)
        .await
        .unwrap();
    let first = stored(&conn, OWNER).await;
    scan_wallet(&conn, chain.as_ref(), &setup, addr(OWNER), &cancel)
        .await
        .unwrap();
    let second = stored(&conn, OWNER).await;

    assert_eq!(first.len(), 3);
    let key = |r: &AllowanceDao| {
        (
            r.id,
            r.spender.clone(),
            r.amount.clone(),
            r.is_unlimited,
            r.last_seen_block,
        )
    };
    assert_eq!(
        first.iter().map(key).collect::<Vec<_>>(),
        second.iter().map(key).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn last_seen_block_is_the_latest_event_across_windows() {
    let setup = test_setup();
    let conn = memory_db().await;
    let chain = ScriptedChain::new(
        1,
        120_000,
        vec![
            approval(addr(TOKEN), addr(OWNER), addr(0xb1), U256::from(7), 100_500),
            approval(addr(TOKEN), addr(OWNER), addr(0xb1), U256::from(3), 500),
        ],
    );

    scan_wallet(&conn, chain.as_ref(), &setup, addr(OWNER), &CancellationToken::new())
        .await
        .unwrap();

    let rows = stored(&conn, OWNER).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].last_seen_block, 100_500);
    assert_eq!(rows[0].amount, "7");
}

#[tokio::test]
async fn operator_grant_and_revoke() {
    let setup = test_setup();
    let conn = memory_db().await;
    let chain = ScriptedChain::new(
        1,
        10_000,
        vec![
            approval_for_all(addr(NFT), addr(OWNER), addr(0xb3), true, 100),
            approval_for_all(addr(NFT), addr(OWNER), addr(0xb4), true, 200),
            approval_for_all(addr(NFT), addr(OWNER), addr(0xb4), false, 300),
        ],
    );

    scan_wallet(&conn, chain.as_ref(), &setup, addr(OWNER), &CancellationToken::new())
        .await
        .unwrap();

    let rows = stored(&conn, OWNER).await;
    assert_eq!(rows.len(), 2);
    let granted = rows.iter().find(|r| r.spender == address_to_db(addr(0xb3))).unwrap();
    assert!(granted.is_unlimited);
    assert_eq!(granted.amount, U256::MAX.to_string());
    assert_eq!(granted.kind, "all-assets");
    let revoked = rows.iter().find(|r| r.spender == address_to_db(addr(0xb4))).unwrap();
    assert!(!revoked.is_unlimited);
    assert_eq!(revoked.amount, "0");
    assert_eq!(revoked.last_seen_block, 300);
}

#[tokio::test]
async fn operator_approval_takes_standard_from_cached_metadata() {
    let setup = test_setup();
    let conn = memory_db().await;
    let multi_token = 0xde;
    {
        let mut db = conn.lock().await;
        upsert_token_metadata(
            &mut db,
            &TokenMetadataDao {
                chain_id: 1,
                token_addr: address_to_db(addr(multi_token)),
                standard: "ERC1155".to_string(),
                name: Some("Items".to_string()),
                symbol: None,
                decimals: None,
                fetched_date: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();
    }
    let chain = ScriptedChain::new(
        1,
        10_000,
        vec![
            approval_for_all(addr(multi_token), addr(OWNER), addr(0xb3), true, 100),
            approval_for_all(addr(NFT), addr(OWNER), addr(0xb4), true, 200),
        ],
    );

    scan_wallet(&conn, chain.as_ref(), &setup, addr(OWNER), &CancellationToken::new())
        .await
        .unwrap();

    let rows = stored(&conn, OWNER).await;
    let standard_of = |token: u64| {
        rows.iter()
            .find(|r| r.token_addr == address_to_db(addr(token)))
            .map(|r| r.standard.clone())
            .unwrap()
    };
    assert_eq!(standard_of(multi_token), "ERC1155");
    assert_eq!(standard_of(NFT), "ERC721");
}

#[tokio::test]
async fn malformed_log_is_skipped_without_losing_the_window() {
    let setup = test_setup();
    let conn = memory_db().await;
    let mut broken = approval(addr(TOKEN), addr(OWNER), addr(0xb9), U256::one(), 20);
    broken.data = Bytes(vec![1, 2, 3]);
    let chain = ScriptedChain::new(
        1,
        1000,
        vec![
            broken,
            approval(addr(TOKEN), addr(OWNER), addr(0xb1), U256::from(10), 30),
        ],
    );

    let report = scan_wallet(&conn, chain.as_ref(), &setup, addr(OWNER), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.events_skipped, 1);
    assert_eq!(report.events_stored, 1);
    let rows = stored(&conn, OWNER).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].spender, address_to_db(addr(0xb1)));
}

#[tokio::test]
async fn failed_window_keeps_earlier_windows_and_watermark() {
    let setup = test_setup();
    let conn = memory_db().await;
    let chain = ScriptedChain::new(
        1,
        120_000,
        vec![
            approval(addr(TOKEN), addr(OWNER), addr(0xb1), U256::from(1), 10_000),
            approval(addr(TOKEN), addr(OWNER), addr(0xb2), U256::from(2), 60_000),
        ],
    );
    chain.fail_from(Some(50_000));

    let err = scan_wallet(&conn, chain.as_ref(), &setup, addr(OWNER), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AllowanceError::Timeout(_)));
    assert!(err.is_transient());

    let rows = stored(&conn, OWNER).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].spender, address_to_db(addr(0xb1)));
    let progress = coverage(&conn, OWNER).await;
    assert_eq!(progress[0].status, SCAN_STATUS_FAILED);
    assert_eq!(progress[0].scanned_to_block, Some(49_999));
    assert!(progress[0].error.is_some());

    chain.fail_from(None);
    let report = scan_wallet(&conn, chain.as_ref(), &setup, addr(OWNER), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.complete);
    assert_eq!(stored(&conn, OWNER).await.len(), 2);
    let progress = coverage(&conn, OWNER).await;
    assert_eq!(progress[0].status, SCAN_STATUS_COMPLETE);
    assert_eq!(progress[0].scanned_to_block, Some(120_000));
    assert_eq!(progress[0].error, None);
}

#[tokio::test]
async fn cancellation_stops_before_the_next_window() {
    let setup = test_setup();
    let conn = memory_db().await;
    let chain = ScriptedChain::new(
        1,
        120_000,
        vec![approval(addr(TOKEN), addr(OWNER), addr(0xb1), U256::from(1), 10)],
    );
    let cancel = CancellationToken::new();
    // both queries of the first window
    *chain.cancel_after.lock().unwrap() = Some((2, cancel.clone()));

    let err = scan_wallet(&conn, chain.as_ref(), &setup, addr(OWNER), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AllowanceError::Cancelled));
    assert_eq!(chain.queries().len(), 2);
    assert_eq!(stored(&conn, OWNER).await.len(), 1);
    let progress = coverage(&conn, OWNER).await;
    assert_eq!(progress[0].status, SCAN_STATUS_CANCELLED);
    assert_eq!(progress[0].scanned_to_block, Some(49_999));
}

#[tokio::test]
async fn all_chains_scan_reports_each_chain() {
    let setup = test_setup();
    let conn = memory_db().await;
    let mainnet = ScriptedChain::new(
        1,
        1000,
        vec![approval(addr(TOKEN), addr(OWNER), addr(0xb1), U256::MAX, 10)],
    );
    let polygon = ScriptedChain::new(137, 1000, vec![]);
    polygon.break_tip("all endpoints down");
    let provider = ScriptedProvider::with(vec![mainnet.clone(), polygon.clone()]);

    let results = scan_wallet_on_all_chains(
        &conn,
        &provider,
        &setup,
        addr(OWNER),
        None,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chain_id, 1);
    assert!(results[0].report.as_ref().unwrap().complete);
    assert_eq!(results[1].chain_id, 137);
    assert!(results[1].report.is_none());
    assert!(results[1].transient);
    assert_eq!(stored(&conn, OWNER).await.len(), 1);

    let results = scan_wallet_on_all_chains(
        &conn,
        &provider,
        &setup,
        addr(OWNER),
        Some(vec![5]),
        &CancellationToken::new(),
    )
    .await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].transient);
    assert!(results[0].error.is_some());
}
