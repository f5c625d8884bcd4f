use crate::db::model::*;
use sqlx::SqliteConnection;

pub async fn start_scan_progress(
    conn: &mut SqliteConnection,
    owner: &str,
    chain_id: i64,
    target_block: i64,
) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now();
    sqlx::query(
        r"INSERT INTO scan_progress
(owner, chain_id, scanned_to_block, target_block, status, error, started_date, updated_date)
VALUES ($1, $2, NULL, $3, $4, NULL, $5, $5)
ON CONFLICT(owner, chain_id) DO UPDATE SET
target_block = excluded.target_block,
status = excluded.status,
error = NULL,
started_date = excluded.started_date,
updated_date = excluded.updated_date
",
    )
    .bind(owner)
    .bind(chain_id)
    .bind(target_block)
    .bind(SCAN_STATUS_RUNNING)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

/// Moves the coverage watermark forward. It never moves back: blocks
/// covered by an earlier run stay covered.
pub async fn update_scan_watermark(
    conn: &mut SqliteConnection,
    owner: &str,
    chain_id: i64,
    scanned_to_block: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"UPDATE scan_progress SET
scanned_to_block = MAX(COALESCE(scanned_to_block, -1), $3),
updated_date = $4
WHERE owner = $1 AND chain_id = $2
",
    )
    .bind(owner)
    .bind(chain_id)
    .bind(scanned_to_block)
    .bind(chrono::Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn finish_scan_progress(
    conn: &mut SqliteConnection,
    owner: &str,
    chain_id: i64,
    status: &str,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"UPDATE scan_progress SET
status = $3,
error = $4,
updated_date = $5
WHERE owner = $1 AND chain_id = $2
",
    )
    .bind(owner)
    .bind(chain_id)
    .bind(status)
    .bind(error)
    .bind(chrono::Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_scan_progress(
    conn: &mut SqliteConnection,
    owner: &str,
) -> Result<Vec<ScanProgressDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ScanProgressDao>(
        r"SELECT * FROM scan_progress WHERE owner = $1 ORDER BY chain_id",
    )
    .bind(owner)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}
