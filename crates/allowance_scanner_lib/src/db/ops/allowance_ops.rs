use crate::db::model::*;
use crate::setup::MAX_PAGE_SIZE;
use sqlx::SqliteConnection;

/// Only rows that are unlimited or already carry a risk score.
pub const ALLOWANCE_FILTER_RISKY: &str = "(is_unlimited = 1 OR risk_score > 0)";
pub const ALLOWANCE_FILTER_ALL: &str = "(id >= 0)";
/// Amounts are decimal strings without leading zeros, so longer is larger.
pub const ALLOWANCE_ORDER_BY_RISK: &str =
    "is_unlimited DESC, length(amount) DESC, amount DESC, id ASC";

/// Inserts the observation or merges it into the stored row.
///
/// The stored row is only replaced by observations from the same or a later
/// block, so `last_seen_block` never moves backwards. A changed amount clears
/// the stored risk score and flags until the next risk refresh. Returns
/// whether the row was written.
pub async fn upsert_allowance(
    conn: &mut SqliteConnection,
    observation: &AllowanceObservation,
) -> Result<bool, sqlx::Error> {
    let now = chrono::Utc::now();
    let res = sqlx::query(
        r"INSERT INTO allowance
(owner, chain_id, token_addr, spender, kind, standard, amount, is_unlimited, last_seen_block, created_date, updated_date)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
ON CONFLICT(owner, chain_id, token_addr, spender, kind) DO UPDATE SET
standard = excluded.standard,
amount = excluded.amount,
is_unlimited = excluded.is_unlimited,
last_seen_block = excluded.last_seen_block,
updated_date = excluded.updated_date,
risk_score = CASE WHEN allowance.amount = excluded.amount THEN allowance.risk_score ELSE 0 END,
risk_flags = CASE WHEN allowance.amount = excluded.amount THEN allowance.risk_flags ELSE '' END,
risk_date = CASE WHEN allowance.amount = excluded.amount THEN allowance.risk_date ELSE NULL END
WHERE excluded.last_seen_block >= allowance.last_seen_block
",
    )
    .bind(&observation.owner)
    .bind(observation.chain_id)
    .bind(&observation.token_addr)
    .bind(&observation.spender)
    .bind(&observation.kind)
    .bind(&observation.standard)
    .bind(&observation.amount)
    .bind(observation.is_unlimited)
    .bind(observation.last_seen_block)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn list_allowances(
    conn: &mut SqliteConnection,
    owner: &str,
    risk_only: bool,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Vec<AllowanceDao>, sqlx::Error> {
    let limit = limit.unwrap_or(MAX_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    let filter = if risk_only {
        ALLOWANCE_FILTER_RISKY
    } else {
        ALLOWANCE_FILTER_ALL
    };
    let rows = sqlx::query_as::<_, AllowanceDao>(
        format!(
            r"SELECT * FROM allowance WHERE owner = $1 AND {} ORDER BY {} LIMIT $2 OFFSET $3",
            filter, ALLOWANCE_ORDER_BY_RISK
        )
        .as_str(),
    )
    .bind(owner)
    .bind(limit)
    .bind(offset)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Every row of the owner, unpaged. Used by the risk refresh.
pub async fn get_allowances_by_owner(
    conn: &mut SqliteConnection,
    owner: &str,
) -> Result<Vec<AllowanceDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AllowanceDao>(
        r"SELECT * FROM allowance WHERE owner = $1 ORDER BY chain_id, id",
    )
    .bind(owner)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn find_allowance(
    conn: &mut SqliteConnection,
    owner: &str,
    chain_id: i64,
    token_addr: &str,
    spender: &str,
    kind: &str,
) -> Result<Option<AllowanceDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, AllowanceDao>(
        r"SELECT * FROM allowance
WHERE
owner = $1 AND
chain_id = $2 AND
token_addr = $3 AND
spender = $4 AND
kind = $5
",
    )
    .bind(owner)
    .bind(chain_id)
    .bind(token_addr)
    .bind(spender)
    .bind(kind)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn update_allowance_risk(
    conn: &mut SqliteConnection,
    allowance_id: i64,
    risk_score: i64,
    risk_flags: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"UPDATE allowance SET
risk_score = $2,
risk_flags = $3,
risk_date = $4
WHERE id = $1
",
    )
    .bind(allowance_id)
    .bind(risk_score)
    .bind(risk_flags)
    .bind(chrono::Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

/// Sets the standard of every all-assets row of one token collection.
pub async fn update_all_assets_standard(
    conn: &mut SqliteConnection,
    chain_id: i64,
    token_addr: &str,
    standard: &str,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        r"UPDATE allowance SET
standard = $3
WHERE chain_id = $1 AND token_addr = $2 AND kind = 'all-assets' AND standard <> $3
",
    )
    .bind(chain_id)
    .bind(token_addr)
    .bind(standard)
    .execute(conn)
    .await?;
    Ok(res.rows_affected())
}

pub async fn get_allowance_count(
    conn: &mut SqliteConnection,
    owner: &str,
    risk_only: bool,
) -> Result<usize, sqlx::Error> {
    let filter = if risk_only {
        ALLOWANCE_FILTER_RISKY
    } else {
        ALLOWANCE_FILTER_ALL
    };
    let count = sqlx::query_scalar::<_, i64>(
        format!(
            r"SELECT COUNT(*) FROM allowance WHERE owner = $1 AND {}",
            filter
        )
        .as_str(),
    )
    .bind(owner)
    .fetch_one(conn)
    .await?;
    Ok(count as usize)
}
