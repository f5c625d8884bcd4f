use crate::db::model::*;
use sqlx::SqliteConnection;

pub async fn get_token_metadata(
    conn: &mut SqliteConnection,
    chain_id: i64,
    token_addr: &str,
) -> Result<Option<TokenMetadataDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, TokenMetadataDao>(
        r"SELECT * FROM token_metadata WHERE chain_id = $1 AND token_addr = $2",
    )
    .bind(chain_id)
    .bind(token_addr)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn upsert_token_metadata(
    conn: &mut SqliteConnection,
    metadata: &TokenMetadataDao,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"INSERT INTO token_metadata
(chain_id, token_addr, standard, name, symbol, decimals, fetched_date)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT(chain_id, token_addr) DO UPDATE SET
standard = excluded.standard,
name = excluded.name,
symbol = excluded.symbol,
decimals = excluded.decimals,
fetched_date = excluded.fetched_date
",
    )
    .bind(metadata.chain_id)
    .bind(&metadata.token_addr)
    .bind(&metadata.standard)
    .bind(&metadata.name)
    .bind(&metadata.symbol)
    .bind(metadata.decimals)
    .bind(metadata.fetched_date)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_spender_label(
    conn: &mut SqliteConnection,
    chain_id: i64,
    address: &str,
) -> Result<Option<SpenderLabelDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, SpenderLabelDao>(
        r"SELECT * FROM spender_label WHERE chain_id = $1 AND address = $2",
    )
    .bind(chain_id)
    .bind(address)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn upsert_spender_label(
    conn: &mut SqliteConnection,
    label: &SpenderLabelDao,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"INSERT INTO spender_label
(chain_id, address, label, trust, updated_date)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT(chain_id, address) DO UPDATE SET
label = excluded.label,
trust = excluded.trust,
updated_date = excluded.updated_date
",
    )
    .bind(label.chain_id)
    .bind(&label.address)
    .bind(&label.label)
    .bind(&label.trust)
    .bind(label.updated_date)
    .execute(conn)
    .await?;
    Ok(())
}
