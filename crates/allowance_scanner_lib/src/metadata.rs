//! Display metadata for tokens and spenders.
//!
//! Nothing here is authoritative for risk. Lookups that fail leave the
//! fields empty instead of failing the request.

use crate::db::model::{SpenderLabelDao, TokenMetadataDao};
use crate::db::ops::*;
use crate::error::AllowanceError;
use crate::events::TokenStandard;
use crate::retry::call_with_retry;
use crate::rpc::{ChainClient, ChainClientProvider};
use crate::setup::ScanSetup;
use crate::utils::address_to_db;
use crate::err_from;
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};
use sqlx::SqliteConnection;
use tokio::sync::Mutex;
use web3::ethabi::{ParamType, Token};
use web3::types::{Address, Bytes, CallRequest};

pub const ERC721_INTERFACE_ID: [u8; 4] = [0x80, 0xac, 0x58, 0xcd];
pub const ERC1155_INTERFACE_ID: [u8; 4] = [0xd9, 0xb6, 0x7a, 0x26];

lazy_static! {
    static ref SUPPORTS_INTERFACE: [u8; 4] = selector("supportsInterface(bytes4)");
    static ref NAME: [u8; 4] = selector("name()");
    static ref SYMBOL: [u8; 4] = selector("symbol()");
    static ref DECIMALS: [u8; 4] = selector("decimals()");
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn supports_interface_data(interface_id: [u8; 4]) -> Vec<u8> {
    let mut data = SUPPORTS_INTERFACE.to_vec();
    let mut arg = [0u8; 32];
    arg[..4].copy_from_slice(&interface_id);
    data.extend_from_slice(&arg);
    data
}

pub fn decode_bool(data: &[u8]) -> Option<bool> {
    match web3::ethabi::decode(&[ParamType::Bool], data).ok()?.as_slice() {
        [Token::Bool(value)] => Some(*value),
        _ => None,
    }
}

pub fn decode_decimals(data: &[u8]) -> Option<i64> {
    match web3::ethabi::decode(&[ParamType::Uint(8)], data).ok()?.as_slice() {
        [Token::Uint(value)] if *value <= 255.into() => Some(value.as_u64() as i64),
        _ => None,
    }
}

/// Decodes `name()`/`symbol()` results, which older tokens return as a
/// right-padded `bytes32` instead of a `string`.
pub fn decode_text(data: &[u8]) -> Option<String> {
    if let Ok(tokens) = web3::ethabi::decode(&[ParamType::String], data) {
        if let [Token::String(text)] = tokens.as_slice() {
            let text = text.trim_matches(char::from(0)).trim().to_string();
            return (!text.is_empty()).then_some(text);
        }
    }
    if data.len() == 32 {
        let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
        let text = std::str::from_utf8(&data[..end]).ok()?.trim().to_string();
        return (!text.is_empty()).then_some(text);
    }
    None
}

async fn call_token(
    client: &dyn ChainClient,
    setup: &ScanSetup,
    token: Address,
    data: Vec<u8>,
) -> Option<Vec<u8>> {
    let request = CallRequest {
        to: Some(token),
        data: Some(Bytes(data)),
        ..Default::default()
    };
    let label = format!("eth_call {:#x} on chain {}", token, client.chain_id());
    match call_with_retry(&setup.retry_policy(), setup.request_timeout(), &label, || {
        client.call(request.clone())
    })
    .await
    {
        Ok(bytes) => Some(bytes.0),
        Err(err) => {
            log::debug!("{} failed: {}", label, err);
            None
        }
    }
}

async fn supports_interface(
    client: &dyn ChainClient,
    setup: &ScanSetup,
    token: Address,
    interface_id: [u8; 4],
) -> bool {
    call_token(client, setup, token, supports_interface_data(interface_id))
        .await
        .and_then(|data| decode_bool(&data))
        .unwrap_or(false)
}

/// Queries the token contract directly, without the cache.
pub async fn fetch_token_metadata(
    client: &dyn ChainClient,
    setup: &ScanSetup,
    token: Address,
) -> TokenMetadataDao {
    let decimals = call_token(client, setup, token, DECIMALS.to_vec())
        .await
        .and_then(|data| decode_decimals(&data));

    let standard = if supports_interface(client, setup, token, ERC721_INTERFACE_ID).await {
        TokenStandard::Erc721
    } else if supports_interface(client, setup, token, ERC1155_INTERFACE_ID).await {
        TokenStandard::Erc1155
    } else if decimals.is_some() {
        TokenStandard::Erc20
    } else {
        TokenStandard::Unknown
    };

    let name = call_token(client, setup, token, NAME.to_vec())
        .await
        .and_then(|data| decode_text(&data));
    let symbol = call_token(client, setup, token, SYMBOL.to_vec())
        .await
        .and_then(|data| decode_text(&data));

    TokenMetadataDao {
        chain_id: client.chain_id() as i64,
        token_addr: address_to_db(token),
        standard: standard.as_str().to_string(),
        name,
        symbol,
        decimals: if standard == TokenStandard::Erc20 {
            decimals
        } else {
            None
        },
        fetched_date: chrono::Utc::now(),
    }
}

fn is_fresh(metadata: &TokenMetadataDao, ttl_days: i64) -> bool {
    chrono::Utc::now() - metadata.fetched_date < chrono::Duration::days(ttl_days)
}

fn resolved_anything(metadata: &TokenMetadataDao) -> bool {
    metadata.standard != TokenStandard::Unknown.as_str()
        || metadata.name.is_some()
        || metadata.symbol.is_some()
}

/// Cached token metadata, refetched once older than the configured TTL.
///
/// Only an unknown chain is an error. When the chain cannot be reached the
/// stale cache entry is returned if there is one, otherwise a row with
/// empty fields that is not cached.
pub async fn get_token_metadata_cached(
    conn: &Mutex<SqliteConnection>,
    provider: &dyn ChainClientProvider,
    setup: &ScanSetup,
    chain_id: u64,
    token: Address,
) -> Result<TokenMetadataDao, AllowanceError> {
    setup.get_chain_setup(chain_id)?;
    let token_db = address_to_db(token);
    let cached = {
        let mut conn = conn.lock().await;
        get_token_metadata(&mut conn, chain_id as i64, &token_db)
            .await
            .map_err(err_from!())?
    };
    if let Some(cached) = &cached {
        if is_fresh(cached, setup.metadata_ttl_days) {
            return Ok(cached.clone());
        }
    }

    let fetched = match provider.client(setup, chain_id) {
        Ok(client) => fetch_token_metadata(client.as_ref(), setup, token).await,
        Err(err) => {
            log::warn!("No client for metadata of {} on chain {}: {}", token_db, chain_id, err);
            TokenMetadataDao {
                chain_id: chain_id as i64,
                token_addr: token_db.clone(),
                standard: TokenStandard::Unknown.as_str().to_string(),
                name: None,
                symbol: None,
                decimals: None,
                fetched_date: chrono::Utc::now(),
            }
        }
    };

    if !resolved_anything(&fetched) {
        return Ok(cached.unwrap_or(fetched));
    }
    let mut conn = conn.lock().await;
    upsert_token_metadata(&mut conn, &fetched)
        .await
        .map_err(err_from!())?;
    if fetched.standard == TokenStandard::Erc721.as_str()
        || fetched.standard == TokenStandard::Erc1155.as_str()
    {
        let updated = update_all_assets_standard(
            &mut conn,
            fetched.chain_id,
            &fetched.token_addr,
            &fetched.standard,
        )
        .await
        .map_err(err_from!())?;
        if updated > 0 {
            log::info!(
                "Marked {} operator approvals of {} as {}",
                updated,
                fetched.token_addr,
                fetched.standard
            );
        }
    }
    Ok(fetched)
}

/// Loads the static allow-list into the label table.
pub async fn seed_spender_labels(
    conn: &mut SqliteConnection,
    setup: &ScanSetup,
) -> Result<usize, AllowanceError> {
    let now = chrono::Utc::now();
    for entry in &setup.spender_labels {
        upsert_spender_label(
            conn,
            &SpenderLabelDao {
                chain_id: entry.chain_id as i64,
                address: entry.address.clone(),
                label: entry.label.clone(),
                trust: entry.trust.clone(),
                updated_date: now,
            },
        )
        .await
        .map_err(err_from!())?;
    }
    if !setup.spender_labels.is_empty() {
        log::info!("Seeded {} spender labels", setup.spender_labels.len());
    }
    Ok(setup.spender_labels.len())
}

pub async fn get_spender_info(
    conn: &Mutex<SqliteConnection>,
    chain_id: u64,
    spender: Address,
) -> Result<Option<SpenderLabelDao>, AllowanceError> {
    let mut conn = conn.lock().await;
    get_spender_label(&mut conn, chain_id as i64, &address_to_db(spender))
        .await
        .map_err(err_from!())
}
