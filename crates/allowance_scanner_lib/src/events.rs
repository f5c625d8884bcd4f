use crate::db::model::AllowanceObservation;
use crate::error::AllowanceError;
use crate::utils::{address_to_db, is_max_u256, topic_to_address};
use lazy_static::lazy_static;
use serde::Serialize;
use sha3::{Digest, Keccak256};
use std::fmt;
use web3::types::{Address, Log, H256, U256};

lazy_static! {
    /// `Approval(address indexed owner, address indexed spender, uint256 value)`
    pub static ref APPROVAL_TOPIC: H256 = event_topic("Approval(address,address,uint256)");
    /// `ApprovalForAll(address indexed owner, address indexed operator, bool approved)`
    pub static ref APPROVAL_FOR_ALL_TOPIC: H256 =
        event_topic("ApprovalForAll(address,address,bool)");
}

pub fn event_topic(signature: &str) -> H256 {
    H256::from_slice(Keccak256::digest(signature.as_bytes()).as_slice())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PermissionKind {
    #[serde(rename = "per-token")]
    PerToken,
    #[serde(rename = "all-assets")]
    AllAssets,
}

impl PermissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::PerToken => "per-token",
            PermissionKind::AllAssets => "all-assets",
        }
    }

    pub fn topic(&self) -> H256 {
        match self {
            PermissionKind::PerToken => *APPROVAL_TOPIC,
            PermissionKind::AllAssets => *APPROVAL_FOR_ALL_TOPIC,
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenStandard {
    #[serde(rename = "ERC20")]
    Erc20,
    #[serde(rename = "ERC721")]
    Erc721,
    #[serde(rename = "ERC1155")]
    Erc1155,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl TokenStandard {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStandard::Erc20 => "ERC20",
            TokenStandard::Erc721 => "ERC721",
            TokenStandard::Erc1155 => "ERC1155",
            TokenStandard::Unknown => "UNKNOWN",
        }
    }
}

/// A decoded permission-granting log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowanceEvent {
    PerTokenGrant {
        token: Address,
        owner: Address,
        spender: Address,
        value: U256,
        block: u64,
    },
    AllAssetsGrant {
        token: Address,
        owner: Address,
        operator: Address,
        approved: bool,
        block: u64,
    },
}

impl AllowanceEvent {
    pub fn block(&self) -> u64 {
        match self {
            AllowanceEvent::PerTokenGrant { block, .. } => *block,
            AllowanceEvent::AllAssetsGrant { block, .. } => *block,
        }
    }

    pub fn kind(&self) -> PermissionKind {
        match self {
            AllowanceEvent::PerTokenGrant { .. } => PermissionKind::PerToken,
            AllowanceEvent::AllAssetsGrant { .. } => PermissionKind::AllAssets,
        }
    }

    pub fn to_observation(&self, chain_id: u64) -> AllowanceObservation {
        match self {
            AllowanceEvent::PerTokenGrant {
                token,
                owner,
                spender,
                value,
                block,
            } => AllowanceObservation {
                owner: address_to_db(*owner),
                chain_id: chain_id as i64,
                token_addr: address_to_db(*token),
                spender: address_to_db(*spender),
                kind: PermissionKind::PerToken.as_str().to_string(),
                standard: TokenStandard::Erc20.as_str().to_string(),
                amount: value.to_string(),
                is_unlimited: is_max_u256(value),
                last_seen_block: *block as i64,
            },
            AllowanceEvent::AllAssetsGrant {
                token,
                owner,
                operator,
                approved,
                block,
            } => {
                let amount = if *approved { U256::MAX } else { U256::zero() };
                AllowanceObservation {
                    owner: address_to_db(*owner),
                    chain_id: chain_id as i64,
                    token_addr: address_to_db(*token),
                    spender: address_to_db(*operator),
                    kind: PermissionKind::AllAssets.as_str().to_string(),
                    standard: TokenStandard::Erc721.as_str().to_string(),
                    amount: amount.to_string(),
                    is_unlimited: *approved,
                    last_seen_block: *block as i64,
                }
            }
        }
    }
}

fn malformed(log: &Log, reason: &str) -> AllowanceError {
    AllowanceError::DecodeError(format!(
        "{} (tx {:?}, log index {:?})",
        reason, log.transaction_hash, log.log_index
    ))
}

fn log_block(log: &Log) -> Result<u64, AllowanceError> {
    log.block_number
        .map(|b| b.as_u64())
        .ok_or_else(|| malformed(log, "missing block number"))
}

fn indexed_address(log: &Log, idx: usize) -> Result<Address, AllowanceError> {
    let topic = log
        .topics
        .get(idx)
        .ok_or_else(|| malformed(log, "missing indexed topic"))?;
    topic_to_address(topic).map_err(|e| malformed(log, &e.msg))
}

/// Decodes an `Approval` log.
///
/// Returns `Ok(None)` for logs that are valid but carry no standing
/// allowance: reorged-out logs and the four-topic ERC-721 single token
/// approval.
pub fn decode_approval(log: &Log) -> Result<Option<AllowanceEvent>, AllowanceError> {
    if log.removed == Some(true) {
        return Ok(None);
    }
    if log.topics.first() != Some(&*APPROVAL_TOPIC) {
        return Err(malformed(log, "not an Approval log"));
    }
    match log.topics.len() {
        3 => {}
        4 => return Ok(None),
        _ => return Err(malformed(log, "unexpected Approval topic count")),
    }
    if log.data.0.len() != 32 {
        return Err(malformed(
            log,
            &format!(
                "Approval value must be one 32 byte word, got 0x{}",
                hex::encode(&log.data.0)
            ),
        ));
    }
    Ok(Some(AllowanceEvent::PerTokenGrant {
        token: log.address,
        owner: indexed_address(log, 1)?,
        spender: indexed_address(log, 2)?,
        value: U256::from_big_endian(&log.data.0),
        block: log_block(log)?,
    }))
}

pub fn decode_approval_for_all(log: &Log) -> Result<Option<AllowanceEvent>, AllowanceError> {
    if log.removed == Some(true) {
        return Ok(None);
    }
    if log.topics.first() != Some(&*APPROVAL_FOR_ALL_TOPIC) {
        return Err(malformed(log, "not an ApprovalForAll log"));
    }
    if log.topics.len() != 3 {
        return Err(malformed(log, "unexpected ApprovalForAll topic count"));
    }
    let data = &log.data.0;
    if data.len() != 32 || data[..31].iter().any(|b| *b != 0) || data[31] > 1 {
        return Err(malformed(log, "ApprovalForAll flag is not an abi encoded bool"));
    }
    Ok(Some(AllowanceEvent::AllAssetsGrant {
        token: log.address,
        owner: indexed_address(log, 1)?,
        operator: indexed_address(log, 2)?,
        approved: data[31] == 1,
        block: log_block(log)?,
    }))
}

pub fn decode_event(
    kind: PermissionKind,
    log: &Log,
) -> Result<Option<AllowanceEvent>, AllowanceError> {
    match kind {
        PermissionKind::PerToken => decode_approval(log),
        PermissionKind::AllAssets => decode_approval_for_all(log),
    }
}
