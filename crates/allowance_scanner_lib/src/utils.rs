use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use web3::types::{Address, H256, U256};

#[derive(Debug, Clone)]
pub struct ConversionError {
    pub msg: String,
}

impl ConversionError {
    pub fn from(msg: String) -> Self {
        Self { msg }
    }
}

impl Display for ConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error during conversion: {}", self.msg)
    }
}

impl Error for ConversionError {
    fn description(&self) -> &str {
        "Conversion error"
    }
}

/// Canonical lower-case `0x`-prefixed form used as the storage key.
pub fn address_to_db(address: Address) -> String {
    format!("{:#x}", address)
}

pub fn parse_address(address: &str) -> Result<Address, ConversionError> {
    let trimmed = address.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex_part.len() != 40 {
        return Err(ConversionError::from(format!(
            "Invalid address length: {}",
            address
        )));
    }
    Address::from_str(hex_part)
        .map_err(|_| ConversionError::from(format!("Invalid address: {}", address)))
}

/// Accepts any case and returns the canonical storage form.
pub fn normalize_address(address: &str) -> Result<String, ConversionError> {
    parse_address(address).map(address_to_db)
}

pub fn address_to_topic(address: Address) -> H256 {
    let mut topic = [0u8; 32];
    topic[12..].copy_from_slice(address.as_bytes());
    H256::from(topic)
}

/// Indexed address topics are left-padded; the padding must be zero.
pub fn topic_to_address(topic: &H256) -> Result<Address, ConversionError> {
    let bytes = topic.as_bytes();
    if bytes[..12].iter().any(|b| *b != 0) {
        return Err(ConversionError::from(format!(
            "Topic is not an address: {:#x}",
            topic
        )));
    }
    Ok(Address::from_slice(&bytes[12..]))
}

pub fn is_max_u256(value: &U256) -> bool {
    *value == U256::MAX
}

pub fn parse_chain_ids(raw: &str) -> Result<Vec<u64>, ConversionError> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            u64::from_str(s).map_err(|_| ConversionError::from(format!("Invalid chain id: {}", s)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address_lowercases() {
        let addr = normalize_address("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap();
        assert_eq!(addr, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    }

    #[test]
    fn test_parse_address_rejects_short() {
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("not an address").is_err());
    }

    #[test]
    fn test_topic_address_roundtrip_and_padding() {
        let addr = parse_address("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf").unwrap();
        let topic = address_to_topic(addr);
        assert_eq!(topic_to_address(&topic).unwrap(), addr);

        let mut dirty = topic.to_fixed_bytes();
        dirty[0] = 1;
        assert!(topic_to_address(&H256::from(dirty)).is_err());
    }

    #[test]
    fn test_max_u256_detection() {
        assert!(is_max_u256(&U256::MAX));
        assert!(!is_max_u256(&(U256::MAX - 1)));
    }

    #[test]
    fn test_parse_chain_ids() {
        assert_eq!(parse_chain_ids("1, 137,,8453").unwrap(), vec![1, 137, 8453]);
        assert!(parse_chain_ids("1,abc").is_err());
    }
}
