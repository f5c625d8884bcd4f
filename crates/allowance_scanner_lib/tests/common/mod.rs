#![allow(dead_code)]

use allowance_scanner_lib::config::Config;
use allowance_scanner_lib::error::AllowanceError;
use allowance_scanner_lib::events::{APPROVAL_FOR_ALL_TOPIC, APPROVAL_TOPIC};
use allowance_scanner_lib::rpc::{ChainClient, ChainClientProvider};
use allowance_scanner_lib::setup::ScanSetup;
use allowance_scanner_lib::utils::address_to_topic;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use web3::types::{Address, Bytes, CallRequest, Filter, Log, H256, U256, U64};

pub const TEST_CONFIG: &str = r#"
[engine]
window-size = 50000
retry-tries = 2
retry-base-ms = 1
request-timeout-ms = 5000

[chain.mainnet]
chain-id = 1
stale-threshold-blocks = 650000
explorer-url = "https://etherscan.io"
rpc-endpoints = [{ url = "http://127.0.0.1:18545" }]

[chain.polygon]
chain-id = 137
block-time-ms = 2000
rpc-endpoints = [{ url = "http://127.0.0.1:18546" }]

[[spender-label]]
chain-id = 1
address = "0x000000000022D473030F116dDEE9F6B43aC78BA3"
label = "Uniswap Permit2"
trust = "official"
"#;

pub fn test_setup() -> ScanSetup {
    let config = Config::load_from_str(TEST_CONFIG).unwrap();
    ScanSetup::new(&config).unwrap()
}

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

fn word(value: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    buf.to_vec()
}

fn log_at(token: Address, topics: Vec<H256>, data: Vec<u8>, block: u64) -> Log {
    Log {
        address: token,
        topics,
        data: Bytes(data),
        block_hash: None,
        block_number: Some(U64::from(block)),
        transaction_hash: None,
        transaction_index: None,
        log_index: None,
        transaction_log_index: None,
        log_type: None,
        removed: None,
    }
}

pub fn approval(token: Address, owner: Address, spender: Address, value: U256, block: u64) -> Log {
    log_at(
        token,
        vec![*APPROVAL_TOPIC, address_to_topic(owner), address_to_topic(spender)],
        word(value),
        block,
    )
}

pub fn approval_for_all(
    token: Address,
    owner: Address,
    operator: Address,
    approved: bool,
    block: u64,
) -> Log {
    log_at(
        token,
        vec![
            *APPROVAL_FOR_ALL_TOPIC,
            address_to_topic(owner),
            address_to_topic(operator),
        ],
        word(U256::from(approved as u8)),
        block,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub topic0: H256,
    pub owner_topic: H256,
    pub from: u64,
    pub to: u64,
}

fn json_u64(value: &serde_json::Value) -> u64 {
    let raw = value.as_str().unwrap();
    u64::from_str_radix(raw.trim_start_matches("0x"), 16).unwrap()
}

fn json_topic(value: &serde_json::Value) -> H256 {
    let raw = match value {
        serde_json::Value::Array(items) => items[0].as_str().unwrap().to_string(),
        other => other.as_str().unwrap().to_string(),
    };
    H256::from_str(raw.trim_start_matches("0x")).unwrap()
}

/// Reads the range and topics back from the request the scanner built.
pub fn parse_filter(filter: &Filter) -> LogQuery {
    let value = serde_json::to_value(filter).unwrap();
    let topics = value["topics"].as_array().unwrap();
    LogQuery {
        topic0: json_topic(&topics[0]),
        owner_topic: json_topic(&topics[1]),
        from: json_u64(&value["fromBlock"]),
        to: json_u64(&value["toBlock"]),
    }
}

/// An in-process chain answering from a fixed list of logs.
pub struct ScriptedChain {
    pub chain_id: u64,
    pub tip: Mutex<Result<u64, String>>,
    pub logs: Mutex<Vec<Log>>,
    pub queries: Mutex<Vec<LogQuery>>,
    /// Log queries for windows starting at or above this block fail.
    pub fail_from_block: Mutex<Option<u64>>,
    /// Cancels the token once this many log queries were answered.
    pub cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedChain {
    pub fn new(chain_id: u64, tip: u64, logs: Vec<Log>) -> Arc<Self> {
        Arc::new(ScriptedChain {
            chain_id,
            tip: Mutex::new(Ok(tip)),
            logs: Mutex::new(logs),
            queries: Mutex::new(vec![]),
            fail_from_block: Mutex::new(None),
            cancel_after: Mutex::new(None),
        })
    }

    pub fn set_tip(&self, tip: u64) {
        *self.tip.lock().unwrap() = Ok(tip);
    }

    pub fn break_tip(&self, reason: &str) {
        *self.tip.lock().unwrap() = Err(reason.to_string());
    }

    pub fn fail_from(&self, block: Option<u64>) {
        *self.fail_from_block.lock().unwrap() = block;
    }

    pub fn queries(&self) -> Vec<LogQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn ranges_for(&self, topic0: H256) -> Vec<(u64, u64)> {
        self.queries()
            .iter()
            .filter(|q| q.topic0 == topic0)
            .map(|q| (q.from, q.to))
            .collect()
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64, AllowanceError> {
        self.tip
            .lock()
            .unwrap()
            .clone()
            .map_err(|_| AllowanceError::EndpointsExhausted {
                chain_id: self.chain_id,
            })
    }

    async fn logs(&self, filter: Filter) -> Result<Vec<Log>, AllowanceError> {
        let query = parse_filter(&filter);
        if let Some(fail_from) = *self.fail_from_block.lock().unwrap() {
            if query.from >= fail_from {
                return Err(AllowanceError::Timeout(5000));
            }
        }
        self.queries.lock().unwrap().push(query.clone());
        let answered = self.queries.lock().unwrap().len();
        if let Some((after, token)) = &*self.cancel_after.lock().unwrap() {
            if answered >= *after {
                token.cancel();
            }
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|b| b.as_u64()).unwrap_or(0);
                log.topics.first() == Some(&query.topic0)
                    && log.topics.get(1) == Some(&query.owner_topic)
                    && block >= query.from
                    && block <= query.to
            })
            .cloned()
            .collect())
    }

    async fn call(&self, _request: CallRequest) -> Result<Bytes, AllowanceError> {
        Ok(Bytes(vec![]))
    }
}

#[derive(Default)]
pub struct ScriptedProvider {
    pub chains: BTreeMap<u64, Arc<ScriptedChain>>,
}

impl ScriptedProvider {
    pub fn with(chains: Vec<Arc<ScriptedChain>>) -> Self {
        ScriptedProvider {
            chains: chains.into_iter().map(|c| (c.chain_id, c)).collect(),
        }
    }
}

impl ChainClientProvider for ScriptedProvider {
    fn client(
        &self,
        setup: &ScanSetup,
        chain_id: u64,
    ) -> Result<Arc<dyn ChainClient>, AllowanceError> {
        setup.get_chain_setup(chain_id)?;
        match self.chains.get(&chain_id) {
            Some(chain) => {
                let client: Arc<dyn ChainClient> = chain.clone();
                Ok(client)
            }
            None => Err(AllowanceError::ConfigError(format!(
                "no endpoints for chain {}",
                chain_id
            ))),
        }
    }
}
