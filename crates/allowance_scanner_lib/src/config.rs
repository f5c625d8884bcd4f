use serde::Deserialize;
use std::collections::btree_map::BTreeMap as Map;

use std::fs;
use std::path::Path;

use crate::error::AllowanceError;
use crate::{err_config, err_from};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub engine: Engine,
    pub chain: Map<String, Chain>,
    #[serde(default)]
    pub spender_label: Vec<SpenderLabelEntry>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", default)]
pub struct Engine {
    pub window_size: u64,
    pub retry_tries: u32,
    pub retry_base_ms: u64,
    pub request_timeout_ms: u64,
    pub endpoint_timeout_ms: u64,
    pub ban_base_ms: u64,
    pub page_size: i64,
    pub metadata_ttl_days: i64,
}

impl Default for Engine {
    fn default() -> Self {
        Engine {
            window_size: 50_000,
            retry_tries: 3,
            retry_base_ms: 250,
            request_timeout_ms: 45_000,
            endpoint_timeout_ms: 20_000,
            ban_base_ms: 60_000,
            page_size: 200,
            metadata_ttl_days: 30,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Chain {
    pub chain_id: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub explorer_url: Option<String>,
    pub block_time_ms: Option<u64>,
    pub stale_threshold_blocks: Option<u64>,
    #[serde(default)]
    pub rpc_endpoints: Vec<RpcEndpoint>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct RpcEndpoint {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SpenderLabelEntry {
    pub chain_id: u64,
    pub address: String,
    pub label: String,
    pub trust: String,
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> u32 {
    1
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AllowanceError> {
        let contents = fs::read_to_string(path).map_err(err_from!())?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self, AllowanceError> {
        match toml::from_str(contents) {
            Ok(config) => Ok(config),
            Err(e) => Err(err_config!("Failed to parse toml {:?}", e)),
        }
    }
}
