use crate::config::{Config, SpenderLabelEntry};
use crate::error::AllowanceError;
use crate::retry::RetryPolicy;
use crate::utils::parse_chain_ids;
use crate::{err_config, err_from};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Roughly 90 days of 12 second blocks.
pub const DEFAULT_STALE_THRESHOLD_SLOW: u64 = 650_000;
/// Used for chains producing blocks faster than every 12 seconds.
pub const DEFAULT_STALE_THRESHOLD_FAST: u64 = 900_000;

pub const MAX_PAGE_SIZE: i64 = 200;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSetup {
    pub url: String,
    pub weight: u32,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSetup {
    pub chain_id: u64,
    pub name: String,
    pub enabled: bool,
    pub explorer_url: Option<String>,
    pub stale_threshold_blocks: u64,
    pub endpoints: Vec<EndpointSetup>,
}

impl ChainSetup {
    pub fn explorer_address_url(&self, address: &str) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/address/{}", base.trim_end_matches('/'), address))
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSetup {
    pub chain_setup: BTreeMap<u64, ChainSetup>,
    pub window_size: u64,
    pub retry_tries: u32,
    pub retry_base_ms: u64,
    pub request_timeout_ms: u64,
    pub endpoint_timeout_ms: u64,
    pub ban_base_ms: u64,
    pub page_size: i64,
    pub metadata_ttl_days: i64,
    pub spender_labels: Vec<SpenderLabelSetup>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpenderLabelSetup {
    pub chain_id: u64,
    pub address: String,
    pub label: String,
    pub trust: String,
}

fn stale_threshold_for(block_time_ms: Option<u64>) -> u64 {
    match block_time_ms {
        Some(ms) if ms < 12_000 => DEFAULT_STALE_THRESHOLD_FAST,
        _ => DEFAULT_STALE_THRESHOLD_SLOW,
    }
}

fn label_setup(entry: &SpenderLabelEntry) -> Result<SpenderLabelSetup, AllowanceError> {
    match entry.trust.as_str() {
        "official" | "curated" | "community" => {}
        other => {
            return Err(err_config!(
                "Unknown trust tier {} for spender {}",
                other,
                entry.address
            ))
        }
    }
    Ok(SpenderLabelSetup {
        chain_id: entry.chain_id,
        address: crate::utils::normalize_address(&entry.address).map_err(err_from!())?,
        label: entry.label.clone(),
        trust: entry.trust.clone(),
    })
}

impl ScanSetup {
    pub fn new(config: &Config) -> Result<Self, AllowanceError> {
        let mut ss = ScanSetup {
            chain_setup: BTreeMap::new(),
            window_size: config.engine.window_size,
            retry_tries: config.engine.retry_tries,
            retry_base_ms: config.engine.retry_base_ms,
            request_timeout_ms: config.engine.request_timeout_ms,
            endpoint_timeout_ms: config.engine.endpoint_timeout_ms,
            ban_base_ms: config.engine.ban_base_ms,
            page_size: config.engine.page_size.clamp(1, MAX_PAGE_SIZE),
            metadata_ttl_days: config.engine.metadata_ttl_days,
            spender_labels: config
                .spender_label
                .iter()
                .map(label_setup)
                .collect::<Result<Vec<_>, _>>()?,
        };
        for (name, chain_config) in &config.chain {
            if ss.chain_setup.contains_key(&chain_config.chain_id) {
                return Err(err_config!(
                    "Chain id {} configured twice",
                    chain_config.chain_id
                ));
            }
            let mut endpoints: Vec<EndpointSetup> = chain_config
                .rpc_endpoints
                .iter()
                .map(|e| EndpointSetup {
                    url: e.url.clone(),
                    weight: e.weight,
                })
                .collect();
            endpoints.sort_by(|a, b| b.weight.cmp(&a.weight));
            ss.chain_setup.insert(
                chain_config.chain_id,
                ChainSetup {
                    chain_id: chain_config.chain_id,
                    name: name.clone(),
                    enabled: chain_config.enabled,
                    explorer_url: chain_config.explorer_url.clone(),
                    stale_threshold_blocks: chain_config
                        .stale_threshold_blocks
                        .unwrap_or_else(|| stale_threshold_for(chain_config.block_time_ms)),
                    endpoints,
                },
            );
        }
        if ss.window_size == 0 {
            return Err(err_config!("window-size must be greater than zero"));
        }
        Ok(ss)
    }

    /// Applies the environment surface on top of the file configuration.
    pub fn apply_env_overrides(&mut self) -> Result<(), AllowanceError> {
        let vars: BTreeMap<String, String> = env::vars().collect();
        self.apply_overrides(&vars)
    }

    pub fn apply_overrides(&mut self, vars: &BTreeMap<String, String>) -> Result<(), AllowanceError> {
        for (chain_id, chain) in self.chain_setup.iter_mut() {
            if let Some(raw) = vars.get(&format!("RPC_URLS_{}", chain_id)) {
                let urls = parse_rpc_urls(raw);
                let count = urls.len() as u32;
                chain.endpoints = urls
                    .into_iter()
                    .enumerate()
                    .map(|(idx, url)| EndpointSetup {
                        url,
                        weight: count - idx as u32,
                    })
                    .collect();
                log::info!(
                    "Chain {} endpoints overridden from environment ({} urls)",
                    chain_id,
                    count
                );
            }
        }
        if let Some(raw) = vars.get("DISABLED_CHAINS") {
            for chain_id in parse_chain_ids(raw).map_err(err_from!())? {
                match self.chain_setup.get_mut(&chain_id) {
                    Some(chain) => chain.enabled = false,
                    None => log::warn!("DISABLED_CHAINS names unknown chain {}", chain_id),
                }
            }
        }
        if let Some(raw) = vars.get("WINDOW_SIZE") {
            self.window_size = parse_env_number("WINDOW_SIZE", raw)?;
        }
        if let Some(raw) = vars.get("RETRY_TRIES") {
            self.retry_tries = parse_env_number("RETRY_TRIES", raw)?;
        }
        if let Some(raw) = vars.get("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_env_number("REQUEST_TIMEOUT_MS", raw)?;
        }
        if self.window_size == 0 {
            return Err(err_config!("WINDOW_SIZE must be greater than zero"));
        }
        Ok(())
    }

    /// Enabled chains must have somewhere to send requests.
    pub fn validate(&self) -> Result<(), AllowanceError> {
        for chain in self.chain_setup.values() {
            if chain.enabled && chain.endpoints.is_empty() {
                return Err(err_config!(
                    "Chain {} ({}) is enabled but has no rpc endpoints",
                    chain.name,
                    chain.chain_id
                ));
            }
        }
        Ok(())
    }

    pub fn enabled_chain_ids(&self) -> Vec<u64> {
        self.chain_setup
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.chain_id)
            .collect()
    }

    pub fn get_chain_setup(&self, chain_id: u64) -> Result<&ChainSetup, AllowanceError> {
        self.chain_setup
            .get(&chain_id)
            .filter(|c| c.enabled)
            .ok_or(AllowanceError::UnknownChain(chain_id))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            tries: self.retry_tries.max(1),
            base_delay: Duration::from_millis(self.retry_base_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_millis(self.endpoint_timeout_ms)
    }

    pub fn ban_base(&self) -> Duration {
        Duration::from_millis(self.ban_base_ms)
    }
}

fn parse_env_number<T: FromStr>(name: &str, raw: &str) -> Result<T, AllowanceError> {
    T::from_str(raw.trim()).map_err(|_| err_config!("Invalid value for {}: {}", name, raw))
}

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
