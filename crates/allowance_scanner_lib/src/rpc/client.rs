use crate::error::AllowanceError;
use crate::rpc::breaker::{CircuitBreaker, EndpointStatus};
use crate::rpc::transport::FallbackTransport;
use crate::setup::{ChainSetup, ScanSetup};
use crate::{err_config, err_from};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use web3::transports::Http;
use web3::types::{Bytes, CallRequest, Filter, Log};
use web3::{Transport, Web3};

/// The chain operations the engine needs.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn block_number(&self) -> Result<u64, AllowanceError>;

    async fn logs(&self, filter: Filter) -> Result<Vec<Log>, AllowanceError>;

    async fn call(&self, request: CallRequest) -> Result<Bytes, AllowanceError>;
}

/// Hands out chain clients by chain id.
pub trait ChainClientProvider: Send + Sync {
    fn client(
        &self,
        setup: &ScanSetup,
        chain_id: u64,
    ) -> Result<Arc<dyn ChainClient>, AllowanceError>;

    /// Circuit breaker state of every client created so far.
    fn endpoint_status(&self) -> BTreeMap<u64, Vec<EndpointStatus>> {
        BTreeMap::new()
    }
}

#[derive(Debug)]
pub struct RpcClient<T = Http>
where
    T: Transport + Send + Sync + 'static,
    T::Out: Send + 'static,
{
    chain_id: u64,
    web3: Web3<FallbackTransport<T>>,
    breaker: Arc<CircuitBreaker>,
}

impl<T> RpcClient<T>
where
    T: Transport + Send + Sync + 'static,
    T::Out: Send + 'static,
{
    pub fn from_transports(
        chain: &ChainSetup,
        transports: Vec<T>,
        ban_base: Duration,
        endpoint_timeout: Duration,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(&chain.endpoints, ban_base));
        let transport =
            FallbackTransport::new(chain.chain_id, transports, breaker.clone(), endpoint_timeout);
        RpcClient {
            chain_id: chain.chain_id,
            web3: Web3::new(transport),
            breaker,
        }
    }

    pub fn endpoint_status(&self) -> Vec<EndpointStatus> {
        self.breaker.status()
    }

    fn ensure_available(&self) -> Result<(), AllowanceError> {
        if self.breaker.all_banned() {
            return Err(AllowanceError::EndpointsExhausted {
                chain_id: self.chain_id,
            });
        }
        Ok(())
    }
}

impl RpcClient<Http> {
    pub fn connect(
        chain: &ChainSetup,
        ban_base: Duration,
        endpoint_timeout: Duration,
    ) -> Result<Self, AllowanceError> {
        if chain.endpoints.is_empty() {
            return Err(err_config!(
                "No rpc endpoints configured for chain {} ({})",
                chain.name,
                chain.chain_id
            ));
        }
        let mut transports = Vec::with_capacity(chain.endpoints.len());
        for endp in &chain.endpoints {
            let Ok(transport) = Http::new(&endp.url) else {
                return Err(err_config!("Failed to create transport for endpoint: {}", endp.url));
            };
            transports.push(transport);
        }
        Ok(Self::from_transports(
            chain,
            transports,
            ban_base,
            endpoint_timeout,
        ))
    }
}

#[async_trait]
impl<T> ChainClient for RpcClient<T>
where
    T: Transport + Send + Sync + 'static,
    T::Out: Send + 'static,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64, AllowanceError> {
        self.ensure_available()?;
        let block = self.web3.eth().block_number().await.map_err(err_from!())?;
        Ok(block.as_u64())
    }

    async fn logs(&self, filter: Filter) -> Result<Vec<Log>, AllowanceError> {
        self.ensure_available()?;
        Ok(self.web3.eth().logs(filter).await.map_err(err_from!())?)
    }

    async fn call(&self, request: CallRequest) -> Result<Bytes, AllowanceError> {
        self.ensure_available()?;
        Ok(self
            .web3
            .eth()
            .call(request, None)
            .await
            .map_err(err_from!())?)
    }
}

/// One client per chain for the life of the process.
#[derive(Debug)]
pub struct RpcPool {
    clients: Mutex<BTreeMap<u64, Arc<RpcClient>>>,
    ban_base: Duration,
    endpoint_timeout: Duration,
}

impl RpcPool {
    pub fn new(ban_base: Duration, endpoint_timeout: Duration) -> Self {
        RpcPool {
            clients: Mutex::new(BTreeMap::new()),
            ban_base,
            endpoint_timeout,
        }
    }

    pub fn from_setup(setup: &ScanSetup) -> Self {
        Self::new(setup.ban_base(), setup.endpoint_timeout())
    }

    pub fn get_client(
        &self,
        setup: &ScanSetup,
        chain_id: u64,
    ) -> Result<Arc<RpcClient>, AllowanceError> {
        let chain = setup.get_chain_setup(chain_id)?;
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&chain_id) {
            return Ok(client.clone());
        }
        let client = Arc::new(RpcClient::connect(
            chain,
            self.ban_base,
            self.endpoint_timeout,
        )?);
        log::info!(
            "Created rpc client for chain {} with {} endpoints",
            chain_id,
            chain.endpoints.len()
        );
        clients.insert(chain_id, client.clone());
        Ok(client)
    }

    pub fn clients_status(&self) -> BTreeMap<u64, Vec<EndpointStatus>> {
        self.clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(chain_id, client)| (*chain_id, client.endpoint_status()))
            .collect()
    }
}

impl ChainClientProvider for RpcPool {
    fn client(
        &self,
        setup: &ScanSetup,
        chain_id: u64,
    ) -> Result<Arc<dyn ChainClient>, AllowanceError> {
        let client: Arc<dyn ChainClient> = self.get_client(setup, chain_id)?;
        Ok(client)
    }

    fn endpoint_status(&self) -> BTreeMap<u64, Vec<EndpointStatus>> {
        self.clients_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::rpc::transport::tests::ScriptedTransport;
    use jsonrpc_core::Value;

    fn setup() -> ScanSetup {
        let config = Config::load_from_str(
            r#"
[chain.mainnet]
chain-id = 1
rpc-endpoints = [
    { url = "http://127.0.0.1:18545", weight = 2 },
    { url = "http://127.0.0.1:18546", weight = 1 },
]

[chain.dead]
chain-id = 99
rpc-endpoints = []
"#,
        )
        .unwrap();
        ScanSetup::new(&config).unwrap()
    }

    #[test]
    fn test_pool_caches_client_per_chain() {
        let setup = setup();
        let pool = RpcPool::from_setup(&setup);
        let a = pool.get_client(&setup, 1).unwrap();
        let b = pool.get_client(&setup, 1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.clients_status().get(&1).unwrap().len(), 2);
    }

    #[test]
    fn test_pool_rejects_misconfigured_chains() {
        let setup = setup();
        let pool = RpcPool::from_setup(&setup);
        assert!(pool.get_client(&setup, 99).unwrap_err().is_configuration());
        assert!(matches!(
            pool.get_client(&setup, 5).unwrap_err(),
            AllowanceError::UnknownChain(5)
        ));
    }

    #[tokio::test]
    async fn test_block_number_through_fallback() {
        let setup = setup();
        let chain = setup.get_chain_setup(1).unwrap();
        let failing = ScriptedTransport::new("failing", vec![Err("503".to_string())]);
        let healthy = ScriptedTransport::new("healthy", vec![Ok(Value::from("0x1d4c0"))]);
        let client = RpcClient::from_transports(
            chain,
            vec![failing.clone(), healthy.clone()],
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        assert_eq!(client.block_number().await.unwrap(), 120_000);
        assert_eq!(client.block_number().await.unwrap(), 120_000);
        assert_eq!(failing.calls(), 1);
        assert_eq!(healthy.calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_endpoints_surface_typed_error() {
        let setup = setup();
        let chain = setup.get_chain_setup(1).unwrap();
        let a = ScriptedTransport::new("a", vec![Err("down".to_string())]);
        let b = ScriptedTransport::new("b", vec![Err("down".to_string())]);
        let client = RpcClient::from_transports(
            chain,
            vec![a, b],
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        let first = client.block_number().await.unwrap_err();
        assert!(first.is_retryable());
        let second = client.block_number().await.unwrap_err();
        assert!(matches!(
            second,
            AllowanceError::EndpointsExhausted { chain_id: 1 }
        ));
    }
}
