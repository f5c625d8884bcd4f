use crate::rpc::breaker::CircuitBreaker;
use futures::future::BoxFuture;
use jsonrpc_core::{Call, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use web3::error::TransportError;
use web3::{RequestId, Transport};

/// Transport that spreads requests over several endpoints of one chain.
///
/// Endpoints are tried heaviest first, skipping the ones the circuit
/// breaker currently bans. Every outcome is fed back into the breaker.
#[derive(Debug)]
pub struct FallbackTransport<T> {
    inner: Arc<FallbackInner<T>>,
}

#[derive(Debug)]
struct FallbackInner<T> {
    chain_id: u64,
    transports: Vec<T>,
    breaker: Arc<CircuitBreaker>,
    endpoint_timeout: Duration,
    next_id: AtomicUsize,
}

impl<T> Clone for FallbackTransport<T> {
    fn clone(&self) -> Self {
        FallbackTransport {
            inner: self.inner.clone(),
        }
    }
}

pub fn exhausted_error(chain_id: u64) -> web3::Error {
    web3::Error::Transport(TransportError::Message(format!(
        "no rpc endpoint available for chain {}",
        chain_id
    )))
}

/// Errors every endpoint would answer the same way (e.g. a reverted call).
/// They are returned as-is without penalising the endpoint.
pub fn is_deterministic_error(err: &web3::Error) -> bool {
    match err {
        web3::Error::Rpc(rpc_err) => {
            let message = rpc_err.message.to_lowercase();
            rpc_err.code.code() == 3
                || message.contains("revert")
                || message.contains("invalid opcode")
        }
        web3::Error::Decoder(_) => true,
        _ => false,
    }
}

impl<T> FallbackTransport<T> {
    /// `transports[i]` must belong to the breaker's endpoint `i`.
    pub fn new(
        chain_id: u64,
        transports: Vec<T>,
        breaker: Arc<CircuitBreaker>,
        endpoint_timeout: Duration,
    ) -> Self {
        FallbackTransport {
            inner: Arc::new(FallbackInner {
                chain_id,
                transports,
                breaker,
                endpoint_timeout,
                next_id: AtomicUsize::new(1),
            }),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }
}

impl<T> FallbackInner<T>
where
    T: Transport,
{
    async fn dispatch(&self, id: RequestId, request: Call) -> web3::Result<Value> {
        let order = self.breaker.attempt_order();
        if order.is_empty() {
            return Err(exhausted_error(self.chain_id));
        }
        let mut last_err = None;
        for idx in order {
            let Some(transport) = self.transports.get(idx) else {
                continue;
            };
            let result =
                match tokio::time::timeout(self.endpoint_timeout, transport.send(id, request.clone()))
                    .await
                {
                    Ok(res) => res,
                    Err(_elapsed) => Err(web3::Error::Transport(TransportError::Message(format!(
                        "request timed out after {} ms",
                        self.endpoint_timeout.as_millis()
                    )))),
                };
            match result {
                Ok(value) => {
                    self.breaker.record_success(idx);
                    return Ok(value);
                }
                Err(err) if is_deterministic_error(&err) => {
                    self.breaker.record_success(idx);
                    return Err(err);
                }
                Err(err) => {
                    log::debug!(
                        "Chain {} endpoint {} failed: {}",
                        self.chain_id,
                        self.breaker.url(idx).unwrap_or_default(),
                        err
                    );
                    self.breaker.record_failure(idx);
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| exhausted_error(self.chain_id)))
    }
}

impl<T> Transport for FallbackTransport<T>
where
    T: Transport + Send + Sync + 'static,
    T::Out: Send + 'static,
{
    type Out = BoxFuture<'static, web3::Result<Value>>;

    fn prepare(&self, method: &str, params: Vec<Value>) -> (RequestId, Call) {
        let id = self.inner.next_id.fetch_add(1, Ordering::AcqRel);
        (id, web3::helpers::build_request(id, method, params))
    }

    fn send(&self, id: RequestId, request: Call) -> Self::Out {
        let inner = self.inner.clone();
        Box::pin(async move { inner.dispatch(id, request).await })
    }
}
