pub mod breaker;
pub mod client;
pub mod transport;

pub use breaker::{CircuitBreaker, EndpointStatus};
pub use client::{ChainClient, ChainClientProvider, RpcClient, RpcPool};
pub use transport::FallbackTransport;
