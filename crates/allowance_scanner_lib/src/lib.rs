pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod metadata;
pub mod retry;
pub mod risk;
pub mod rpc;
pub mod runtime;
pub mod scanner;
pub mod server;
pub mod setup;
pub mod utils;
