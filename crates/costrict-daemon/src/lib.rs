//! The keeper's HTTP/JSON-RPC control surface: RPC definition, server
//! wiring, and the configuration bootstrap the `costrict-keeperd` binary
//! runs.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod handler;
pub mod logging;
pub mod rpc;
pub mod server;

pub use bootstrap::{assemble, Bootstrap};
pub use handler::RpcImpl;
pub use logging::{setup_logging, LogConfig, LogFormat};
pub use rpc::{ComponentInfo, CostrictRpcClient, CostrictRpcServer, ServiceInfo, TunnelPairWire};
