//! Binds the JSON-RPC server and hands it the shared managers.

use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::server::{Server, ServerHandle};

use crate::bootstrap::Bootstrap;
use crate::handler::RpcImpl;
use crate::rpc::CostrictRpcServer;

/// Binds `listen_address`, wires an [`RpcImpl`] to the bootstrap's
/// managers, and starts serving. Returns the handle (for graceful
/// shutdown) and the address actually bound (useful when the
/// configured address uses port `0`).
pub async fn start(listen_address: &str, bootstrap: &Bootstrap) -> anyhow::Result<(ServerHandle, SocketAddr)> {
    let server = Server::builder().build(listen_address).await?;
    let addr = server.local_addr()?;

    let rpc_impl = RpcImpl {
        supervisor: Arc::clone(&bootstrap.supervisor),
        services: Arc::clone(&bootstrap.services),
        components: Arc::clone(&bootstrap.components),
    };

    let handle = server.start(rpc_impl.into_rpc());
    Ok((handle, addr))
}
