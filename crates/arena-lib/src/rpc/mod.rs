//! JSON-RPC surfaces of the two services.

pub mod channel;
pub mod gsp;

use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::Methods;
use std::net::SocketAddr;
use tracing::info;

/// Binds and starts a JSON-RPC server for the given methods. The returned
/// handle stops the server when dropped or explicitly stopped.
pub async fn start_server(
    addr: &str,
    methods: impl Into<Methods>,
) -> anyhow::Result<(ServerHandle, SocketAddr)> {
    let server = Server::builder().build(addr).await?;
    let local_addr = server.local_addr()?;
    let handle = server.start(methods.into());
    info!(%local_addr, "JSON-RPC server listening");
    Ok((handle, local_addr))
}

pub(crate) fn internal_error(message: impl ToString) -> jsonrpsee::types::ErrorObjectOwned {
    jsonrpsee::types::ErrorObjectOwned::owned(
        jsonrpsee::types::error::CALL_EXECUTION_FAILED_CODE,
        message.to_string(),
        None::<()>,
    )
}

pub(crate) fn invalid_params(message: impl ToString) -> jsonrpsee::types::ErrorObjectOwned {
    jsonrpsee::types::ErrorObjectOwned::owned(
        jsonrpsee::types::error::INVALID_PARAMS_CODE,
        message.to_string(),
        None::<()>,
    )
}
