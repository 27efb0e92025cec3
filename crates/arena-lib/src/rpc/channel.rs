//! The channel daemon's RPC surface for frontends.

use crate::block_in_place;
use crate::channel::ChannelManager;
use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[rpc(server)]
pub trait ChannelRpc {
    /// The current channel snapshot.
    #[method(name = "getcurrentstate")]
    async fn get_current_state(&self) -> RpcResult<serde_json::Value>;

    /// Blocks until the snapshot version differs from the given one (0
    /// always blocks) and returns the new snapshot. May return the
    /// unchanged snapshot after a server-side timeout.
    #[method(name = "waitforchange")]
    async fn wait_for_change(&self, known_version: u64) -> RpcResult<serde_json::Value>;

    /// Applies a local move, given as the game's move JSON.
    #[method(name = "submitmove")]
    async fn submit_move(&self, mv: serde_json::Value) -> RpcResult<bool>;

    /// Files a dispute with the current state. Returns the txid if a
    /// dispute move was sent.
    #[method(name = "filedispute")]
    async fn file_dispute(&self) -> RpcResult<Option<String>>;

    /// Unconditionally puts the current state on chain in a resolution
    /// move. Returns the txid if one was sent.
    #[method(name = "putstateonchain")]
    async fn put_state_on_chain(&self) -> RpcResult<Option<String>>;

    /// Shuts the daemon down.
    #[method(name = "stop")]
    async fn stop(&self) -> RpcResult<()>;
}

pub struct ChannelRpcServerImpl {
    manager: Arc<ChannelManager>,
    shutdown: CancellationToken,
}

impl ChannelRpcServerImpl {
    pub fn new(manager: Arc<ChannelManager>, shutdown: CancellationToken) -> Self {
        Self { manager, shutdown }
    }
}

#[async_trait::async_trait]
impl ChannelRpcServer for ChannelRpcServerImpl {
    async fn get_current_state(&self) -> RpcResult<serde_json::Value> {
        Ok(self.manager.to_json())
    }

    async fn wait_for_change(&self, known_version: u64) -> RpcResult<serde_json::Value> {
        let manager = self.manager.clone();
        Ok(block_in_place(move || {
            manager.wait_for_change(known_version)
        }))
    }

    async fn submit_move(&self, mv: serde_json::Value) -> RpcResult<bool> {
        let encoded = serde_json::to_vec(&mv).expect("move value serializes");
        let manager = self.manager.clone();
        block_in_place(move || manager.process_local_move(encoded));
        Ok(true)
    }

    async fn file_dispute(&self) -> RpcResult<Option<String>> {
        let manager = self.manager.clone();
        Ok(block_in_place(move || manager.file_dispute()).map(|txid| txid.to_hex()))
    }

    async fn put_state_on_chain(&self) -> RpcResult<Option<String>> {
        let manager = self.manager.clone();
        Ok(block_in_place(move || manager.put_state_on_chain()).map(|txid| txid.to_hex()))
    }

    async fn stop(&self) -> RpcResult<()> {
        self.manager.stop_updates();
        self.shutdown.cancel();
        Ok(())
    }
}
