//! The GSP node's channel RPC: the interface the chain feeder of every
//! channel daemon polls.

use crate::arbiter::store::ArbiterStoreRead;
use crate::arbiter::{ArbiterMessage, StatsRow, TipInfo};
use crate::rpc::{internal_error, invalid_params};
use crate::store::Store;
use arena_types::{encode, Hash256};
use base64::prelude::{Engine, BASE64_STANDARD};
use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use ractor::{call_t, ActorRef};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

/// Server-side cap on a waitforchange long-poll.
const WAITFORCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

const ACTOR_CALL_TIMEOUT_MS: u64 = 5_000;

/// The on-chain view of one channel, as handed to channel daemons.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GspChannelInfo {
    pub id: String,
    /// base64 of the encoded channel metadata.
    pub meta: String,
    /// base64 of the reinitialisation board state.
    pub reinit: String,
    /// base64 of the encoded current state proof.
    pub proof: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disputeheight: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GspChannelResponse {
    /// Sync state of the GSP: "up-to-date" or "catching-up".
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<GspChannelInfo>,
}

#[rpc(server)]
pub trait GspRpc {
    /// The current on-chain view of the given channel.
    #[method(name = "getchannel")]
    async fn get_channel(&self, channel_id: String) -> RpcResult<GspChannelResponse>;

    /// Long-polls until the best block differs from the given one, then
    /// returns the new best block hash (empty while there is no state).
    #[method(name = "waitforchange")]
    async fn wait_for_change(&self, known_block: String) -> RpcResult<String>;

    /// The tracked pending moves as JSON.
    #[method(name = "getpending")]
    async fn get_pending(&self) -> RpcResult<serde_json::Value>;

    /// Win/loss statistics of one name.
    #[method(name = "getstats")]
    async fn get_stats(&self, name: String) -> RpcResult<Option<StatsRow>>;
}

pub struct GspRpcServerImpl {
    store: Store,
    tip_rx: watch::Receiver<TipInfo>,
    arbiter: ActorRef<ArbiterMessage>,
}

impl GspRpcServerImpl {
    pub fn new(
        store: Store,
        tip_rx: watch::Receiver<TipInfo>,
        arbiter: ActorRef<ArbiterMessage>,
    ) -> Self {
        Self {
            store,
            tip_rx,
            arbiter,
        }
    }
}

fn tip_block_hex(tip: &TipInfo) -> String {
    tip.hash.map(|h| h.to_hex()).unwrap_or_default()
}

#[async_trait::async_trait]
impl GspRpcServer for GspRpcServerImpl {
    async fn get_channel(&self, channel_id: String) -> RpcResult<GspChannelResponse> {
        let id: Hash256 = channel_id
            .parse()
            .map_err(|_| invalid_params("invalid channel id"))?;

        let tip = self.tip_rx.borrow().clone();
        let state = if tip.synced {
            "up-to-date"
        } else {
            "catching-up"
        };

        let channel = self.store.get_channel(&id).map(|row| GspChannelInfo {
            id: row.id.to_hex(),
            meta: BASE64_STANDARD.encode(encode(&row.metadata)),
            reinit: BASE64_STANDARD.encode(&row.reinit_state),
            proof: BASE64_STANDARD.encode(encode(&row.state_proof_or_trivial())),
            disputeheight: row.dispute_height,
        });

        Ok(GspChannelResponse {
            state: state.to_string(),
            blockhash: tip.hash.map(|h| h.to_hex()),
            height: tip.hash.map(|_| tip.height),
            channel,
        })
    }

    async fn wait_for_change(&self, known_block: String) -> RpcResult<String> {
        let mut rx = self.tip_rx.clone();

        let current = tip_block_hex(&rx.borrow());
        if current != known_block {
            return Ok(current);
        }

        // Time out rather than hold the connection open indefinitely; the
        // feeder simply polls again.
        let _ = tokio::time::timeout(WAITFORCHANGE_TIMEOUT, rx.changed()).await;
        Ok(tip_block_hex(&rx.borrow()))
    }

    async fn get_pending(&self) -> RpcResult<serde_json::Value> {
        call_t!(self.arbiter, ArbiterMessage::GetPending, ACTOR_CALL_TIMEOUT_MS)
            .map_err(internal_error)
    }

    async fn get_stats(&self, name: String) -> RpcResult<Option<StatsRow>> {
        Ok(self.store.get_stats(&name))
    }
}
