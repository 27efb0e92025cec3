//! Minimal block ingestion for the GSP service.
//!
//! Polls the node for new blocks, attaches them in order through the
//! arbiter actor and detaches on hash mismatch. Reorgs deeper than the
//! undo journal are not resolved here; the node operator resyncs.

use crate::arbiter::{ArbiterMessage, BlockData, MoveEntry, TipInfo};
use crate::{Error, Result};
use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use ractor::{call_t, ActorRef};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const ACTOR_CALL_TIMEOUT_MS: u64 = 30_000;

/// The slice of the base-chain RPC the sync loop needs.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_block_count(&self) -> anyhow::Result<u64>;
    async fn get_block(&self, height: u64) -> anyhow::Result<BlockData>;
    async fn get_mempool_moves(&self) -> anyhow::Result<Vec<MoveEntry>>;
}

/// JSON-RPC client for a naming-chain node exposing per-block game moves.
pub struct NodeRpcClient {
    client: HttpClient,
}

impl NodeRpcClient {
    pub fn new(url: &str) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(6))
            .build(url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NodeClient for NodeRpcClient {
    async fn get_block_count(&self) -> anyhow::Result<u64> {
        Ok(self.client.request("getblockcount", rpc_params![]).await?)
    }

    async fn get_block(&self, height: u64) -> anyhow::Result<BlockData> {
        Ok(self
            .client
            .request("getblockdata", rpc_params![height])
            .await?)
    }

    async fn get_mempool_moves(&self) -> anyhow::Result<Vec<MoveEntry>> {
        Ok(self
            .client
            .request("getpendingmoves", rpc_params![])
            .await?)
    }
}

/// Drives the arbiter actor from the node until cancelled.
pub async fn run_sync<C: NodeClient>(
    actor: ActorRef<ArbiterMessage>,
    client: C,
    token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(POLL_INTERVAL) => (),
        }

        let count = match client.get_block_count().await {
            Ok(count) => count,
            Err(err) => {
                warn!(%err, "failed to query block count, retrying");
                let _ = actor.cast(ArbiterMessage::SetSynced(false));
                continue;
            }
        };

        let caught_up = catch_up(&actor, &client, count, &token).await?;
        let _ = actor.cast(ArbiterMessage::SetSynced(caught_up));
        if !caught_up {
            continue;
        }

        match client.get_mempool_moves().await {
            Ok(moves) => {
                for mv in moves {
                    let _ = actor.cast(ArbiterMessage::PendingMove(mv));
                }
            }
            Err(err) => debug!(%err, "failed to query mempool moves"),
        }
    }
}

/// Attaches blocks until the tip reaches the node's count, detaching as
/// long as the next block does not extend our tip. Returns whether we are
/// caught up.
async fn catch_up<C: NodeClient>(
    actor: &ActorRef<ArbiterMessage>,
    client: &C,
    count: u64,
    token: &CancellationToken,
) -> Result<bool> {
    loop {
        if token.is_cancelled() {
            return Ok(false);
        }

        let tip: TipInfo = call_t!(actor, ArbiterMessage::GetTip, ACTOR_CALL_TIMEOUT_MS)
            .map_err(|e| Error::InternalError(anyhow::anyhow!("arbiter actor call: {e}")))?;
        if count == 0 || (tip.hash.is_some() && tip.height >= count) {
            return Ok(true);
        }

        let next_height = match tip.hash {
            Some(_) => tip.height + 1,
            None => 1,
        };
        let block = match client.get_block(next_height).await {
            Ok(block) => block,
            Err(err) => {
                warn!(%err, height = next_height, "failed to fetch block, retrying");
                return Ok(false);
            }
        };

        if let Some(tip_hash) = tip.hash {
            if block.parent != tip_hash {
                warn!(
                    height = next_height,
                    "next block does not extend our tip, detaching"
                );
                call_t!(actor, ArbiterMessage::DetachTip, ACTOR_CALL_TIMEOUT_MS)
                    .map_err(|e| Error::InternalError(anyhow::anyhow!("arbiter actor call: {e}")))?;
                continue;
            }
        }

        call_t!(
            actor,
            ArbiterMessage::AttachBlock,
            ACTOR_CALL_TIMEOUT_MS,
            block
        )
        .map_err(|e| Error::InternalError(anyhow::anyhow!("arbiter actor call: {e}")))?;
    }
}
