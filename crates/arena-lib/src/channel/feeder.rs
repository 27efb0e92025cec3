//! The chain-to-channel feeder.
//!
//! A supervised task that keeps one channel manager in sync with the GSP:
//! fetch the channel's on-chain view, hand it to the manager, then
//! long-poll `waitforchange` until the best block moves. RPC connector
//! errors (typically the long-poll timing out) are retried; anything else
//! coming back from the GSP is fatal for the feeder.

use crate::channel::manager::ChannelManager;
use crate::rpc::gsp::GspChannelResponse;
use crate::{Error, Result};
use arena_types::{decode, ChannelMetadata, Hash256, StateProof};
use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_STANDARD};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::ClientError;
use jsonrpsee::http_client::HttpClient;
use jsonrpsee::rpc_params;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The slice of the GSP RPC surface the feeder consumes.
#[async_trait]
pub trait GspChannelClient: Send + Sync {
    async fn get_channel(&self, channel_id: String)
        -> std::result::Result<GspChannelResponse, ClientError>;
    async fn wait_for_change(&self, known_block: String)
        -> std::result::Result<String, ClientError>;
}

#[async_trait]
impl GspChannelClient for HttpClient {
    async fn get_channel(
        &self,
        channel_id: String,
    ) -> std::result::Result<GspChannelResponse, ClientError> {
        self.request("getchannel", rpc_params![channel_id]).await
    }

    async fn wait_for_change(
        &self,
        known_block: String,
    ) -> std::result::Result<String, ClientError> {
        self.request("waitforchange", rpc_params![known_block]).await
    }
}

pub struct ChainFeeder<C> {
    manager: Arc<ChannelManager>,
    client: C,
    channel_id_hex: String,
}

fn is_connector_error(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::RequestTimeout | ClientError::Transport(_) | ClientError::RestartNeeded(_)
    )
}

impl<C: GspChannelClient> ChainFeeder<C> {
    pub fn new(manager: Arc<ChannelManager>, client: C) -> Self {
        let channel_id_hex = manager.channel_id().to_hex();
        Self {
            manager,
            client,
            channel_id_hex,
        }
    }

    /// Fetches the current on-chain view once and feeds it to the
    /// manager. Updates the last seen block on success.
    async fn update_once(&self, last_block: &mut Option<Hash256>) -> Result<()> {
        let data: GspChannelResponse = self.client.get_channel(self.channel_id_hex.clone()).await?;

        if data.state != "up-to-date" {
            warn!(state = %data.state, "channel GSP is not up-to-date, not updating channel");
            return Ok(());
        }

        let block_hash: Hash256 = match &data.blockhash {
            Some(hash) => hash
                .parse()
                .map_err(|_| Error::InvalidParameter("invalid block hash from GSP".into()))?,
            None => {
                // Mostly the initial update; the GSP simply has no state
                // yet.
                warn!("GSP has no current state yet");
                return Ok(());
            }
        };
        let height = data
            .height
            .ok_or_else(|| Error::InvalidParameter("missing height from GSP".into()))?;
        *last_block = Some(block_hash);
        info!(block = %block_hash, height, "new on-chain best block");

        let channel = match data.channel {
            Some(channel) => channel,
            None => {
                info!(channel = %self.channel_id_hex, "channel is not known on-chain");
                self.manager.process_on_chain_nonexistent(block_hash, height);
                return Ok(());
            }
        };

        let meta: ChannelMetadata = decode_base64_field(&channel.meta, "metadata")?;
        let proof: StateProof = decode_base64_field(&channel.proof, "state proof")?;
        let reinit_state = BASE64_STANDARD
            .decode(&channel.reinit)
            .map_err(|_| Error::InvalidParameter("invalid reinit state from GSP".into()))?;
        let dispute_height = channel.disputeheight.unwrap_or(0);

        self.manager.process_on_chain(
            block_hash,
            height,
            &meta,
            &reinit_state,
            &proof,
            dispute_height,
        );
        info!(channel = %self.channel_id_hex, "updated channel from on-chain state");
        Ok(())
    }

    /// Runs the feeder loop until cancelled. Returns an error only for
    /// fatal RPC failures.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        info!("starting chain-to-channel feeder loop...");

        let mut last_block: Option<Hash256> = None;
        self.update_once(&mut last_block).await?;

        loop {
            let known = last_block.map(|h| h.to_hex()).unwrap_or_default();

            let new_block = tokio::select! {
                _ = token.cancelled() => {
                    info!("stopping chain-to-channel feeder loop...");
                    return Ok(());
                }
                result = self.client.wait_for_change(known.clone()) => match result {
                    Ok(new_block) => new_block,
                    Err(err) if is_connector_error(&err) => {
                        // Timeouts of the long-poll are expected; just ask
                        // again.
                        debug!(%err, "error calling waitforchange");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
            };

            if new_block.is_empty() {
                debug!("GSP does not have any state yet");
                continue;
            }
            if new_block == known {
                debug!("we are already at the newest block");
                continue;
            }

            self.update_once(&mut last_block).await?;
        }
    }
}

fn decode_base64_field<T: for<'de> serde::Deserialize<'de>>(
    value: &str,
    what: &str,
) -> Result<T> {
    let bytes = BASE64_STANDARD
        .decode(value)
        .map_err(|_| Error::InvalidParameter(format!("invalid base64 {what} from GSP")))?;
    decode(&bytes).map_err(|_| Error::InvalidParameter(format!("undecodable {what} from GSP")))
}
