//! Wallet-backed submission of raw on-chain moves.

use crate::block_in_place;
use crate::channel::sender::TransactionSender;
use arena_types::Hash256;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::warn;

const WALLET_RPC_TIMEOUT: Duration = Duration::from_secs(6);

/// Submits name updates through the wallet of a naming-chain node.
pub struct WalletRpcSender {
    client: HttpClient,
}

impl WalletRpcSender {
    pub fn new(url: &str) -> crate::Result<Self> {
        let client = HttpClientBuilder::default()
            .request_timeout(WALLET_RPC_TIMEOUT)
            .build(url)?;
        Ok(Self { client })
    }
}

impl TransactionSender for WalletRpcSender {
    fn send_raw_move(&self, name: &str, value: &str) -> anyhow::Result<Hash256> {
        block_in_place(|| {
            Handle::current().block_on(async {
                let txid: String = self
                    .client
                    .request("name_update", rpc_params![name, value])
                    .await?;
                Ok(txid.parse()?)
            })
        })
    }

    fn is_pending(&self, txid: &Hash256) -> bool {
        let hex = txid.to_hex();
        block_in_place(|| {
            Handle::current().block_on(async {
                let pending: Result<Vec<serde_json::Value>, _> =
                    self.client.request("name_pending", rpc_params![]).await;
                match pending {
                    Ok(entries) => entries
                        .iter()
                        .any(|entry| entry.get("txid").and_then(|v| v.as_str()) == Some(&hex)),
                    Err(err) => {
                        warn!(%err, "failed to query pending name operations");
                        false
                    }
                }
            })
        })
    }
}
