//! Service configuration, merged from the YAML config file and
//! command-line/environment flags.

use crate::{Error, Result};
use arena_types::{Hash256, Privkey};
use clap_serde_derive::{
    clap::{self},
    ClapSerde,
};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_GSP_RPC_URL: &str = "http://127.0.0.1:8599";
pub const DEFAULT_GSP_RPC_ADDR: &str = "127.0.0.1:8599";
pub const DEFAULT_CHANNEL_RPC_ADDR: &str = "127.0.0.1:8600";
pub const DEFAULT_NODE_RPC_URL: &str = "http://127.0.0.1:18443";
pub const DEFAULT_WALLET_RPC_URL: &str = "http://127.0.0.1:18443/wallet/game";

/// Config of the GSP (arbiter) service.
#[derive(ClapSerde, Debug, Clone)]
pub struct GspConfig {
    /// directory for the channel table and undo journal [default: $BASE_DIR/gsp]
    #[arg(name = "GSP_DATA_DIR", long = "gsp-data-dir", env)]
    pub data_dir: Option<PathBuf>,

    /// JSON-RPC endpoint of the base-chain node
    #[arg(name = "GSP_NODE_RPC_URL", long = "gsp-node-rpc-url", env)]
    pub node_rpc_url: Option<String>,

    /// listen address of the GSP JSON-RPC server
    #[arg(name = "GSP_RPC_ADDR", long = "gsp-rpc-addr", env)]
    pub rpc_addr: Option<String>,
}

impl GspConfig {
    pub fn data_dir(&self, base_dir: &std::path::Path) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| base_dir.join("gsp"))
    }

    pub fn node_rpc_url(&self) -> &str {
        self.node_rpc_url
            .as_deref()
            .unwrap_or(DEFAULT_NODE_RPC_URL)
    }

    pub fn rpc_addr(&self) -> &str {
        self.rpc_addr.as_deref().unwrap_or(DEFAULT_GSP_RPC_ADDR)
    }
}

/// Config of a channel daemon.
#[derive(ClapSerde, Debug, Clone)]
pub struct ChannelConfig {
    /// JSON-RPC endpoint of the GSP node
    #[arg(name = "CHANNEL_GSP_RPC_URL", long = "channel-gsp-rpc-url", env)]
    pub gsp_rpc_url: Option<String>,

    /// JSON-RPC endpoint of the wallet used to send moves
    #[arg(name = "CHANNEL_WALLET_RPC_URL", long = "channel-wallet-rpc-url", env)]
    pub wallet_rpc_url: Option<String>,

    /// id of the channel to manage, as hex
    #[arg(name = "CHANNEL_ID", long = "channel-id", env)]
    pub channel_id: Option<String>,

    /// our on-chain player name
    #[arg(name = "CHANNEL_PLAYER_NAME", long = "channel-player-name", env)]
    pub player_name: Option<String>,

    /// file holding the hex-encoded signing key
    #[arg(name = "CHANNEL_KEY_FILE", long = "channel-key-file", env)]
    pub key_file: Option<PathBuf>,

    /// listen address of the channel daemon JSON-RPC server
    #[arg(name = "CHANNEL_RPC_ADDR", long = "channel-rpc-addr", env)]
    pub rpc_addr: Option<String>,
}

impl ChannelConfig {
    pub fn gsp_rpc_url(&self) -> &str {
        self.gsp_rpc_url.as_deref().unwrap_or(DEFAULT_GSP_RPC_URL)
    }

    pub fn wallet_rpc_url(&self) -> &str {
        self.wallet_rpc_url
            .as_deref()
            .unwrap_or(DEFAULT_WALLET_RPC_URL)
    }

    pub fn rpc_addr(&self) -> &str {
        self.rpc_addr.as_deref().unwrap_or(DEFAULT_CHANNEL_RPC_ADDR)
    }

    pub fn channel_id(&self) -> Result<Hash256> {
        self.channel_id
            .as_deref()
            .ok_or_else(|| Error::InvalidParameter("channel id is required".into()))?
            .parse()
            .map_err(|_| Error::InvalidParameter("channel id must be a 256-bit hex value".into()))
    }

    pub fn player_name(&self) -> Result<&str> {
        self.player_name
            .as_deref()
            .ok_or_else(|| Error::InvalidParameter("player name is required".into()))
    }

    /// Reads the signing key from the configured key file.
    pub fn read_secret_key(&self) -> Result<Privkey> {
        let path = self
            .key_file
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("key file is required".into()))?;
        let content = fs::read_to_string(path)?;
        let bytes = hex::decode(content.trim())
            .map_err(|_| Error::InvalidParameter("key file is not valid hex".into()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidParameter("key file must hold 32 bytes".into()))?;
        Ok(Privkey::from(bytes))
    }
}
