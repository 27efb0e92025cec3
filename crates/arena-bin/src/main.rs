use std::{fs::File, io::BufReader, path::PathBuf, process::exit, str::FromStr, sync::Arc};

use arena_lib::arbiter::{ArbiterActor, ArbiterActorArgs, ChannelArbiter, TipInfo};
use arena_lib::arbiter::sync::{run_sync, NodeRpcClient};
use arena_lib::channel::{
    ChainFeeder, ChannelManager, MoveSender, NullBroadcast, WalletRpcSender,
};
use arena_lib::config::{ChannelConfig, GspConfig};
use arena_lib::games::{TallyChannel, TallyRules, TALLY_GAME_ID};
use arena_lib::rpc::channel::{ChannelRpcServer, ChannelRpcServerImpl};
use arena_lib::rpc::gsp::{GspRpcServer, GspRpcServerImpl};
use arena_lib::rpc::start_server;
use arena_lib::store::Store;
use arena_lib::tasks;
use arena_types::{Secp256k1Signer, Secp256k1Verifier};
use clap_serde_derive::{
    clap::{self, Parser},
    ClapSerde,
};
use jsonrpsee::http_client::HttpClientBuilder;
use ractor::Actor;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE_NAME: &str = "config.yml";

fn get_default_base_dir() -> PathBuf {
    let mut path = home::home_dir().expect("get home directory");
    path.push(".arena-node");
    path
}

#[derive(Deserialize, Copy, Clone, Debug, PartialEq)]
enum Service {
    #[serde(alias = "gsp", alias = "GSP")]
    Gsp,
    #[serde(alias = "channel", alias = "CHANNEL")]
    Channel,
}

impl FromStr for Service {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gsp" | "GSP" => Ok(Self::Gsp),
            "channel" | "CHANNEL" => Ok(Self::Channel),
            _ => Err(format!("invalid service {}", s)),
        }
    }
}

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// config file [default: $BASE_DIR/config.yml]
    #[arg(short, long = "config")]
    config_file: Option<PathBuf>,

    /// base directory for all state
    #[arg(short = 'd', long = "dir", help = format!("base directory [default: {:?}]", get_default_base_dir()))]
    base_dir: Option<PathBuf>,

    /// services to run (any of `gsp`/`channel`, separated by `,`)
    #[arg(short, long, value_parser, num_args = 0.., value_delimiter = ',')]
    services: Vec<Service>,

    /// config for the GSP (arbiter) service
    #[command(flatten)]
    pub gsp: <GspConfig as ClapSerde>::Opt,

    /// config for the channel daemon service
    #[command(flatten)]
    pub channel: <ChannelConfig as ClapSerde>::Opt,
}

#[derive(Deserialize, Default)]
struct SerializedConfig {
    services: Option<Vec<Service>>,
    gsp: Option<<GspConfig as ClapSerde>::Opt>,
    channel: Option<<ChannelConfig as ClapSerde>::Opt>,
}

struct Config {
    base_dir: PathBuf,
    gsp: Option<GspConfig>,
    channel: Option<ChannelConfig>,
}

fn load_config() -> Config {
    let mut args = Args::parse();
    let base_dir = args.base_dir.clone().unwrap_or_else(get_default_base_dir);
    let config_file = args
        .config_file
        .clone()
        .unwrap_or_else(|| base_dir.join(DEFAULT_CONFIG_FILE_NAME));

    let from_file: SerializedConfig = match File::open(&config_file) {
        Ok(f) => match serde_yaml::from_reader(BufReader::new(f)) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error in configuration file {:?}: {}", config_file, err);
                exit(1);
            }
        },
        Err(_) => SerializedConfig::default(),
    };

    let mut services = from_file.services.unwrap_or_default();
    services.extend(args.services.iter().copied());
    if services.is_empty() {
        eprintln!("no services to run, pass e.g. `--services gsp` or set them in the config file");
        exit(1);
    }

    let gsp = services.contains(&Service::Gsp).then(|| match from_file.gsp {
        Some(opt) => GspConfig::from(opt).merge(&mut args.gsp),
        None => GspConfig::from(&mut args.gsp),
    });
    let channel = services
        .contains(&Service::Channel)
        .then(|| match from_file.channel {
            Some(opt) => ChannelConfig::from(opt).merge(&mut args.channel),
            None => ChannelConfig::from(&mut args.channel),
        });

    Config {
        base_dir,
        gsp,
        channel,
    }
}

async fn start_gsp(config: GspConfig, base_dir: &std::path::Path) -> anyhow::Result<()> {
    let store = Store::new(config.data_dir(base_dir)).map_err(anyhow::Error::msg)?;

    let arbiter = ChannelArbiter::new(
        TALLY_GAME_ID.to_string(),
        Arc::new(TallyRules),
        Arc::new(Secp256k1Verifier),
    );

    let (tip_tx, tip_rx) = watch::channel(TipInfo::default());
    let (actor, _actor_handle) = Actor::spawn(
        Some("arbiter".to_string()),
        ArbiterActor,
        ArbiterActorArgs {
            arbiter,
            store: store.clone(),
            tip_tx,
        },
    )
    .await?;

    let node_client = NodeRpcClient::new(config.node_rpc_url())?;
    let sync_actor = actor.clone();
    let sync_token = tasks::new_cancellation_token();
    tasks::spawn(async move {
        if let Err(err) = run_sync(sync_actor, node_client, sync_token.clone()).await {
            error!(%err, "block sync failed");
            sync_token.cancel();
        }
    });

    let rpc = GspRpcServerImpl::new(store, tip_rx, actor);
    let (handle, _addr) = start_server(config.rpc_addr(), rpc.into_rpc()).await?;
    let token = tasks::new_cancellation_token();
    tasks::spawn(async move {
        token.cancelled().await;
        let _ = handle.stop();
        handle.stopped().await;
    });

    info!("GSP service started");
    Ok(())
}

async fn start_channel(config: ChannelConfig) -> anyhow::Result<Arc<ChannelManager>> {
    let channel_id = config.channel_id()?;
    let player_name = config.player_name()?.to_string();
    let key = config.read_secret_key()?;

    let rules = Arc::new(TallyRules);
    let game = Arc::new(TallyChannel::new(player_name.clone()));
    let wallet = Arc::new(WalletRpcSender::new(config.wallet_rpc_url())?);
    let move_sender = MoveSender::new(
        TALLY_GAME_ID.to_string(),
        channel_id,
        player_name.clone(),
        wallet,
        game.clone(),
    );

    let manager = Arc::new(ChannelManager::new(
        rules,
        game,
        Arc::new(Secp256k1Verifier),
        Arc::new(Secp256k1Signer::new(key)),
        TALLY_GAME_ID.to_string(),
        channel_id,
        player_name,
        Arc::new(NullBroadcast),
        move_sender,
    ));

    let gsp_client = HttpClientBuilder::default()
        .request_timeout(std::time::Duration::from_secs(6))
        .build(config.gsp_rpc_url())?;
    let feeder = ChainFeeder::new(manager.clone(), gsp_client);
    let feeder_token = tasks::new_cancellation_token();
    tasks::spawn(async move {
        if let Err(err) = feeder.run(feeder_token.clone()).await {
            error!(%err, "chain feeder failed");
            feeder_token.cancel();
        }
    });

    let rpc = ChannelRpcServerImpl::new(manager.clone(), tasks::new_cancellation_token());
    let (handle, _addr) = start_server(config.rpc_addr(), rpc.into_rpc()).await?;
    let token = tasks::new_cancellation_token();
    tasks::spawn(async move {
        token.cancelled().await;
        let _ = handle.stop();
        handle.stopped().await;
    });

    info!(channel = %channel_id, "channel daemon started");
    Ok(manager)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = load_config();

    if let Some(gsp_config) = config.gsp {
        if let Err(err) = start_gsp(gsp_config, &config.base_dir).await {
            error!(%err, "failed to start GSP service");
            exit(1);
        }
    }

    let manager = match config.channel {
        Some(channel_config) => match start_channel(channel_config).await {
            Ok(manager) => Some(manager),
            Err(err) => {
                error!(%err, "failed to start channel daemon");
                exit(1);
            }
        },
        None => None,
    };

    let token = tasks::new_cancellation_token();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
        _ = token.cancelled() => info!("a service failed, shutting down"),
    }

    if let Some(manager) = manager {
        manager.stop_updates();
    }
    tasks::cancel_tasks_and_wait_for_completion().await;
}
