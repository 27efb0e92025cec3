use crate::channel::feeder::{ChainFeeder, GspChannelClient};
use crate::rpc::gsp::{GspChannelInfo, GspChannelResponse};
use crate::tests::test_utils::*;
use arena_types::{encode, ChannelMetadata, Hash256, StateProof};
use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_STANDARD};
use jsonrpsee::core::ClientError;
use jsonrpsee::types::ErrorObject;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

enum WaitStep {
    NewBlock(String),
    Timeout,
    Fatal,
}

/// Scripted GSP responses: every `waitforchange` consumes one step, every
/// `getchannel` one response.
struct ScriptedGsp {
    channels: Mutex<VecDeque<GspChannelResponse>>,
    waits: Mutex<VecDeque<WaitStep>>,
    done: CancellationToken,
}

impl ScriptedGsp {
    fn new(
        channels: Vec<GspChannelResponse>,
        waits: Vec<WaitStep>,
        done: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(channels.into()),
            waits: Mutex::new(waits.into()),
            done,
        })
    }
}

#[async_trait]
impl GspChannelClient for Arc<ScriptedGsp> {
    async fn get_channel(&self, _channel_id: String) -> Result<GspChannelResponse, ClientError> {
        match self.channels.lock().unwrap().pop_front() {
            Some(response) => Ok(response),
            None => panic!("unexpected getchannel call"),
        }
    }

    async fn wait_for_change(&self, _known_block: String) -> Result<String, ClientError> {
        let step = self.waits.lock().unwrap().pop_front();
        match step {
            Some(WaitStep::NewBlock(hash)) => Ok(hash),
            Some(WaitStep::Timeout) => Err(ClientError::RequestTimeout),
            Some(WaitStep::Fatal) => Err(ClientError::Call(ErrorObject::owned(
                -32601,
                "method not found",
                None::<()>,
            ))),
            None => {
                // Script exhausted: signal the test and park until it
                // cancels the feeder.
                self.done.cancel();
                futures_pending().await
            }
        }
    }
}

async fn futures_pending() -> Result<String, ClientError> {
    std::future::pending::<()>().await;
    unreachable!()
}

fn block_hash(n: u64) -> Hash256 {
    Hash256::digest(&n.to_be_bytes())
}

fn response_with_channel(
    height: u64,
    meta: &ChannelMetadata,
    reinit_state: &[u8],
    proof: &StateProof,
    dispute: Option<u64>,
) -> GspChannelResponse {
    GspChannelResponse {
        state: "up-to-date".to_string(),
        blockhash: Some(block_hash(height).to_hex()),
        height: Some(height),
        channel: Some(GspChannelInfo {
            id: test_channel_id().to_hex(),
            meta: BASE64_STANDARD.encode(encode(meta)),
            reinit: BASE64_STANDARD.encode(reinit_state),
            proof: BASE64_STANDARD.encode(encode(proof)),
            disputeheight: dispute,
        }),
    }
}

fn response_without_channel(height: u64) -> GspChannelResponse {
    GspChannelResponse {
        state: "up-to-date".to_string(),
        blockhash: Some(block_hash(height).to_hex()),
        height: Some(height),
        channel: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn feeder_applies_updates_and_retries_timeouts() {
    let fx = Arc::new(ManagerFixture::new("alice"));
    let proof = StateProof::from_reinit(&fx.reinit_state);

    let token = CancellationToken::new();
    let client = ScriptedGsp::new(
        vec![
            response_with_channel(100, &fx.meta, &fx.reinit_state, &proof, None),
            response_without_channel(101),
        ],
        vec![
            // One long-poll timeout is retried without refetching.
            WaitStep::Timeout,
            WaitStep::NewBlock(block_hash(101).to_hex()),
        ],
        token.clone(),
    );

    let feeder = ChainFeeder::new(fx.manager.clone(), client);
    let run = tokio::spawn(feeder.run(token.clone()));

    token.cancelled().await;
    run.await.expect("join").expect("feeder exits cleanly");

    // The second update reported the channel as gone again.
    let snapshot = fx.manager.to_json();
    assert_eq!(snapshot["existsonchain"], false);
    assert_eq!(snapshot["height"], 101);

    fx.manager.stop_updates();
}

#[tokio::test(flavor = "multi_thread")]
async fn feeder_skips_updates_while_gsp_catches_up() {
    let fx = Arc::new(ManagerFixture::new("alice"));

    let token = CancellationToken::new();
    let client = ScriptedGsp::new(
        vec![GspChannelResponse {
            state: "catching-up".to_string(),
            blockhash: Some(block_hash(100).to_hex()),
            height: Some(100),
            channel: None,
        }],
        vec![],
        token.clone(),
    );

    let feeder = ChainFeeder::new(fx.manager.clone(), client);
    let run = tokio::spawn(feeder.run(token.clone()));

    token.cancelled().await;
    run.await.expect("join").expect("feeder exits cleanly");

    assert_eq!(fx.manager.to_json()["existsonchain"], false);
    assert!(fx.manager.to_json()["blockhash"].is_null());

    fx.manager.stop_updates();
}

#[tokio::test(flavor = "multi_thread")]
async fn feeder_treats_rpc_errors_as_fatal() {
    let fx = Arc::new(ManagerFixture::new("alice"));
    let proof = StateProof::from_reinit(&fx.reinit_state);

    let token = CancellationToken::new();
    let client = ScriptedGsp::new(
        vec![response_with_channel(
            100,
            &fx.meta,
            &fx.reinit_state,
            &proof,
            None,
        )],
        vec![WaitStep::Fatal],
        token.clone(),
    );

    let feeder = ChainFeeder::new(fx.manager.clone(), client);
    let result = feeder.run(token).await;
    assert!(result.is_err());

    fx.manager.stop_updates();
}
