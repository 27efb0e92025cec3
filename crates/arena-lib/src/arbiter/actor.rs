//! The actor owning the GSP game state.
//!
//! Block attaches, detaches and mempool notifications all funnel through
//! one actor, which serialises them and keeps the store, the undo journal
//! and the pending-move tracker consistent with each other.

use crate::arbiter::store::{self, ArbiterStoreRead, TipRow, UndoRow};
use crate::arbiter::{BlockData, ChannelArbiter, MoveEntry, PendingMoves, TipInfo};
use crate::store::{apply_undo, Store};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use strum::AsRefStr;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct ArbiterActor;

pub struct ArbiterActorState {
    arbiter: ChannelArbiter,
    store: Store,
    pending: PendingMoves,
    tip_tx: watch::Sender<TipInfo>,
    synced: bool,
}

#[derive(AsRefStr)]
pub enum ArbiterMessage {
    /// A new block extending the current tip. The reply fires once the
    /// store reflects it.
    AttachBlock(BlockData, RpcReplyPort<()>),
    /// Roll the current tip back using its undo record.
    DetachTip(RpcReplyPort<()>),
    /// A move showed up in the mempool.
    PendingMove(MoveEntry),
    /// The sync loop caught up (or fell behind) the chain.
    SetSynced(bool),
    GetTip(RpcReplyPort<TipInfo>),
    GetPending(RpcReplyPort<serde_json::Value>),
}

pub struct ArbiterActorArgs {
    pub arbiter: ChannelArbiter,
    pub store: Store,
    pub tip_tx: watch::Sender<TipInfo>,
}

impl ArbiterActorState {
    fn tip_info(&self) -> TipInfo {
        match self.store.get_tip() {
            Some(tip) => TipInfo {
                hash: Some(tip.hash),
                height: tip.height,
                synced: self.synced,
            },
            None => TipInfo {
                hash: None,
                height: 0,
                synced: self.synced,
            },
        }
    }

    fn publish_tip(&self) {
        self.tip_tx.send_replace(self.tip_info());
    }

    fn attach_block(&mut self, block: BlockData) {
        if let Some(tip) = self.store.get_tip() {
            if block.parent != tip.hash || block.height != tip.height + 1 {
                warn!(
                    height = block.height,
                    hash = %block.hash,
                    tip = %tip.hash,
                    "block does not extend the current tip, ignoring"
                );
                return;
            }
        }

        let undo = self.arbiter.process_block(&self.store, &block);
        store::put_undo(
            &self.store,
            block.height,
            &UndoRow {
                block_hash: block.hash,
                parent_hash: block.parent,
                undo,
            },
        );
        store::set_tip(
            &self.store,
            &TipRow {
                hash: block.hash,
                height: block.height,
            },
        );

        // Confirmed state moved; the mempool view is rebuilt from the
        // node's next notifications.
        self.pending.clear();
        self.publish_tip();
    }

    fn detach_tip(&mut self) {
        let tip = match self.store.get_tip() {
            Some(tip) => tip,
            None => {
                warn!("no tip to detach");
                return;
            }
        };
        let undo_row = match self.store.get_undo(tip.height) {
            Some(row) => row,
            None => {
                // A reorg deeper than the undo journal cannot be handled
                // incrementally; the operator has to resync from scratch.
                error!(
                    height = tip.height,
                    "no undo data for tip, cannot detach"
                );
                return;
            }
        };
        assert_eq!(
            undo_row.block_hash, tip.hash,
            "undo journal out of sync with tip"
        );

        info!(height = tip.height, hash = %tip.hash, "detaching block");
        apply_undo(&self.store, &undo_row.undo);
        store::delete_undo(&self.store, tip.height);
        store::set_tip(
            &self.store,
            &TipRow {
                hash: undo_row.parent_hash,
                height: tip.height - 1,
            },
        );

        self.pending.clear();
        self.publish_tip();
    }
}

#[async_trait::async_trait]
impl Actor for ArbiterActor {
    type Msg = ArbiterMessage;
    type State = ArbiterActorState;
    type Arguments = ArbiterActorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let state = ArbiterActorState {
            arbiter: args.arbiter,
            store: args.store,
            pending: PendingMoves::new(),
            tip_tx: args.tip_tx,
            synced: false,
        };
        state.publish_tip();
        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ArbiterMessage::AttachBlock(block, reply) => {
                state.attach_block(block);
                let _ = reply.send(());
            }
            ArbiterMessage::DetachTip(reply) => {
                state.detach_tip();
                let _ = reply.send(());
            }
            ArbiterMessage::PendingMove(mv) => {
                state
                    .pending
                    .add_pending_move(&state.arbiter, &state.store, &mv);
            }
            ArbiterMessage::SetSynced(synced) => {
                if state.synced != synced {
                    info!(synced, "sync state changed");
                    state.synced = synced;
                    state.publish_tip();
                }
            }
            ArbiterMessage::GetTip(reply) => {
                let _ = reply.send(state.tip_info());
            }
            ArbiterMessage::GetPending(reply) => {
                let _ = reply.send(state.pending.to_json());
            }
        }
        Ok(())
    }
}
