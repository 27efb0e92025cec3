//! The tally game: a two-player addition race.
//!
//! The board is `{number, count, winner?}` as JSON. A move `{add: n}`
//! (n >= 1) adds to `number` and bumps the turn count; the player whose
//! move pushes `number` to 100 wins. The turn belongs to player
//! `number % 2`, so making the number even hands the move to player 0 and
//! odd to player 1. Before the second participant joins, the board is a
//! placeholder without turns.

use crate::channel::game::ChannelGame;
use crate::channel::rules::{BoardMove, BoardRules, BoardState, ParsedBoardState, ProtocolVersion};
use crate::channel::sender::MoveSender;
use arena_types::{ChannelMetadata, Hash256};
use base64::prelude::{Engine, BASE64_STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub const TALLY_GAME_ID: &str = "tally";

/// First number that ends the game.
const TARGET: u64 = 100;

/// Cap on a single addition, keeping states readable and sums far from
/// overflow.
const MAX_ADD: u64 = 1_000;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
struct TallyData {
    number: u64,
    count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    winner: Option<usize>,
}

/// The move envelope. Unlike the board state, unknown fields here are
/// rejected outright.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TallyMove {
    add: u64,
}

pub struct ParsedTally {
    channel_id: Hash256,
    meta: ChannelMetadata,
    /// `None` while the channel waits for its second participant.
    data: Option<TallyData>,
}

impl ParsedTally {
    fn waiting(&self) -> bool {
        self.data.is_none()
    }

    pub fn number(&self) -> Option<u64> {
        self.data.as_ref().map(|d| d.number)
    }

    pub fn metadata(&self) -> &ChannelMetadata {
        &self.meta
    }

    pub fn channel_id(&self) -> &Hash256 {
        &self.channel_id
    }
}

impl ParsedBoardState for ParsedTally {
    fn equals(&self, other: &[u8]) -> bool {
        match &self.data {
            // All pre-join placeholders are equivalent.
            None => true,
            Some(data) => match parse_tally_data(&self.meta, other) {
                Some(Some(other_data)) => *data == other_data,
                _ => false,
            },
        }
    }

    fn whose_turn(&self) -> Option<usize> {
        let data = self.data.as_ref()?;
        if data.winner.is_some() {
            return None;
        }
        Some((data.number % 2) as usize)
    }

    fn turn_count(&self) -> u64 {
        self.data.as_ref().map(|d| d.count).unwrap_or(0)
    }

    fn winner(&self) -> Option<usize> {
        self.data.as_ref().and_then(|d| d.winner)
    }

    fn apply_move(&self, mv: &[u8]) -> Option<BoardState> {
        let data = self.data.as_ref()?;
        let mover = self.whose_turn()?;

        let mv: TallyMove = match serde_json::from_slice(mv) {
            Ok(mv) => mv,
            Err(err) => {
                debug!(%err, "malformed tally move");
                return None;
            }
        };
        if mv.add < 1 || mv.add > MAX_ADD {
            debug!(add = mv.add, "tally move out of range");
            return None;
        }

        let mut new_data = data.clone();
        new_data.number += mv.add;
        new_data.count += 1;
        if new_data.number >= TARGET {
            new_data.winner = Some(mover);
        }

        Some(serde_json::to_vec(&new_data).expect("tally state serializes"))
    }

    fn to_json(&self) -> serde_json::Value {
        match &self.data {
            None => json!({ "waiting": true }),
            Some(data) => json!({
                "number": data.number,
                "count": data.count,
                "winner": data.winner,
            }),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parses the encoded state in the context of the metadata. Outer `None`
/// means invalid; inner `None` is the single-participant placeholder.
fn parse_tally_data(meta: &ChannelMetadata, state: &[u8]) -> Option<Option<TallyData>> {
    if meta.participants.len() < 2 {
        // Whatever is stored before the join is a placeholder.
        return Some(None);
    }

    let data: TallyData = match serde_json::from_slice(state) {
        Ok(data) => data,
        Err(err) => {
            debug!(%err, "malformed tally state");
            return None;
        }
    };

    match data.winner {
        Some(winner) if winner > 1 || data.number < TARGET => {
            debug!(winner, number = data.number, "inconsistent tally winner");
            return None;
        }
        None if data.number >= TARGET => {
            debug!(number = data.number, "finished tally state without winner");
            return None;
        }
        _ => (),
    }

    Some(Some(data))
}

#[derive(Default)]
pub struct TallyRules;

impl BoardRules for TallyRules {
    fn parse_state(
        &self,
        channel_id: &Hash256,
        meta: &ChannelMetadata,
        state: &[u8],
    ) -> Option<Box<dyn ParsedBoardState>> {
        let data = parse_tally_data(meta, state)?;
        Some(Box::new(ParsedTally {
            channel_id: *channel_id,
            meta: meta.clone(),
            data,
        }))
    }

    fn protocol_version(&self, _meta: &ChannelMetadata) -> ProtocolVersion {
        ProtocolVersion::Original
    }

    fn initial_board_state(&self) -> BoardState {
        serde_json::to_vec(&TallyData::default()).expect("tally state serializes")
    }
}

/// The daemon-side game hooks for tally.
pub struct TallyChannel {
    player_name: String,
    /// Txid of a loss declaration we already sent and that may still be
    /// pending.
    pending_loss: Mutex<Option<Hash256>>,
}

impl TallyChannel {
    pub fn new(player_name: String) -> Self {
        Self {
            player_name,
            pending_loss: Mutex::new(None),
        }
    }
}

impl ChannelGame for TallyChannel {
    /// Plays `{add: 2}` whenever the number's last digit is 6-9 on our
    /// turn. Two additions of 2 always leave that range, so chains of
    /// automoves terminate.
    fn maybe_auto_move(&self, state: &dyn ParsedBoardState) -> Option<BoardMove> {
        let tally = state
            .as_any()
            .downcast_ref::<ParsedTally>()
            .expect("tally channel driven with foreign board state");
        let number = tally.number()?;
        if number % 10 < 6 {
            return None;
        }
        Some(b"{\"add\":2}".to_vec())
    }

    /// Once the game is decided against us, declare the loss on-chain so
    /// the channel closes without a dispute round-trip.
    fn maybe_on_chain_move(&self, state: &dyn ParsedBoardState, sender: &MoveSender) {
        let tally = state
            .as_any()
            .downcast_ref::<ParsedTally>()
            .expect("tally channel driven with foreign board state");
        let winner = match tally.winner() {
            Some(winner) => winner,
            None => return,
        };

        let meta = tally.metadata();
        let loser = 1 - winner;
        if meta.participants[loser].name != self.player_name {
            return;
        }

        let mut pending = self.pending_loss.lock().expect("pending loss lock");
        if let Some(txid) = *pending {
            if sender.is_pending(&txid) {
                info!(%txid, "we already have a pending loss declaration");
                return;
            }
        }

        let mv = json!({
            "l": {
                "id": tally.channel_id().to_hex(),
                "r": BASE64_STANDARD.encode(&meta.reinit),
            }
        });
        match sender.send_move(&mv) {
            Some(txid) => {
                info!(%txid, "we lost, declaring the loss on-chain");
                *pending = Some(txid);
            }
            None => warn!("failed to send loss declaration"),
        }
    }
}
