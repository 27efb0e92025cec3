//! The contract a game implementation must satisfy for its boards to be
//! driven by the channel engine and judged by the arbiter.

use arena_types::{ChannelMetadata, Hash256, StateProof, SIGNATURE_SIZE};
use tracing::warn;

/// The state of the current game board, encoded in a game-specific format.
pub type BoardState = Vec<u8>;

/// The game-specific encoded data of a move in a game channel.
pub type BoardMove = Vec<u8>;

/// Protocol versions of the channel wire format. Games map channel metadata
/// onto the version their states and proofs must conform to, which gates
/// future migrations.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProtocolVersion {
    Original,
}

/// A game-specific parsed view of a board state. Instances are produced by
/// [`BoardRules::parse_state`] and carry everything needed to interpret the
/// state in the context of its channel.
pub trait ParsedBoardState: Send + Sync {
    /// Compares against another encoded board state. Returns true if the
    /// two are equivalent (possibly different encodings of the same
    /// state). The other state may be arbitrary malformed data, in which
    /// case this returns false.
    fn equals(&self, other: &[u8]) -> bool;

    /// The participant index whose turn it is, or `None` when it is
    /// noone's turn (waiting for a join, or the game is finished).
    fn whose_turn(&self) -> Option<usize>;

    /// A number that strictly increases with every move made, used as the
    /// freshness metric between competing states.
    fn turn_count(&self) -> u64;

    /// The participant index that won a finished game, if any.
    fn winner(&self) -> Option<usize> {
        None
    }

    /// Applies a move made by the player whose turn it is. Returns the new
    /// encoded board state, or `None` if the move is illegal here.
    fn apply_move(&self, mv: &[u8]) -> Option<BoardState>;

    /// A JSON representation of the state for frontends. The encoded state
    /// is always reported alongside, so games without a useful JSON view
    /// may leave the default.
    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Lets game hooks recover their own parsed type from the trait
    /// object they are handed back.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// The rules of a channel game. Implementations carry no mutable state and
/// are shared freely across threads.
pub trait BoardRules: Send + Sync {
    /// Parses an encoded board state, returning `None` for malformed or
    /// invariant-violating data.
    fn parse_state(
        &self,
        channel_id: &Hash256,
        meta: &ChannelMetadata,
        state: &[u8],
    ) -> Option<Box<dyn ParsedBoardState>>;

    /// The protocol version proofs must conform to under the given
    /// metadata.
    fn protocol_version(&self, meta: &ChannelMetadata) -> ProtocolVersion;

    /// The canonical initial board state of a fully-joined channel.
    fn initial_board_state(&self) -> BoardState;
}

/// Checks that a state proof conforms to the protocol version the rules
/// select for this channel. For the original version this pins the
/// signature encoding; the structural wire layer already rejects unknown
/// fields by construction.
pub fn check_versioned_proof(
    rules: &dyn BoardRules,
    meta: &ChannelMetadata,
    proof: &StateProof,
) -> bool {
    match rules.protocol_version(meta) {
        ProtocolVersion::Original => {
            let states = std::iter::once(&proof.initial_state)
                .chain(proof.transitions.iter().map(|t| &t.new_state));
            for state in states {
                if state
                    .signatures
                    .iter()
                    .any(|sgn| sgn.len() != SIGNATURE_SIZE)
                {
                    warn!("state proof carries signatures of unexpected size");
                    return false;
                }
            }
            true
        }
    }
}
