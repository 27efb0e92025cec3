//! The per-channel coordination engine: board-rules contract, state-proof
//! verification, the rolling per-reinitialisation state cache, the channel
//! manager and its collaborators (move sender, off-chain broadcast, chain
//! feeder).

pub mod broadcast;
pub mod feeder;
pub mod game;
pub mod manager;
pub mod proof;
pub mod rolling;
pub mod rules;
pub mod sender;
pub mod wallet;

pub use broadcast::{NullBroadcast, OffChainBroadcast};
pub use feeder::{ChainFeeder, GspChannelClient};
pub use game::ChannelGame;
pub use manager::{ChannelManager, DisputeData, WAITFORCHANGE_ALWAYS_BLOCK};
pub use proof::{extend_state_proof, verify_state_proof, verify_state_transition, ProofError};
pub use rolling::RollingState;
pub use rules::{check_versioned_proof, BoardMove, BoardRules, BoardState, ParsedBoardState, ProtocolVersion};
pub use sender::{MoveSender, TransactionSender};
pub use wallet::WalletRpcSender;

#[cfg(test)]
mod tests;
