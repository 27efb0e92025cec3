//! Game implementations shipping with the node.

pub mod tally;

pub use tally::{TallyChannel, TallyRules, TALLY_GAME_ID};
