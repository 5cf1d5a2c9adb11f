//! Channel data model: the constant part of a channel, the per-turn state
//! variables, outcomes and the generic transition rules every application
//! shares.

mod constants;
mod outcome;
mod state;
mod transition;

#[cfg(test)]
pub(crate) mod test_utils;

pub use constants::*;
pub use outcome::*;
pub use state::*;
pub use transition::*;

/// Index of a participant in the channel.
///
/// `0` is the participant who created the channel, it moves on turn `0`.
pub type PartIdx = usize;
