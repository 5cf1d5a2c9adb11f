use super::PartIdx;
use crate::abiencode::{
    hash_tokens,
    types::{Address, Bytes32, Hash, U256},
    Token,
};
use serde::{Deserialize, Serialize};

/// A member of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Key used to sign states.
    pub signing_address: Address,
    /// Where this participant's funds go when the channel is settled.
    pub destination: Bytes32,
    /// Off-chain identity, used to route messages.
    pub participant_id: String,
}

/// The part of a channel that never changes between turns.
///
/// Two states belong to the same channel if and only if their constants are
/// identical, which in turn is the case iff their channel ids match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConstants {
    pub chain_id: U256,
    pub participants: Vec<Participant>,
    pub channel_nonce: u64,
    pub app_definition: Address,
    pub challenge_duration: u64,
}

impl ChannelConstants {
    /// `keccak256(abi.encode(chainId, participants, channelNonce))`
    pub fn channel_id(&self) -> Hash {
        let participants = self
            .participants
            .iter()
            .map(|p| Token::Address(p.signing_address))
            .collect();
        hash_tokens(&[
            Token::Uint(self.chain_id),
            Token::Array(participants),
            Token::uint(self.channel_nonce),
        ])
    }

    pub fn num_participants(&self) -> usize {
        self.participants.len()
    }

    pub fn signing_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.participants.iter().map(|p| p.signing_address)
    }

    /// Index of the participant that signs with `addr`.
    pub fn index_of(&self, addr: &Address) -> Option<PartIdx> {
        self.participants
            .iter()
            .position(|p| &p.signing_address == addr)
    }

    /// Participant whose move `turn_num` is.
    ///
    /// Panics if the channel has no participants, channels are rejected
    /// before that can happen.
    pub fn mover_index(&self, turn_num: u64) -> PartIdx {
        (turn_num % self.participants.len() as u64) as PartIdx
    }

    pub fn mover(&self, turn_num: u64) -> &Participant {
        &self.participants[self.mover_index(turn_num)]
    }

    /// First turn number after the setup phase (pre-fund and post-fund
    /// rounds).
    pub fn app_phase_start(&self) -> u64 {
        2 * self.participants.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_utils::{constants, signers};

    #[test]
    fn channel_id_matches_manual_encoding() {
        let c = constants(&signers(2));

        let mut encoded = Vec::new();
        encoded.extend_from_slice(&U256::from(9001u64).to_be_bytes());
        encoded.extend_from_slice(&U256::from(0x60u64).to_be_bytes()); // offset of the array
        encoded.extend_from_slice(&U256::from(5u64).to_be_bytes());
        encoded.extend_from_slice(&U256::from(2u64).to_be_bytes()); // array length
        for p in &c.participants {
            encoded.extend_from_slice(&Bytes32::from(p.signing_address).0);
        }

        assert_eq!(c.channel_id(), crate::abiencode::keccak(&encoded));
    }

    #[test]
    fn channel_id_depends_on_nonce_and_order() {
        let s = signers(2);
        let c = constants(&s);

        let mut other_nonce = c.clone();
        other_nonce.channel_nonce += 1;
        assert_ne!(c.channel_id(), other_nonce.channel_id());

        let mut swapped = c.clone();
        swapped.participants.reverse();
        assert_ne!(c.channel_id(), swapped.channel_id());

        // The app definition is not part of the channel id.
        let mut other_app = c.clone();
        other_app.app_definition = Address([0xbb; 20]);
        assert_eq!(c.channel_id(), other_app.channel_id());
    }

    #[test]
    fn mover_rotates() {
        let c = constants(&signers(3));
        let movers: Vec<_> = (0..7).map(|t| c.mover_index(t)).collect();
        assert_eq!(movers, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(c.app_phase_start(), 6);
        assert_eq!(c.index_of(&c.participants[2].signing_address), Some(2));
        assert_eq!(c.index_of(&Address([1; 20])), None);
    }
}
