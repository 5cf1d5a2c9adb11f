//! Wallet-to-wallet messages and how they are sent.

mod encoding;
pub mod proto;

use core::fmt::Debug;

pub use encoding::{decode_message, ProtoBufEncodingLayer};

use crate::{
    abiencode::types::{Address, Bytes32, Hash, Signature, U256},
    channel::{
        AllocationItem, AssetOutcome, ChannelConstants, Guarantee, Outcome, Participant,
        SignatureEntry, SignedState, State, StateVariables,
    },
};
use proto::{asset_outcome_msg, ObjectiveType};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("field has the wrong number of bytes")]
    ByteLengthMismatch,
    #[error("required field is missing")]
    ExpectedSome,
    #[error("unknown objective type {0}")]
    UnknownObjective(i32),
    #[error("message of {0} bytes does not fit the length prefix")]
    TooLarge(usize),
    #[error("message is shorter than its length prefix")]
    Truncated,
    #[error(transparent)]
    Encode(#[from] prost::EncodeError),
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),
}

/// What the sender wants to achieve with the states it sends along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    OpenChannel { channel_id: Hash },
    CloseChannel { channel_id: Hash },
}

impl Objective {
    pub fn channel_id(&self) -> Hash {
        match self {
            Objective::OpenChannel { channel_id } | Objective::CloseChannel { channel_id } => {
                *channel_id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    pub signed_states: Vec<SignedState>,
    pub objectives: Vec<Objective>,
}

/// A payload addressed by participant id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub from: String,
    pub data: Payload,
}

/// Transport for encoded messages.
pub trait BytesBus: Debug + Send + Sync {
    fn send_to(&self, recipient: &str, msg: &[u8]);
}

/// Transport for messages, usually a [ProtoBufEncodingLayer] on top of a
/// [BytesBus].
pub trait MessageBus: Debug + Send + Sync {
    fn send(&self, msg: Message) -> Result<(), WireError>;
}

fn fixed<const N: usize>(bytes: Vec<u8>) -> Result<[u8; N], WireError> {
    bytes.try_into().or(Err(WireError::ByteLengthMismatch))
}

fn u256_from_bytes(bytes: Vec<u8>) -> Result<U256, WireError> {
    Ok(U256::from_big_endian(&fixed::<32>(bytes)?))
}

impl From<&Participant> for proto::ParticipantMsg {
    fn from(p: &Participant) -> Self {
        Self {
            signing_address: p.signing_address.0.to_vec(),
            destination: p.destination.0.to_vec(),
            participant_id: p.participant_id.clone(),
        }
    }
}

impl TryFrom<proto::ParticipantMsg> for Participant {
    type Error = WireError;

    fn try_from(value: proto::ParticipantMsg) -> Result<Self, Self::Error> {
        Ok(Participant {
            signing_address: Address(fixed(value.signing_address)?),
            destination: Bytes32(fixed(value.destination)?),
            participant_id: value.participant_id,
        })
    }
}

impl From<&AssetOutcome> for proto::AssetOutcomeMsg {
    fn from(value: &AssetOutcome) -> Self {
        let kind = match value {
            AssetOutcome::Allocation { items, .. } => {
                asset_outcome_msg::Kind::Allocation(proto::AllocationMsg {
                    items: items
                        .iter()
                        .map(|i| proto::AllocationItemMsg {
                            destination: i.destination.0.to_vec(),
                            amount: i.amount.to_be_bytes().to_vec(),
                        })
                        .collect(),
                })
            }
            AssetOutcome::Guarantee { guarantee, .. } => {
                asset_outcome_msg::Kind::Guarantee(proto::GuaranteeMsg {
                    target_channel_id: guarantee.target_channel_id.0.to_vec(),
                    destinations: guarantee.destinations.iter().map(|d| d.0.to_vec()).collect(),
                })
            }
        };
        Self {
            asset_holder: value.asset_holder().0.to_vec(),
            kind: Some(kind),
        }
    }
}

impl TryFrom<proto::AssetOutcomeMsg> for AssetOutcome {
    type Error = WireError;

    fn try_from(value: proto::AssetOutcomeMsg) -> Result<Self, Self::Error> {
        let asset_holder = Address(fixed(value.asset_holder)?);
        match value.kind.ok_or(WireError::ExpectedSome)? {
            asset_outcome_msg::Kind::Allocation(a) => Ok(AssetOutcome::Allocation {
                asset_holder,
                items: a
                    .items
                    .into_iter()
                    .map(|i| {
                        Ok(AllocationItem {
                            destination: Bytes32(fixed(i.destination)?),
                            amount: u256_from_bytes(i.amount)?,
                        })
                    })
                    .collect::<Result<_, WireError>>()?,
            }),
            asset_outcome_msg::Kind::Guarantee(g) => Ok(AssetOutcome::Guarantee {
                asset_holder,
                guarantee: Guarantee {
                    target_channel_id: Hash(fixed(g.target_channel_id)?),
                    destinations: g
                        .destinations
                        .into_iter()
                        .map(|d| Ok(Bytes32(fixed(d)?)))
                        .collect::<Result<_, WireError>>()?,
                },
            }),
        }
    }
}

impl From<&SignedState> for proto::SignedStateMsg {
    fn from(value: &SignedState) -> Self {
        let State { constants, vars } = &value.state;
        Self {
            chain_id: constants.chain_id.to_be_bytes().to_vec(),
            participants: constants.participants.iter().map(Into::into).collect(),
            channel_nonce: constants.channel_nonce,
            app_definition: constants.app_definition.0.to_vec(),
            challenge_duration: constants.challenge_duration,
            turn_num: vars.turn_num,
            is_final: vars.is_final,
            app_data: vars.app_data.clone(),
            outcome: vars.outcome.0.iter().map(Into::into).collect(),
            signatures: value
                .signatures
                .iter()
                .map(|s| proto::SignatureMsg {
                    signer: s.signer.0.to_vec(),
                    signature: s.signature.0.to_vec(),
                })
                .collect(),
        }
    }
}

impl TryFrom<proto::SignedStateMsg> for SignedState {
    type Error = WireError;

    fn try_from(value: proto::SignedStateMsg) -> Result<Self, Self::Error> {
        let constants = ChannelConstants {
            chain_id: u256_from_bytes(value.chain_id)?,
            participants: value
                .participants
                .into_iter()
                .map(TryInto::try_into)
                .collect::<Result<_, _>>()?,
            channel_nonce: value.channel_nonce,
            app_definition: Address(fixed(value.app_definition)?),
            challenge_duration: value.challenge_duration,
        };
        let vars = StateVariables {
            turn_num: value.turn_num,
            is_final: value.is_final,
            app_data: value.app_data,
            outcome: Outcome(
                value
                    .outcome
                    .into_iter()
                    .map(TryInto::try_into)
                    .collect::<Result<_, _>>()?,
            ),
        };
        let signatures = value
            .signatures
            .into_iter()
            .map(|s| {
                Ok(SignatureEntry {
                    signer: Address(fixed(s.signer)?),
                    signature: Signature(fixed(s.signature)?),
                })
            })
            .collect::<Result<_, WireError>>()?;
        // Signatures are not verified here, the receiving store does that.
        Ok(SignedState {
            state: State { constants, vars },
            signatures,
        })
    }
}

impl From<&Objective> for proto::ObjectiveMsg {
    fn from(value: &Objective) -> Self {
        let kind = match value {
            Objective::OpenChannel { .. } => ObjectiveType::OpenChannel,
            Objective::CloseChannel { .. } => ObjectiveType::CloseChannel,
        };
        Self {
            kind: kind as i32,
            channel_id: value.channel_id().0.to_vec(),
        }
    }
}

impl TryFrom<proto::ObjectiveMsg> for Objective {
    type Error = WireError;

    fn try_from(value: proto::ObjectiveMsg) -> Result<Self, Self::Error> {
        let channel_id = Hash(fixed(value.channel_id)?);
        match ObjectiveType::from_i32(value.kind) {
            Some(ObjectiveType::OpenChannel) => Ok(Objective::OpenChannel { channel_id }),
            Some(ObjectiveType::CloseChannel) => Ok(Objective::CloseChannel { channel_id }),
            None => Err(WireError::UnknownObjective(value.kind)),
        }
    }
}

impl From<&Message> for proto::MessageMsg {
    fn from(value: &Message) -> Self {
        Self {
            to: value.to.clone(),
            from: value.from.clone(),
            data: Some(proto::PayloadMsg {
                signed_states: value.data.signed_states.iter().map(Into::into).collect(),
                objectives: value.data.objectives.iter().map(Into::into).collect(),
            }),
        }
    }
}

impl TryFrom<proto::MessageMsg> for Message {
    type Error = WireError;

    fn try_from(value: proto::MessageMsg) -> Result<Self, Self::Error> {
        let data = value.data.ok_or(WireError::ExpectedSome)?;
        Ok(Message {
            to: value.to,
            from: value.from,
            data: Payload {
                signed_states: data
                    .signed_states
                    .into_iter()
                    .map(TryInto::try_into)
                    .collect::<Result<_, _>>()?,
                objectives: data
                    .objectives
                    .into_iter()
                    .map(TryInto::try_into)
                    .collect::<Result<_, _>>()?,
            },
        })
    }
}
