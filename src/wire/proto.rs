//! Protobuf messages exchanged between wallets.
//!
//! Addresses, hashes and signatures are raw bytes of their fixed length,
//! amounts are 32 byte big endian integers.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageMsg {
    #[prost(string, tag = "1")]
    pub to: String,
    #[prost(string, tag = "2")]
    pub from: String,
    #[prost(message, optional, tag = "3")]
    pub data: Option<PayloadMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PayloadMsg {
    #[prost(message, repeated, tag = "1")]
    pub signed_states: Vec<SignedStateMsg>,
    #[prost(message, repeated, tag = "2")]
    pub objectives: Vec<ObjectiveMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedStateMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub chain_id: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub participants: Vec<ParticipantMsg>,
    #[prost(uint64, tag = "3")]
    pub channel_nonce: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub app_definition: Vec<u8>,
    #[prost(uint64, tag = "5")]
    pub challenge_duration: u64,
    #[prost(uint64, tag = "6")]
    pub turn_num: u64,
    #[prost(bool, tag = "7")]
    pub is_final: bool,
    #[prost(bytes = "vec", tag = "8")]
    pub app_data: Vec<u8>,
    #[prost(message, repeated, tag = "9")]
    pub outcome: Vec<AssetOutcomeMsg>,
    #[prost(message, repeated, tag = "10")]
    pub signatures: Vec<SignatureMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ParticipantMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub signing_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub destination: Vec<u8>,
    #[prost(string, tag = "3")]
    pub participant_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AssetOutcomeMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub asset_holder: Vec<u8>,
    #[prost(oneof = "asset_outcome_msg::Kind", tags = "2, 3")]
    pub kind: Option<asset_outcome_msg::Kind>,
}

pub mod asset_outcome_msg {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "2")]
        Allocation(super::AllocationMsg),
        #[prost(message, tag = "3")]
        Guarantee(super::GuaranteeMsg),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AllocationMsg {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<AllocationItemMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AllocationItemMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub destination: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub amount: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GuaranteeMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub target_channel_id: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub destinations: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignatureMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub signer: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObjectiveMsg {
    #[prost(enumeration = "ObjectiveType", tag = "1")]
    pub kind: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub channel_id: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ObjectiveType {
    OpenChannel = 0,
    CloseChannel = 1,
}
