//! Off-chain consensus for Nitro state channels.
//!
//! States are validated and stored per channel by [store::ChannelStore],
//! ledger channels between a hub and its peers are driven by
//! [ledger::LedgerChannelManager] and applications use the
//! [wallet::Wallet]. The blockchain is reached through
//! [chain::ChainService], whose events are deduplicated by
//! [chain::ChainEventTracker].

pub mod abiencode {
    mod decode;
    mod error;
    mod hashing;
    mod token;

    pub mod as_hex;
    pub mod types;

    pub use decode::{decode, decode_canonical, ParamType};
    pub use error::{Error, Result};
    pub use hashing::{hash_tokens, keccak, to_hash};
    pub use token::{encode, to_writer, Token, Tokenize, Writer};

    #[cfg(test)]
    pub mod tests;
}
pub mod sig;

pub mod app;
pub mod channel;
pub mod store;

pub mod chain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod repository;
pub mod wallet;
pub mod wire;

pub use abiencode::types::{Address, Bytes32, Hash, Signature, U256};
pub use error::{Error, ErrorKind};
