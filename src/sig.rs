//! Handles the creation and verification of (Ethereum) Signatures.
//!
//! States are signed the way `eth_sign`/`personal_sign` does it: the state
//! hash is prefixed and hashed again before signing. The on-chain
//! adjudicator recovers signers the same way.

use crate::abiencode::types::Hash;
use sha3::{Digest, Keccak256};

mod k256;
pub use self::k256::{recover_signer, Signer};

#[cfg(test)]
mod tests;

/// Errors from key handling and signer recovery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid recovery byte v = {0}")]
    InvalidRecoveryByte(u8),
    #[error("malformed signature")]
    MalformedSignature,
    #[error("could not recover signer")]
    RecoveryFailed,
    #[error("signing failed")]
    SigningFailed,
}

/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the abi encoder
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}
