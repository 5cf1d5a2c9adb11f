//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use super::{hash_to_eth_signed_msg_hash, Error};
use crate::abiencode::types::{Address, Hash, Signature};
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as k256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha3::{Digest, Keccak256};

/// Holds a private key and the Ethereum address derived from it.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    addr: Address,
}

// Never print the key.
impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        // The uncompressed SEC1 encoding is `0x04 || x || y`. Throw away the
        // first byte, which is not part of the public key.
        let point = key.to_encoded_point(false);
        let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();

        let mut addr = Address([0; 20]);
        addr.0.copy_from_slice(&hash[32 - 20..]);
        addr
    }
}

impl Signer {
    /// Generate a fresh random key.
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        let key = SigningKey::random(rng);
        let addr = key.verifying_key().into();
        Self { key, addr }
    }

    /// Use an existing 32 byte secp256k1 private key.
    pub fn from_private_key(private_key: &[u8; 32]) -> Result<Self, Error> {
        let key = SigningKey::from_bytes(private_key).map_err(|_| Error::InvalidPrivateKey)?;
        let addr = key.verifying_key().into();
        Ok(Self { key, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self
            .key
            .sign_prehash(&hash.0)
            .map_err(|_| Error::SigningFailed)?;

        // This Signature type already has the layout we need: r, s and v in
        // this order. v has to be offset by 27 for the EVM.
        let mut sig_bytes: [u8; 65] = sig
            .as_bytes()
            .try_into()
            .map_err(|_| Error::SigningFailed)?;
        debug_assert!(sig_bytes[32] & 0x80 == 0);
        sig_bytes[64] += 27;

        Ok(Signature(sig_bytes))
    }
}

/// Recover the address that produced `eth_sig` over `msg`.
///
/// `msg` is the hash given to [Signer::sign_eth], without the `Ethereum Signed
/// Message` prefix.
pub fn recover_signer(msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
    let hash = hash_to_eth_signed_msg_hash(msg);

    // Undo adding the 27, to go back to the format expected below
    let mut sig_bytes: [u8; 65] = eth_sig.0;
    sig_bytes[64] = match sig_bytes[64] {
        v @ (27 | 28) => v - 27,
        v => return Err(Error::InvalidRecoveryByte(v)),
    };

    let sig =
        recoverable::Signature::from_bytes(&sig_bytes).map_err(|_| Error::MalformedSignature)?;

    let verifying_key = sig
        .recover_verifying_key_from_digest_bytes(&hash.0.into())
        .map_err(|_| Error::RecoveryFailed)?;
    Ok(verifying_key.into())
}
