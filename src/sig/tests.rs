use super::{recover_signer, Error, Signer};
use crate::abiencode::{hash_tokens, types::Address, Token};
use crate::Hash;
use rand::{rngs::StdRng, SeedableRng};

fn data() -> Hash {
    /*
    ```solidity
    function verify_sig(address signer, bytes memory sig) public pure {
        bytes memory d;
        d = "\xa1\xa2\xa3\xa4";
        require(Sig.verify(abi.encode(d), sig, signer), "invalid signature");
    }
    ```
    */
    hash_tokens(&[Token::Bytes(vec![0xa1, 0xa2, 0xa3, 0xa4])])
}

#[test]
fn known_private_key_has_known_address() {
    let mut key = [0u8; 32];
    key[31] = 1;
    let signer = Signer::from_private_key(&key).unwrap();

    let expected: Address = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".parse().unwrap();
    assert_eq!(signer.address(), expected);
}

#[test]
fn zero_private_key_is_rejected() {
    assert_eq!(
        Signer::from_private_key(&[0u8; 32]).unwrap_err(),
        Error::InvalidPrivateKey
    );
}

#[test]
fn seeded_signers_are_deterministic() {
    // Do not use that on any real device, this is just for testing.
    let a = Signer::new(&mut StdRng::seed_from_u64(0));
    let b = Signer::new(&mut StdRng::seed_from_u64(0));
    assert_eq!(a.address(), b.address());

    // RFC6979 nonces: same key and message give the same signature.
    assert_eq!(a.sign_eth(data()).unwrap(), b.sign_eth(data()).unwrap());
}

#[test]
fn sign_and_recover() {
    let mut rng = StdRng::seed_from_u64(0);
    let signer = Signer::new(&mut rng);
    let msg = data();
    let sig = signer.sign_eth(msg).unwrap();

    assert!(sig.0[64] == 27 || sig.0[64] == 28);
    assert_eq!(recover_signer(msg, sig).unwrap(), signer.address());
}

#[test]
fn recovering_with_other_message_gives_other_address() {
    let mut rng = StdRng::seed_from_u64(1);
    let signer = Signer::new(&mut rng);
    let sig = signer.sign_eth(data()).unwrap();

    let other = hash_tokens(&[Token::uint(1u64)]);
    // Either recovery fails or it produces an unrelated key.
    if let Ok(addr) = recover_signer(other, sig) {
        assert_ne!(addr, signer.address());
    }
}

#[test]
fn invalid_v_is_rejected() {
    let mut rng = StdRng::seed_from_u64(2);
    let signer = Signer::new(&mut rng);
    let mut sig = signer.sign_eth(data()).unwrap();
    sig.0[64] = 3;
    assert_eq!(
        recover_signer(data(), sig).unwrap_err(),
        Error::InvalidRecoveryByte(3)
    );
}
