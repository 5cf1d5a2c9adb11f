use core::fmt::{Debug, Display};
use core::str::FromStr;

use rand::{distributions::Standard, prelude::Distribution};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uint::construct_uint;

/// Error returned when parsing one of the fixed-size byte types from a hex
/// string.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseHexError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

fn parse_hex_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseHexError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| ParseHexError::Length {
        expected: N,
        actual,
    })
}

macro_rules! impl_hex_fmt {
    ($T:ident) => {
        impl Debug for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }

        impl Display for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                Debug::fmt(self, f)
            }
        }

        impl FromStr for $T {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($T(parse_hex_fixed(s)?))
            }
        }

        // Persisted records and config files use `0x`-prefixed hex strings,
        // the ABI representation lives in `abiencode::Token`.
        impl Serialize for $T {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $T {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

macro_rules! bytesN {
    ( $T:ident, $N:literal ) => {
        #[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                $T(rng.gen())
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl_hex_fmt!($T);
    };
}

bytesN!(Bytes32, 32);
bytesN!(Hash, 32);
bytesN!(Signature, 65);
bytesN!(Address, 20);

impl Signature {
    pub fn new(rs: &[u8; 64], v: u8) -> Self {
        let mut sig: Signature = Signature([0; 65]);
        sig.0[..64].copy_from_slice(rs);
        sig.0[64] = v;
        sig
    }
}

impl From<Address> for Bytes32 {
    /// Left-pads the address, this is how external destinations are
    /// represented inside an outcome.
    fn from(addr: Address) -> Self {
        let mut bytes = [0u8; 32];
        bytes[32 - 20..].copy_from_slice(&addr.0);
        Bytes32(bytes)
    }
}

impl From<Hash> for Bytes32 {
    fn from(hash: Hash) -> Self {
        Bytes32(hash.0)
    }
}

construct_uint! {
    pub struct U256(4);
}

impl U256 {
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        bytes
    }
}

// Amounts leave the crate as decimal strings, large values don't survive a
// round trip through JSON numbers.
impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(de::Error::custom)
    }
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let buf: [u8; 32] = rng.gen();
        U256::from_big_endian(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_roundtrip() {
        let addr: Address = "0x5B38Da6a701c568545dCfcB03FcB875f56beddC4".parse().unwrap();
        assert_eq!(
            addr.to_string(),
            "0x5b38da6a701c568545dcfcb03fcb875f56beddc4"
        );
        assert_eq!(addr, addr.to_string().parse().unwrap());
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = "0x1234".parse::<Address>().unwrap_err();
        assert_eq!(
            err,
            ParseHexError::Length {
                expected: 20,
                actual: 2
            }
        );
    }

    #[test]
    fn invalid_digits_are_rejected() {
        let err = "0xzz".parse::<Hash>().unwrap_err();
        assert_eq!(
            err,
            ParseHexError::Hex(hex::FromHexError::InvalidHexCharacter { c: 'z', index: 0 })
        );
    }

    #[test]
    fn address_is_left_padded_as_destination() {
        let addr = Address([0xaa; 20]);
        let dest = Bytes32::from(addr);
        assert_eq!(dest.0[..12], [0u8; 12]);
        assert_eq!(dest.0[12..], [0xaa; 20]);
    }

    #[test]
    fn u256_serializes_as_decimal() {
        let v = U256::from(1_000_000_007u64);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"1000000007\"");
        assert_eq!(serde_json::from_str::<U256>(&json).unwrap(), v);
    }
}
