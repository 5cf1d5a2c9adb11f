//! Serialize `Vec<u8>` as a `0x`-prefixed hex string.
//!
//! Use via `#[serde(with = "as_hex")]`. Without it serde writes byte vectors
//! as a list of numbers, which makes persisted records hard to read and
//! doesn't match how the rest of the ecosystem represents `bytes`.

use serde::{de, Deserialize, Deserializer, Serializer};

pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&format_args!("0x{}", hex::encode(bytes)))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    hex::decode(s).map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super")]
        data: Vec<u8>,
    }

    #[test]
    fn json_uses_hex() {
        let w = Wrapper {
            data: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"data":"0xdeadbeef"}"#);
        assert_eq!(serde_json::from_str::<Wrapper>(&json).unwrap(), w);
    }

    #[test]
    fn empty_is_0x() {
        let w = Wrapper { data: vec![] };
        assert_eq!(serde_json::to_string(&w).unwrap(), r#"{"data":"0x"}"#);
    }
}
