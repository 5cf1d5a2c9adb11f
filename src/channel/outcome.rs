//! How channel funds are distributed when the channel is settled.

use std::collections::BTreeMap;

use crate::abiencode::{
    encode,
    types::{Address, Bytes32, Hash, U256},
    Token, Tokenize,
};
use serde::{Deserialize, Serialize};

const ALLOCATION_TYPE: u8 = 0;
const GUARANTEE_TYPE: u8 = 1;

/// Pay `amount` to `destination`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationItem {
    pub destination: Bytes32,
    pub amount: U256,
}

/// Route funds held for this channel into `target_channel_id`, paying the
/// target's destinations in the given priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guarantee {
    pub target_channel_id: Hash,
    pub destinations: Vec<Bytes32>,
}

/// Outcome for a single asset holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssetOutcome {
    #[serde(rename_all = "camelCase")]
    Allocation {
        asset_holder: Address,
        items: Vec<AllocationItem>,
    },
    #[serde(rename_all = "camelCase")]
    Guarantee {
        asset_holder: Address,
        guarantee: Guarantee,
    },
}

impl AssetOutcome {
    pub fn asset_holder(&self) -> Address {
        match self {
            AssetOutcome::Allocation { asset_holder, .. } => *asset_holder,
            AssetOutcome::Guarantee { asset_holder, .. } => *asset_holder,
        }
    }

    /// Sum of all allocated amounts, guarantees hold nothing themselves.
    pub fn total(&self) -> U256 {
        match self {
            AssetOutcome::Allocation { items, .. } => items
                .iter()
                .fold(U256::zero(), |acc, i| acc.saturating_add(i.amount)),
            AssetOutcome::Guarantee { .. } => U256::zero(),
        }
    }

    /// `abi.encode(AssetOutcome(uint8 assetOutcomeType, bytes content))`
    fn encode_content(&self) -> Vec<u8> {
        let (kind, content) = match self {
            AssetOutcome::Allocation { items, .. } => {
                let items = items
                    .iter()
                    .map(|i| {
                        Token::Tuple(vec![Token::FixedBytes(i.destination), Token::Uint(i.amount)])
                    })
                    .collect();
                (ALLOCATION_TYPE, encode(&[Token::Array(items)]))
            }
            AssetOutcome::Guarantee { guarantee, .. } => {
                let destinations = guarantee
                    .destinations
                    .iter()
                    .map(|d| Token::FixedBytes(*d))
                    .collect();
                let content = encode(&[Token::Tuple(vec![
                    Token::FixedBytes(guarantee.target_channel_id.into()),
                    Token::Array(destinations),
                ])]);
                (GUARANTEE_TYPE, content)
            }
        };
        encode(&[Token::Tuple(vec![Token::uint(kind), Token::Bytes(content)])])
    }
}

/// Per-asset-holder outcomes of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outcome(pub Vec<AssetOutcome>);

impl Outcome {
    /// Single asset holder allocating to `items`, by far the most common
    /// shape.
    pub fn simple(asset_holder: Address, items: Vec<AllocationItem>) -> Self {
        Outcome(vec![AssetOutcome::Allocation {
            asset_holder,
            items,
        }])
    }

    /// Amount allocated per asset holder.
    pub fn totals(&self) -> BTreeMap<Address, U256> {
        let mut totals = BTreeMap::new();
        for asset in &self.0 {
            let entry = totals.entry(asset.asset_holder()).or_insert_with(U256::zero);
            *entry = entry.saturating_add(asset.total());
        }
        totals
    }

    /// The allocation items if this is a single-asset allocation.
    pub fn single_allocation(&self) -> Option<(Address, &[AllocationItem])> {
        match self.0.as_slice() {
            [AssetOutcome::Allocation {
                asset_holder,
                items,
            }] => Some((*asset_holder, items)),
            _ => None,
        }
    }

    /// `keccak256(abi.encode(outcome))`
    pub fn hash(&self) -> Hash {
        crate::abiencode::to_hash(self)
    }
}

impl Tokenize for Outcome {
    /// `(address assetHolderAddress, bytes assetOutcomeBytes)[]`
    fn tokenize(&self) -> Token {
        Token::Array(
            self.0
                .iter()
                .map(|a| {
                    Token::Tuple(vec![
                        Token::Address(a.asset_holder()),
                        Token::Bytes(a.encode_content()),
                    ])
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abiencode::tests::compare_slots;

    fn item(dest: u8, amount: u64) -> AllocationItem {
        AllocationItem {
            destination: Bytes32([dest; 32]),
            amount: U256::from(amount),
        }
    }

    #[test]
    fn totals_per_asset_holder() {
        let a = Address([1; 20]);
        let b = Address([2; 20]);
        let outcome = Outcome(vec![
            AssetOutcome::Allocation {
                asset_holder: a,
                items: vec![item(1, 3), item(2, 4)],
            },
            AssetOutcome::Allocation {
                asset_holder: b,
                items: vec![item(1, 10)],
            },
            AssetOutcome::Guarantee {
                asset_holder: b,
                guarantee: Guarantee {
                    target_channel_id: Hash([9; 32]),
                    destinations: vec![Bytes32([1; 32])],
                },
            },
        ]);

        let totals = outcome.totals();
        assert_eq!(totals[&a], U256::from(7u64));
        assert_eq!(totals[&b], U256::from(10u64));
        assert!(outcome.single_allocation().is_none());
    }

    #[test]
    fn allocation_encoding() {
        let outcome = Outcome::simple(Address([0x11; 20]), vec![item(0x22, 5)]);
        let asset_outcome = outcome.0[0].encode_content();
        compare_slots(
            &asset_outcome,
            "
            0000000000000000000000000000000000000000000000000000000000000020 offset of AssetOutcome
            0000000000000000000000000000000000000000000000000000000000000000 assetOutcomeType = allocation
            0000000000000000000000000000000000000000000000000000000000000040 offset of content
            0000000000000000000000000000000000000000000000000000000000000080 length of content
            0000000000000000000000000000000000000000000000000000000000000020 offset of items
            0000000000000000000000000000000000000000000000000000000000000001 number of items
            2222222222222222222222222222222222222222222222222222222222222222 destination
            0000000000000000000000000000000000000000000000000000000000000005 amount
            ",
        );
    }

    #[test]
    fn outcome_json_is_tagged() {
        let outcome = Outcome::simple(Address([0x11; 20]), vec![item(0x22, 5)]);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json[0]["type"], "allocation");
        assert_eq!(json[0]["items"][0]["amount"], "5");
        let back: Outcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn hash_changes_with_amount() {
        let a = Outcome::simple(Address([0x11; 20]), vec![item(0x22, 5)]);
        let b = Outcome::simple(Address([0x11; 20]), vec![item(0x22, 6)]);
        assert_ne!(a.hash(), b.hash());
    }
}
