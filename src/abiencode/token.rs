//! Solidity values and their `abi.encode` representation.
//!
//! Values are described as a tree of [Token]s and then written slot by slot
//! (32 bytes each) to a [Writer]. Static values are written in place (Head),
//! dynamic values are replaced by an offset in the Head and appended after
//! all Head slots (Tail), recursively for nested tuples and arrays.

use super::{
    error::{Error, Result},
    types::{Address, Bytes32, U256},
};

/// Size of one ABI slot in bytes.
pub const SLOT_SIZE: usize = 32;

/// Destination for encoded slots.
///
/// Implemented by plain byte buffers and by the Keccak256 hasher, so a value
/// can be hashed without materializing its encoding first.
pub trait Writer {
    fn write(&mut self, slot: &[u8]);
}

impl Writer for Vec<u8> {
    fn write(&mut self, slot: &[u8]) {
        self.extend_from_slice(slot);
    }
}

/// A single Solidity value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `uint<N>` of any width, always occupying one slot.
    Uint(U256),
    Address(Address),
    Bool(bool),
    /// `bytes32`
    FixedBytes(Bytes32),
    /// `bytes` (dynamic length)
    Bytes(Vec<u8>),
    /// `T[]` (dynamic length)
    Array(Vec<Token>),
    /// A struct or a list of function arguments.
    Tuple(Vec<Token>),
}

impl Token {
    pub fn uint<T: Into<U256>>(v: T) -> Self {
        Token::Uint(v.into())
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            Token::Bytes(_) | Token::Array(_) => true,
            Token::Tuple(fields) => fields.iter().any(Token::is_dynamic),
            _ => false,
        }
    }

    /// Number of bytes this token occupies in the Head of the enclosing
    /// tuple.
    fn head_len(&self) -> usize {
        match self {
            _ if self.is_dynamic() => SLOT_SIZE,
            Token::Tuple(fields) => fields.iter().map(Token::head_len).sum(),
            _ => SLOT_SIZE,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Token::Uint(v) => out.extend_from_slice(&v.to_be_bytes()),
            Token::Address(a) => out.extend_from_slice(&Bytes32::from(*a).0),
            Token::Bool(b) => out.extend_from_slice(&U256::from(*b as u8).to_be_bytes()),
            Token::FixedBytes(b) => out.extend_from_slice(&b.0),
            Token::Bytes(data) => {
                write_len(out, data.len());
                out.extend_from_slice(data);
                let padding = (SLOT_SIZE - data.len() % SLOT_SIZE) % SLOT_SIZE;
                out.resize(out.len() + padding, 0);
            }
            Token::Array(items) => {
                write_len(out, items.len());
                encode_sequence(items, out);
            }
            Token::Tuple(fields) => encode_sequence(fields, out),
        }
    }

    pub fn into_uint(self) -> Result<U256> {
        match self {
            Token::Uint(v) => Ok(v),
            _ => Err(Error::UnexpectedToken("uint")),
        }
    }

    pub fn into_u64(self) -> Result<u64> {
        let v = self.into_uint()?;
        if v > U256::from(u64::MAX) {
            return Err(Error::InvalidValue("uint64"));
        }
        Ok(v.low_u64())
    }

    pub fn into_address(self) -> Result<Address> {
        match self {
            Token::Address(a) => Ok(a),
            _ => Err(Error::UnexpectedToken("address")),
        }
    }

    pub fn into_fixed_bytes(self) -> Result<Bytes32> {
        match self {
            Token::FixedBytes(b) => Ok(b),
            _ => Err(Error::UnexpectedToken("bytes32")),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Token::Bytes(b) => Ok(b),
            _ => Err(Error::UnexpectedToken("bytes")),
        }
    }

    pub fn into_array(self) -> Result<Vec<Token>> {
        match self {
            Token::Array(items) => Ok(items),
            _ => Err(Error::UnexpectedToken("array")),
        }
    }

    pub fn into_tuple(self) -> Result<Vec<Token>> {
        match self {
            Token::Tuple(fields) => Ok(fields),
            _ => Err(Error::UnexpectedToken("tuple")),
        }
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&U256::from(len).to_be_bytes());
}

fn encode_sequence(tokens: &[Token], out: &mut Vec<u8>) {
    let head_len: usize = tokens.iter().map(Token::head_len).sum();
    let mut tail = Vec::new();
    for token in tokens {
        if token.is_dynamic() {
            write_len(out, head_len + tail.len());
            token.encode_into(&mut tail);
        } else {
            token.encode_into(out);
        }
    }
    out.extend_from_slice(&tail);
}

/// Types that have a canonical Solidity representation.
pub trait Tokenize {
    fn tokenize(&self) -> Token;
}

/// Equivalent of Solidity's `abi.encode(a, b, ...)` for the given arguments.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_sequence(tokens, &mut out);
    out
}

/// Like [encode], but hands each slot to `writer`.
pub fn to_writer<W: Writer>(tokens: &[Token], writer: &mut W) {
    for slot in encode(tokens).chunks(SLOT_SIZE) {
        writer.write(slot);
    }
}
