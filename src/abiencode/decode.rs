//! Type-directed decoding of `abi.encode` output back into [Token]s.
//!
//! The decoder is strict: values must be canonical (zeroed padding, clean
//! upper bytes). [decode_canonical] additionally re-encodes the result and
//! rejects inputs that don't reproduce byte-for-byte.

use super::{
    error::{Error, Result},
    token::{encode, Token, SLOT_SIZE},
    types::{Address, Bytes32, U256},
};

/// Solidity type of a value to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Uint,
    Address,
    Bool,
    FixedBytes,
    Bytes,
    Array(Box<ParamType>),
    Tuple(Vec<ParamType>),
}

impl ParamType {
    fn is_dynamic(&self) -> bool {
        match self {
            ParamType::Bytes | ParamType::Array(_) => true,
            ParamType::Tuple(fields) => fields.iter().any(ParamType::is_dynamic),
            _ => false,
        }
    }

    fn head_len(&self) -> usize {
        match self {
            _ if self.is_dynamic() => SLOT_SIZE,
            ParamType::Tuple(fields) => fields.iter().map(ParamType::head_len).sum(),
            _ => SLOT_SIZE,
        }
    }
}

fn slot(data: &[u8], offset: usize) -> Result<&[u8; SLOT_SIZE]> {
    offset
        .checked_add(SLOT_SIZE)
        .and_then(|end| data.get(offset..end))
        .and_then(|s| s.try_into().ok())
        .ok_or(Error::OutOfBounds {
            offset,
            needed: SLOT_SIZE,
            len: data.len(),
        })
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize> {
    let value = U256::from_big_endian(slot(data, offset)?);
    // Anything larger than the input itself can't be a valid length or
    // offset.
    if value > U256::from(data.len()) {
        return Err(Error::LengthOverflow);
    }
    Ok(value.as_usize())
}

fn decode_sequence(types: &[ParamType], data: &[u8], base: usize) -> Result<Vec<Token>> {
    let mut head = base;
    let mut tokens = Vec::with_capacity(types.len());
    for ty in types {
        if ty.is_dynamic() {
            let offset = read_usize(data, head)?;
            let at = base.checked_add(offset).ok_or(Error::LengthOverflow)?;
            tokens.push(decode_one(ty, data, at)?);
        } else {
            tokens.push(decode_one(ty, data, head)?);
        }
        head += ty.head_len();
    }
    Ok(tokens)
}

fn decode_one(ty: &ParamType, data: &[u8], at: usize) -> Result<Token> {
    match ty {
        ParamType::Uint => Ok(Token::Uint(U256::from_big_endian(slot(data, at)?))),
        ParamType::Address => {
            let s = slot(data, at)?;
            if s[..12].iter().any(|&b| b != 0) {
                return Err(Error::InvalidValue("address"));
            }
            let mut addr = Address::default();
            addr.0.copy_from_slice(&s[12..]);
            Ok(Token::Address(addr))
        }
        ParamType::Bool => {
            let s = slot(data, at)?;
            if s[..31].iter().any(|&b| b != 0) || s[31] > 1 {
                return Err(Error::InvalidValue("bool"));
            }
            Ok(Token::Bool(s[31] == 1))
        }
        ParamType::FixedBytes => Ok(Token::FixedBytes(Bytes32(*slot(data, at)?))),
        ParamType::Bytes => {
            let len = read_usize(data, at)?;
            let start = at + SLOT_SIZE;
            let bytes = data
                .get(start..start + len)
                .ok_or(Error::OutOfBounds {
                    offset: start,
                    needed: len,
                    len: data.len(),
                })?;
            Ok(Token::Bytes(bytes.to_vec()))
        }
        ParamType::Array(inner) => {
            let len = read_usize(data, at)?;
            // Each element needs at least one slot, this also bounds the
            // allocation below by the input size.
            if len.saturating_mul(SLOT_SIZE) > data.len() {
                return Err(Error::LengthOverflow);
            }
            let types = vec![(**inner).clone(); len];
            Ok(Token::Array(decode_sequence(&types, data, at + SLOT_SIZE)?))
        }
        ParamType::Tuple(fields) => Ok(Token::Tuple(decode_sequence(fields, data, at)?)),
    }
}

/// Inverse of [encode] for the given list of types.
pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>> {
    decode_sequence(types, data, 0)
}

/// Decode `data` and make sure it is the canonical encoding of the result.
pub fn decode_canonical(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>> {
    let tokens = decode(types, data)?;
    if encode(&tokens) != data {
        return Err(Error::NonCanonical);
    }
    Ok(tokens)
}
