//! Canonical argument values.
//!
//! Decoded ABI values are mapped onto a small canonical set so downstream
//! consumers never handle alloy types directly. Integers are carried as
//! decimal strings: event amounts routinely exceed u128 and the ledger treats
//! them as opaque non-negative integers anyway.

use alloy_dyn_abi::DynSolValue;
use serde_json::{json, Value};

/// A decoded event argument in canonical form.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// 20-byte EVM address, lowercase `0x…` hex.
    Address(String),
    /// Unsigned integer as a decimal string.
    Uint(String),
    /// Signed integer as a decimal string.
    Int(String),
    Bool(bool),
    /// Raw bytes, `0x…` hex.
    Bytes(String),
    Str(String),
    Array(Vec<ArgValue>),
    Tuple(Vec<ArgValue>),
}

impl ArgValue {
    /// Plain-JSON projection used when a record is persisted.
    pub fn to_json(&self) -> Value {
        match self {
            ArgValue::Address(s) | ArgValue::Uint(s) | ArgValue::Int(s) | ArgValue::Bytes(s) => {
                json!(s)
            }
            ArgValue::Bool(b) => json!(b),
            ArgValue::Str(s) => json!(s),
            ArgValue::Array(vals) | ArgValue::Tuple(vals) => {
                Value::Array(vals.iter().map(ArgValue::to_json).collect())
            }
        }
    }

    /// The decimal string of a `Uint`, if this value is one.
    pub fn as_uint(&self) -> Option<&str> {
        match self {
            ArgValue::Uint(s) => Some(s),
            _ => None,
        }
    }

    /// The address string, if this value is one.
    pub fn as_address(&self) -> Option<&str> {
        match self {
            ArgValue::Address(s) => Some(s),
            _ => None,
        }
    }
}

/// Convert a decoded `DynSolValue` into an `ArgValue`.
pub fn from_sol_value(val: DynSolValue) -> ArgValue {
    match val {
        DynSolValue::Bool(b) => ArgValue::Bool(b),

        DynSolValue::Int(i, _bits) => ArgValue::Int(i.to_string()),

        DynSolValue::Uint(u, _bits) => ArgValue::Uint(u.to_string()),

        DynSolValue::FixedBytes(bytes, size) => {
            ArgValue::Bytes(format!("0x{}", hex::encode(&bytes[..size])))
        }

        DynSolValue::Bytes(b) => ArgValue::Bytes(format!("0x{}", hex::encode(b))),

        DynSolValue::String(s) => ArgValue::Str(s),

        // `{:#x}` renders the plain lowercase hex form
        DynSolValue::Address(a) => ArgValue::Address(format!("{a:#x}")),

        DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) => {
            ArgValue::Array(vals.into_iter().map(from_sol_value).collect())
        }

        DynSolValue::Tuple(fields) => {
            ArgValue::Tuple(fields.into_iter().map(from_sol_value).collect())
        }

        // Function selectors don't appear in event args — fall back to bytes
        DynSolValue::Function(f) => ArgValue::Bytes(format!("0x{}", hex::encode(f.as_slice()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, I256, U256};

    #[test]
    fn uint_becomes_decimal_string() {
        let v = from_sol_value(DynSolValue::Uint(U256::from(1u64), 256));
        assert_eq!(v, ArgValue::Uint("1".into()));
    }

    #[test]
    fn uint_beyond_u128() {
        let big = U256::MAX;
        let v = from_sol_value(DynSolValue::Uint(big, 256));
        assert_eq!(v, ArgValue::Uint(big.to_string()));
    }

    #[test]
    fn int_negative() {
        let v = from_sol_value(DynSolValue::Int(
            I256::try_from(-42i64).unwrap(),
            256,
        ));
        assert_eq!(v, ArgValue::Int("-42".into()));
    }

    #[test]
    fn address_lowercase_hex() {
        let addr: Address = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
            .parse()
            .unwrap();
        let v = from_sol_value(DynSolValue::Address(addr));
        assert_eq!(
            v,
            ArgValue::Address("0xd8da6bf26964af9d7eed9e03e53415d37aa96045".into())
        );
    }

    #[test]
    fn json_projection() {
        let v = ArgValue::Tuple(vec![
            ArgValue::Uint("7".into()),
            ArgValue::Bool(false),
            ArgValue::Array(vec![ArgValue::Str("a".into())]),
        ]);
        assert_eq!(v.to_json(), serde_json::json!(["7", false, ["a"]]));
    }
}
