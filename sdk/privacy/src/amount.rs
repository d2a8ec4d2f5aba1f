//! Note amounts.
//!
//! Amounts are arbitrary-precision unsigned integers. On the wire and at rest
//! they are decimal strings so that round-trips are exact.

use ark_bls12_381::Fr;
use ark_ff::PrimeField;
use num_bigint::BigUint;

/// Widest amount that still maps injectively onto one `Fr` element
pub const MAX_AMOUNT_BITS: u64 = 248;

/// Encode an amount as a field element, or `None` if it is too wide
pub fn amount_to_field(amount: &BigUint) -> Option<Fr> {
    if amount.bits() > MAX_AMOUNT_BITS {
        return None;
    }
    Some(Fr::from_le_bytes_mod_order(&amount.to_bytes_le()))
}

/// Serde adapter: `BigUint` <-> decimal string
pub mod decimal {
    use std::str::FromStr;

    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let raw = String::deserialize(d)?;
        BigUint::from_str(&raw).map_err(|e| D::Error::custom(format!("invalid amount '{raw}': {e}")))
    }
}
