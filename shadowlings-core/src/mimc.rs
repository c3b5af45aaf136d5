//! MiMCSponge over the BN254 scalar field.
//!
//! This is the arithmetic hash `H` the circuits constrain and must agree with
//! the circuit library bit for bit. 220 Feistel rounds with an `x^5` S-box.
//! Round constants come from chained Keccak-256 of the seed `"mimcsponge"`,
//! with the first and last constant forced to zero.

use halo2curves_axiom::{bn256::Fr, ff::Field};
use once_cell::sync::Lazy;

use crate::{
    field::{reduce_be_bytes_to_fr, FieldElement},
    keccak256,
};

pub const ROUNDS: usize = 220;
const SEED: &[u8] = b"mimcsponge";

static ROUND_CONSTANTS: Lazy<Vec<Fr>> = Lazy::new(|| {
    let mut constants = Vec::with_capacity(ROUNDS);
    constants.push(Fr::ZERO);
    let mut digest = keccak256(SEED);
    for _ in 1..ROUNDS - 1 {
        digest = keccak256(digest);
        constants.push(reduce_be_bytes_to_fr(&digest));
    }
    constants.push(Fr::ZERO);
    constants
});

#[inline]
fn pow5(t: Fr) -> Fr {
    let t2 = t.square();
    t2.square() * t
}

/// One keyed Feistel permutation of `(xl, xr)`.
fn feistel(mut xl: Fr, mut xr: Fr, key: Fr) -> (Fr, Fr) {
    for (i, c) in ROUND_CONSTANTS.iter().enumerate() {
        let t = xl + key + c;
        let next = xr + pow5(t);
        if i < ROUNDS - 1 {
            xr = xl;
            xl = next;
        } else {
            xr = next;
        }
    }
    (xl, xr)
}

/// Sponge over `inputs` with the given key, squeezing a single element.
pub fn multi_hash(inputs: &[FieldElement], key: FieldElement) -> FieldElement {
    let key = key.to_fr();
    let (mut r, mut c) = (Fr::ZERO, Fr::ZERO);
    for input in inputs {
        r += input.to_fr();
        (r, c) = feistel(r, c, key);
    }
    FieldElement::from_fr(r)
}

/// `H(a, b)`, the two-to-one hash used for every commitment value.
pub fn hash2(a: FieldElement, b: FieldElement) -> FieldElement {
    multi_hash(&[a, b], FieldElement::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fe(s: &str) -> FieldElement {
        FieldElement::parse_hex(s).unwrap()
    }

    #[test]
    fn test_round_constants() {
        assert_eq!(ROUND_CONSTANTS.len(), ROUNDS);
        assert_eq!(ROUND_CONSTANTS[0], Fr::ZERO);
        assert_eq!(ROUND_CONSTANTS[ROUNDS - 1], Fr::ZERO);
        assert_eq!(
            FieldElement::from_fr(ROUND_CONSTANTS[1]),
            fe("0x0fbe43c36a80e36d7c7c584d4f8f3759fb51f0d66065d8a227b688d12488c5d4")
        );
        assert_eq!(
            FieldElement::from_fr(ROUND_CONSTANTS[218]),
            fe("0x04af9e46dbc42b94137981fece56e9775d00fc101129f08fd6b781f439c20c0b")
        );
    }

    #[test]
    fn test_hash_one_two() {
        assert_eq!(
            hash2(FieldElement::from_u64(1), FieldElement::from_u64(2)),
            fe("0x2bcea035a1251603f1ceaf73cd4ae89427c47075bb8e3a944039ff1e3d6d2a6f")
        );
    }

    #[test]
    fn test_hash_zeroes() {
        assert_eq!(
            hash2(FieldElement::ZERO, FieldElement::ZERO),
            fe("0x2d9fea8398a61ea1997e7d748364c0fdb49412c4dbabc1578375ade642e85581")
        );
    }

    #[test]
    fn test_order_matters() {
        let a = FieldElement::from_u64(1);
        let b = FieldElement::from_u64(2);
        assert_ne!(hash2(a, b), hash2(b, a));
    }
}
