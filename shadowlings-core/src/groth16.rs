//! Groth16 verification over BN254.
//!
//! Verifying keys are read in the ZoKrates `g16` JSON layout. G2 coordinates
//! there, as in proofs, are `[imaginary, real]` pairs, which is also the order
//! the EVM pairing precompile expects.

use std::path::Path;

use ethers::types::U256;
use halo2curves_axiom::{
    bn256::{multi_miller_loop, Fq, Fq2, G1Affine, G2Affine, G2Prepared, Gt, G1},
    ff::PrimeField,
    pairing::MillerLoopResult,
    CurveAffine,
};
use serde::Deserialize;

use crate::{
    error::{Result, ShadowError},
    field::FieldElement,
    proving::Proof,
};

#[derive(Debug, Deserialize)]
struct VerificationKeyJson {
    alpha: [U256; 2],
    beta: [[U256; 2]; 2],
    gamma: [[U256; 2]; 2],
    delta: [[U256; 2]; 2],
    gamma_abc: Vec<[U256; 2]>,
}

/// A parsed Groth16 verifying key.
#[derive(Clone, Debug)]
pub struct VerifyingKey {
    pub alpha: G1Affine,
    pub beta: G2Affine,
    pub gamma: G2Affine,
    pub delta: G2Affine,
    pub gamma_abc: Vec<G1Affine>,
}

impl VerifyingKey {
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: VerificationKeyJson = serde_json::from_str(json)?;
        if raw.gamma_abc.is_empty() {
            return Err(ShadowError::Proof("verifying key has no gamma_abc points".into()));
        }
        Ok(Self {
            alpha: g1_from_words(&raw.alpha)?,
            beta: g2_from_words(&raw.beta)?,
            gamma: g2_from_words(&raw.gamma)?,
            delta: g2_from_words(&raw.delta)?,
            gamma_abc: raw
                .gamma_abc
                .iter()
                .map(g1_from_words)
                .collect::<Result<_>>()?,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ShadowError::Proof(format!(
                "failed to read verifying key {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    /// Number of public inputs the circuit exposes.
    pub fn input_count(&self) -> usize {
        self.gamma_abc.len() - 1
    }
}

fn fq_from_word(word: &U256) -> Result<Fq> {
    let mut repr = [0u8; 32];
    word.to_little_endian(&mut repr);
    Option::<Fq>::from(Fq::from_repr(repr))
        .ok_or_else(|| ShadowError::Proof(format!("coordinate {:#x} exceeds the base field", word)))
}

pub(crate) fn g1_from_words(words: &[U256; 2]) -> Result<G1Affine> {
    let x = fq_from_word(&words[0])?;
    let y = fq_from_word(&words[1])?;
    Option::<G1Affine>::from(G1Affine::from_xy(x, y))
        .ok_or_else(|| ShadowError::Proof("G1 point is not on the curve".into()))
}

/// `[[x_im, x_re], [y_im, y_re]]`
pub(crate) fn g2_from_words(words: &[[U256; 2]; 2]) -> Result<G2Affine> {
    let x = Fq2::new(fq_from_word(&words[0][1])?, fq_from_word(&words[0][0])?);
    let y = Fq2::new(fq_from_word(&words[1][1])?, fq_from_word(&words[1][0])?);
    Option::<G2Affine>::from(G2Affine::from_xy(x, y))
        .ok_or_else(|| ShadowError::Proof("G2 point is not on the curve".into()))
}

/// Check `e(-A, B) · e(α, β) · e(Σ, γ) · e(C, δ) = 1` where
/// `Σ = gamma_abc[0] + Σ inputs[i] · gamma_abc[i + 1]`.
pub fn verify(vk: &VerifyingKey, proof: &Proof, inputs: &[FieldElement]) -> Result<bool> {
    if inputs.len() != vk.input_count() {
        return Err(ShadowError::Proof(format!(
            "expected {} public inputs, got {}",
            vk.input_count(),
            inputs.len()
        )));
    }

    let a = g1_from_words(&proof.a)?;
    let b = g2_from_words(&proof.b)?;
    let c = g1_from_words(&proof.c)?;

    let mut acc = G1::from(vk.gamma_abc[0]);
    for (input, point) in inputs.iter().zip(vk.gamma_abc.iter().skip(1)) {
        acc = acc + point * input.to_fr();
    }
    let sigma = G1Affine::from(acc);

    let neg_a = -a;
    let b = G2Prepared::from(b);
    let beta = G2Prepared::from(vk.beta);
    let gamma = G2Prepared::from(vk.gamma);
    let delta = G2Prepared::from(vk.delta);

    let result = multi_miller_loop(&[
        (&neg_a, &b),
        (&vk.alpha, &beta),
        (&sigma, &gamma),
        (&c, &delta),
    ])
    .final_exponentiation();

    Ok(result == Gt::identity())
}


#[cfg(test)]
mod tests {
    use super::test_support::Trapdoor;
    use super::*;

    fn inputs() -> Vec<FieldElement> {
        vec![FieldElement::from_u64(3), FieldElement::from_u64(5)]
    }

    #[test]
    fn test_valid_proof_verifies() {
        let trapdoor = Trapdoor::random(2);
        let vk = VerifyingKey::from_json(&trapdoor.verification_key_json()).unwrap();
        assert_eq!(vk.input_count(), 2);
        let proof = trapdoor.prove(&inputs());
        assert!(verify(&vk, &proof, &inputs()).unwrap());
    }

    #[test]
    fn test_wrong_inputs_fail() {
        let trapdoor = Trapdoor::random(2);
        let vk = VerifyingKey::from_json(&trapdoor.verification_key_json()).unwrap();
        let proof = trapdoor.prove(&inputs());
        let tampered = vec![FieldElement::from_u64(3), FieldElement::from_u64(6)];
        assert!(!verify(&vk, &proof, &tampered).unwrap());
    }

    #[test]
    fn test_input_count_mismatch() {
        let trapdoor = Trapdoor::random(2);
        let vk = VerifyingKey::from_json(&trapdoor.verification_key_json()).unwrap();
        let proof = trapdoor.prove(&inputs());
        assert!(matches!(
            verify(&vk, &proof, &inputs()[..1]),
            Err(ShadowError::Proof(_))
        ));
    }

    #[test]
    fn test_rejects_point_off_curve() {
        let trapdoor = Trapdoor::random(1);
        let mut proof = trapdoor.prove(&[FieldElement::from_u64(1)]);
        proof.a[1] = proof.a[1] + U256::one();
        let vk = VerifyingKey::from_json(&trapdoor.verification_key_json()).unwrap();
        assert!(verify(&vk, &proof, &[FieldElement::from_u64(1)]).is_err());
    }
}
