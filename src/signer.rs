//! Signer interface (scheme-agnostic) and the reference Schnorr signer
//!
//! The core needs exactly two capabilities from a signature scheme: sign a
//! field element (the Merkle root) under a secret key, and verify such a
//! signature under a public key. Keys and signatures cross the interface
//! as opaque byte strings so the envelope can carry them without knowing
//! the scheme; the scheme identifier is disclosed alongside and unknown
//! identifiers are rejected at resolution time.
//!
//! The reference scheme is Schnorr over BN254 G1 with a BLAKE3 challenge
//! and a deterministic (derived) nonce:
//! `R = kG`, `e = H(R ‖ pk ‖ m)`, `s = k + e·sk`; verification checks
//! `sG = R + e·pk`.

#![forbid(unsafe_code)]

use ark_bn254::{G1Affine, G1Projective};
use ark_ec::{CurveGroup, Group};
use ark_ff::{PrimeField, UniformRand};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use blake3::Hasher;
use std::io::Read;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::F;

/// Identifier of the reference Schnorr scheme.
pub const SCHNORR_BN254_ID: &str = "schnorr-bn254-blake3-v1";

/// Opaque public key bytes (scheme-defined layout).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PublicKey(pub Vec<u8>);

/// Opaque secret key bytes (prover side only).
#[derive(Clone, Debug)]
pub struct SecretKey(pub Vec<u8>);

/// Opaque signature bytes (scheme-defined layout).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(pub Vec<u8>);

/// A generated key pair.
#[derive(Clone, Debug)]
pub struct KeyPair {
    /// Public half, disclosed in the envelope.
    pub public: PublicKey,
    /// Secret half, never serialized by the core.
    pub secret: SecretKey,
}

/// Pluggable signature capability.
pub trait Signer: Send + Sync {
    /// Stable scheme identifier, disclosed in the envelope.
    fn id(&self) -> &'static str;

    /// Generate a fresh key pair (prover side only).
    fn generate(&self, rng: &mut dyn rand::RngCore) -> Result<KeyPair>;

    /// Sign a field element under the secret key.
    fn sign(&self, sk: &SecretKey, msg: F) -> Result<Signature>;

    /// Verify a signature over a field element. Malformed key or
    /// signature bytes verify as `false`.
    fn verify(&self, pk: &PublicKey, msg: F, sig: &Signature) -> bool;
}

/// Resolve a signer by identifier. Unknown identifiers are rejected with
/// [`Error::UnsupportedSignerScheme`].
pub fn signer_by_id(id: &str) -> Result<Arc<dyn Signer>> {
    match id {
        SCHNORR_BN254_ID => Ok(Arc::new(SchnorrBn254)),
        other => Err(Error::UnsupportedSignerScheme(other.to_string())),
    }
}

/// Schnorr over BN254 G1 with BLAKE3 challenges.
pub struct SchnorrBn254;

impl SchnorrBn254 {
    fn challenge(r: &G1Affine, pk: &G1Affine, msg: F) -> F {
        let mut h = Hasher::new();
        h.update(b"zksparql.schnorr.v1:challenge:");
        h.update(&point_bytes(r));
        h.update(&point_bytes(pk));
        h.update(&scalar_bytes(msg));
        xof_scalar(&h)
    }

    fn nonce(sk: F, msg: F) -> F {
        let mut h = Hasher::new();
        h.update(b"zksparql.schnorr.v1:nonce:");
        h.update(&scalar_bytes(sk));
        h.update(&scalar_bytes(msg));
        xof_scalar(&h)
    }
}

impl Signer for SchnorrBn254 {
    fn id(&self) -> &'static str {
        SCHNORR_BN254_ID
    }

    fn generate(&self, rng: &mut dyn rand::RngCore) -> Result<KeyPair> {
        let sk = F::rand(rng);
        let pk = (G1Projective::generator() * sk).into_affine();
        Ok(KeyPair {
            public: PublicKey(point_bytes(&pk)),
            secret: SecretKey(scalar_bytes(sk)),
        })
    }

    fn sign(&self, sk: &SecretKey, msg: F) -> Result<Signature> {
        let sk = parse_scalar(&sk.0).ok_or_else(|| Error::Parse("malformed secret key".into()))?;
        let pk = (G1Projective::generator() * sk).into_affine();
        let k = Self::nonce(sk, msg);
        let r = (G1Projective::generator() * k).into_affine();
        let e = Self::challenge(&r, &pk, msg);
        let s = k + e * sk;

        let mut bytes = point_bytes(&r);
        bytes.extend_from_slice(&scalar_bytes(s));
        Ok(Signature(bytes))
    }

    fn verify(&self, pk: &PublicKey, msg: F, sig: &Signature) -> bool {
        let Some(pk) = parse_point(&pk.0) else { return false };
        if sig.0.len() != 64 {
            return false;
        }
        let Some(r) = parse_point(&sig.0[..32]) else { return false };
        let Some(s) = parse_scalar(&sig.0[32..]) else { return false };

        let e = Self::challenge(&r, &pk, msg);
        let lhs = G1Projective::generator() * s;
        let rhs = G1Projective::from(r) + G1Projective::from(pk) * e;
        lhs == rhs
    }
}

fn point_bytes(p: &G1Affine) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(32);
    p.serialize_compressed(&mut bytes).expect("serialize G1 point");
    bytes
}

fn scalar_bytes(s: F) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(32);
    s.serialize_compressed(&mut bytes).expect("serialize scalar");
    bytes
}

fn parse_point(bytes: &[u8]) -> Option<G1Affine> {
    G1Affine::deserialize_compressed(bytes).ok()
}

fn parse_scalar(bytes: &[u8]) -> Option<F> {
    F::deserialize_compressed(bytes).ok()
}

fn xof_scalar(h: &Hasher) -> F {
    let mut xof = h.finalize_xof();
    let mut buf = [0u8; 64];
    let _ = xof.read(&mut buf);
    F::from_le_bytes_mod_order(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::One;

    fn keypair() -> KeyPair {
        let mut rng = rand::thread_rng();
        SchnorrBn254.generate(&mut rng).unwrap()
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let kp = keypair();
        let msg = F::from(123456789u64);
        let sig = SchnorrBn254.sign(&kp.secret, msg).unwrap();
        assert!(SchnorrBn254.verify(&kp.public, msg, &sig));
    }

    #[test]
    fn verification_binds_message_and_key() {
        let kp = keypair();
        let other = keypair();
        let msg = F::from(42u64);
        let sig = SchnorrBn254.sign(&kp.secret, msg).unwrap();
        assert!(!SchnorrBn254.verify(&kp.public, msg + F::one(), &sig));
        assert!(!SchnorrBn254.verify(&other.public, msg, &sig));
    }

    #[test]
    fn signatures_are_deterministic() {
        let kp = keypair();
        let msg = F::from(7u64);
        let a = SchnorrBn254.sign(&kp.secret, msg).unwrap();
        let b = SchnorrBn254.sign(&kp.secret, msg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_material_verifies_false_not_panics() {
        let kp = keypair();
        let msg = F::from(9u64);
        let sig = SchnorrBn254.sign(&kp.secret, msg).unwrap();
        assert!(!SchnorrBn254.verify(&PublicKey(vec![1, 2, 3]), msg, &sig));
        assert!(!SchnorrBn254.verify(&kp.public, msg, &Signature(vec![0u8; 10])));
        let mut flipped = sig.0.clone();
        flipped[40] ^= 1;
        assert!(!SchnorrBn254.verify(&kp.public, msg, &Signature(flipped)));
    }

    #[test]
    fn registry_rejects_unknown_schemes() {
        assert!(signer_by_id(SCHNORR_BN254_ID).is_ok());
        assert!(matches!(
            signer_by_id("ed25519-something"),
            Err(Error::UnsupportedSignerScheme(_))
        ));
    }
}
