//! Hash oracle (field-level and byte-level hashing)
//!
//! The rest of the crate never names a concrete hash. Everything flows
//! through [`HashOracle`]: `h2`/`h4` compress field elements (Merkle
//! nodes, term records, quad leaves) and `hash_bytes` maps UTF-8 strings
//! into the field. The oracle identifier is disclosed in the envelope and
//! MUST be configured identically at prove and verify time.
//!
//! The default oracle is BLAKE3 with explicit domain-separation tags,
//! length/position-delimited inputs, and an XOF whose 64-byte output is
//! reduced little-endian modulo the field order. Unknown identifiers are
//! rejected by [`oracle_by_id`], never silently defaulted.

#![forbid(unsafe_code)]

use ark_ff::PrimeField;
use ark_serialize::CanonicalSerialize;
use blake3::Hasher;
use std::io::Read;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::F;

/// Identifier of the default BLAKE3-based oracle.
pub const BLAKE3_ORACLE_ID: &str = "blake3-compress-v1";

/// Abstract hash provider. Implementations must be deterministic: identical
/// inputs produce bitwise-identical field elements across processes.
pub trait HashOracle: Send + Sync {
    /// Stable identifier, disclosed in the envelope.
    fn id(&self) -> &'static str;

    /// Two-to-one field compression (Merkle nodes, term records).
    fn h2(&self, a: F, b: F) -> F;

    /// Four-to-one field compression (literal records, quad leaves).
    fn h4(&self, a: F, b: F, c: F, d: F) -> F;

    /// Map arbitrary bytes into the field.
    fn hash_bytes(&self, bytes: &[u8]) -> F;
}

/// Resolve an oracle by identifier. Rejects unknown identifiers with
/// [`Error::HashMismatch`].
pub fn oracle_by_id(id: &str) -> Result<Arc<dyn HashOracle>> {
    match id {
        BLAKE3_ORACLE_ID => Ok(Arc::new(Blake3Oracle)),
        other => Err(Error::HashMismatch(other.to_string())),
    }
}

/// BLAKE3 oracle with the crate's domain-separation discipline.
///
/// Every invocation hashes a fixed preamble, a per-operation tag, the
/// arity, and the position-prefixed compressed field elements, then reads
/// 64 XOF bytes and reduces them little-endian into `F`.
pub struct Blake3Oracle;

impl Blake3Oracle {
    fn compress(&self, tag: &'static [u8], elems: &[F]) -> F {
        let mut h = Hasher::new();
        h.update(b"zksparql.hash.v1");
        h.update(tag);
        h.update(&(elems.len() as u64).to_be_bytes());
        for (i, e) in elems.iter().enumerate() {
            let mut bytes = Vec::with_capacity(32);
            e.serialize_compressed(&mut bytes).expect("serialize field element");
            h.update(&(i as u64).to_be_bytes());
            h.update(&(bytes.len() as u64).to_be_bytes());
            h.update(&bytes);
        }
        xof_to_field(&h)
    }
}

impl HashOracle for Blake3Oracle {
    fn id(&self) -> &'static str {
        BLAKE3_ORACLE_ID
    }

    fn h2(&self, a: F, b: F) -> F {
        self.compress(b":h2:", &[a, b])
    }

    fn h4(&self, a: F, b: F, c: F, d: F) -> F {
        self.compress(b":h4:", &[a, b, c, d])
    }

    fn hash_bytes(&self, bytes: &[u8]) -> F {
        let mut h = Hasher::new();
        h.update(b"zksparql.hash.v1");
        h.update(b":bytes:");
        h.update(&(bytes.len() as u64).to_be_bytes());
        h.update(bytes);
        xof_to_field(&h)
    }
}

/// Read 64 XOF bytes from the finished state and reduce into `F`
/// (little-endian, modulo the field order).
fn xof_to_field(h: &Hasher) -> F {
    let mut xof = h.finalize_xof();
    let mut buf = [0u8; 64];
    let _ = xof.read(&mut buf);
    F::from_le_bytes_mod_order(&buf)
}
