//! Fixed-depth Merkle commitment over encoded quads
//!
//! Leaves are quad encodings padded with the zero field element up to
//! `2^D`; internal nodes are `h2(left, right)`. The inclusion witness for
//! leaf `i` is the sibling at each level plus the LSB-first bits of `i`
//! (0 = self is the left child). Verification MUST run under the exact
//! depth and oracle the commitment was built with.
//!
//! The tree keeps every level in memory (a little under `2^(D+1)` field
//! elements, leaves in one contiguous allocation) so per-leaf witnesses
//! are cheap slices for the input builder.

#![forbid(unsafe_code)]

use ark_ff::Zero;
use oxrdf::Quad;

use crate::config::ProofConfig;
use crate::encode::encode_quad;
use crate::error::{Error, Result};
use crate::hash::HashOracle;
use crate::F;

/// A committed dataset: the padded leaf level, all internal levels, and
/// the root.
#[derive(Clone, Debug)]
pub struct Commitment {
    depth: usize,
    n_quads: usize,
    /// `levels[0]` is the padded leaf vector (`2^D` entries); each further
    /// level halves until `levels[depth]` holds the root alone.
    levels: Vec<Vec<F>>,
}

impl Commitment {
    /// Build the tree over already-encoded leaves.
    ///
    /// Fails with `DatasetTooLarge` when more than `2^depth` leaves are
    /// supplied. Depth validity itself is checked by
    /// [`ProofConfig::validate`].
    pub fn build(oracle: &dyn HashOracle, encoded: &[F], depth: usize) -> Result<Self> {
        let capacity = 1usize << depth;
        if encoded.len() > capacity {
            return Err(Error::DatasetTooLarge {
                quads: encoded.len(),
                capacity,
                depth,
            });
        }

        let mut leaves = vec![F::zero(); capacity];
        leaves[..encoded.len()].copy_from_slice(encoded);

        let mut levels = Vec::with_capacity(depth + 1);
        levels.push(leaves);
        for level in 0..depth {
            let below = &levels[level];
            let mut above = Vec::with_capacity(below.len() / 2);
            for pair in below.chunks_exact(2) {
                above.push(oracle.h2(pair[0], pair[1]));
            }
            levels.push(above);
        }

        Ok(Self { depth, n_quads: encoded.len(), levels })
    }

    /// Encode and commit a canonicalized quad sequence.
    pub fn over_quads(
        oracle: &dyn HashOracle,
        config: &ProofConfig,
        quads: &[Quad],
    ) -> Result<Self> {
        let mut encoded = Vec::with_capacity(quads.len());
        for q in quads {
            encoded.push(encode_quad(oracle, config, q)?);
        }
        Self::build(oracle, &encoded, config.merkle_depth)
    }

    /// Tree depth `D`.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of real (non-padding) leaves.
    pub fn len(&self) -> usize {
        self.n_quads
    }

    /// True when the commitment holds no quads (the root still exists; it
    /// commits to the all-zero leaf vector).
    pub fn is_empty(&self) -> bool {
        self.n_quads == 0
    }

    /// The committed root.
    pub fn root(&self) -> F {
        self.levels[self.depth][0]
    }

    /// The padded leaf level.
    pub fn leaves(&self) -> &[F] {
        &self.levels[0]
    }

    /// Sibling path for leaf `i`, one element per level, leaf-adjacent
    /// first.
    pub fn path(&self, i: usize) -> Vec<F> {
        debug_assert!(i < self.levels[0].len(), "leaf index out of range");
        (0..self.depth)
            .map(|level| self.levels[level][(i >> level) ^ 1])
            .collect()
    }

    /// Direction bits for leaf `i`: bit `k` of `i`, LSB first
    /// (false = self is the left child at that level).
    pub fn directions(&self, i: usize) -> Vec<bool> {
        (0..self.depth).map(|level| (i >> level) & 1 == 1).collect()
    }
}

/// Recompute the root from a leaf and its witness and compare.
pub fn verify_inclusion(
    oracle: &dyn HashOracle,
    leaf: F,
    path: &[F],
    directions: &[bool],
    root: F,
) -> bool {
    if path.len() != directions.len() {
        return false;
    }
    let mut acc = leaf;
    for (sibling, right) in path.iter().zip(directions) {
        acc = if *right { oracle.h2(*sibling, acc) } else { oracle.h2(acc, *sibling) };
    }
    acc == root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Blake3Oracle;
    use ark_ff::One;
    use oxrdf::{GraphName, NamedNode};

    fn quad(n: u32) -> Quad {
        let s = NamedNode::new(format!("http://example.org/s{n}")).unwrap();
        let p = NamedNode::new("http://example.org/p").unwrap();
        let o = NamedNode::new(format!("http://example.org/o{n}")).unwrap();
        Quad::new(s, p, o, GraphName::DefaultGraph)
    }

    #[test]
    fn every_leaf_verifies_against_the_root() {
        let oracle = Blake3Oracle;
        let cfg = ProofConfig { merkle_depth: 4, ..ProofConfig::default() };
        let quads: Vec<Quad> = (0..5).map(quad).collect();
        let c = Commitment::over_quads(&oracle, &cfg, &quads).unwrap();
        for i in 0..c.leaves().len() {
            assert!(verify_inclusion(
                &oracle,
                c.leaves()[i],
                &c.path(i),
                &c.directions(i),
                c.root()
            ));
        }
    }

    #[test]
    fn altered_leaf_path_or_direction_fails() {
        let oracle = Blake3Oracle;
        let cfg = ProofConfig { merkle_depth: 4, ..ProofConfig::default() };
        let quads: Vec<Quad> = (0..3).map(quad).collect();
        let c = Commitment::over_quads(&oracle, &cfg, &quads).unwrap();

        let leaf = c.leaves()[1];
        let path = c.path(1);
        let dirs = c.directions(1);

        assert!(!verify_inclusion(&oracle, leaf + F::one(), &path, &dirs, c.root()));

        let mut bad_path = path.clone();
        bad_path[0] += F::one();
        assert!(!verify_inclusion(&oracle, leaf, &bad_path, &dirs, c.root()));

        let mut bad_dirs = dirs.clone();
        bad_dirs[2] = !bad_dirs[2];
        assert!(!verify_inclusion(&oracle, leaf, &path, &bad_dirs, c.root()));

        // Truncated witness is rejected outright.
        assert!(!verify_inclusion(&oracle, leaf, &path[..3], &dirs, c.root()));
    }

    #[test]
    fn capacity_boundary_is_exact() {
        let oracle = Blake3Oracle;
        let cfg = ProofConfig { merkle_depth: 2, ..ProofConfig::default() };
        let full: Vec<Quad> = (0..4).map(quad).collect();
        assert!(Commitment::over_quads(&oracle, &cfg, &full).is_ok());
        let over: Vec<Quad> = (0..5).map(quad).collect();
        assert!(matches!(
            Commitment::over_quads(&oracle, &cfg, &over),
            Err(Error::DatasetTooLarge { quads: 5, capacity: 4, depth: 2 })
        ));
    }

    #[test]
    fn identical_quad_sequences_commit_to_the_same_root() {
        let oracle = Blake3Oracle;
        let cfg = ProofConfig { merkle_depth: 4, ..ProofConfig::default() };
        let quads: Vec<Quad> = (0..4).map(quad).collect();
        let a = Commitment::over_quads(&oracle, &cfg, &quads).unwrap();
        let b = Commitment::over_quads(&oracle, &cfg, &quads.clone()).unwrap();
        assert_eq!(a.root(), b.root());

        // Order is significant: the input is an ordered multiset.
        let mut reversed = quads;
        reversed.reverse();
        let c = Commitment::over_quads(&oracle, &cfg, &reversed).unwrap();
        assert_ne!(a.root(), c.root());
    }

    #[test]
    fn direction_bits_are_lsb_first() {
        let oracle = Blake3Oracle;
        let cfg = ProofConfig { merkle_depth: 3, ..ProofConfig::default() };
        let quads: Vec<Quad> = (0..7).map(quad).collect();
        let c = Commitment::over_quads(&oracle, &cfg, &quads).unwrap();
        assert_eq!(c.directions(6), vec![false, true, true]); // 6 = 0b110
    }
}
