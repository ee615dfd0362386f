//! Proof configuration
//!
//! A single read-only record passed explicitly to every entry point. The
//! identifier strings select the hash oracle, signer scheme, and proof
//! backend; the numeric knobs bound the commitment capacity, property-path
//! expansion, and the signed window used by range-checked comparisons.
//! Everything here is disclosed through the envelope, and prove/verify
//! MUST run under identical configurations.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ceiling on the Merkle depth (2^32 leaves is far beyond any dataset this
/// crate is meant to commit; the bound keeps path allocations sane).
pub const MAX_MERKLE_DEPTH: usize = 32;

/// Ceiling on the numeric range width. Comparison differences occupy
/// `width + 1` bits and must stay well below the ~254-bit field.
pub const MAX_RANGE_WIDTH: usize = 128;

/// Read-only configuration shared by prover and verifier.
///
/// Invariant: the verifier re-derives the constraint program from the
/// disclosed query under this exact configuration, so any mismatch shows
/// up as a failed proof rather than undefined behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofConfig {
    /// Hash oracle identifier (see [`crate::hash::oracle_by_id`]).
    pub hash_id: String,
    /// Signature scheme identifier (see [`crate::signer::signer_by_id`]).
    pub signer_id: String,
    /// Proof backend identifier (see [`crate::backend::backend_by_id`]).
    pub backend_id: String,
    /// Merkle tree depth `D`; datasets hold at most `2^D` quads.
    pub merkle_depth: usize,
    /// Maximal number of hops a `+`/`*` property path expands to.
    pub path_segment_max: usize,
    /// Bit width of the signed window for numeric/datetime comparison.
    /// Integer literals must satisfy `|v| < 2^(range_width - 1)`.
    pub range_width: usize,
    /// Lowercase language tags before encoding (BCP 47 treats tags
    /// case-insensitively; the default keeps the byte-exact encoding).
    #[serde(default)]
    pub fold_language_case: bool,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            hash_id: crate::hash::BLAKE3_ORACLE_ID.to_string(),
            signer_id: crate::signer::SCHNORR_BN254_ID.to_string(),
            backend_id: crate::backend::MOCK_BACKEND_ID.to_string(),
            merkle_depth: 16,
            path_segment_max: 4,
            range_width: 64,
            fold_language_case: false,
        }
    }
}

impl ProofConfig {
    /// Leaf capacity `2^D` of the commitment tree.
    pub fn capacity(&self) -> usize {
        1usize << self.merkle_depth
    }

    /// Largest integer magnitude the `special` coordinate accepts:
    /// `2^(range_width - 1) - 1`.
    pub fn numeric_bound(&self) -> i128 {
        (1i128 << (self.range_width - 1)) - 1
    }

    /// Validate the numeric knobs. Identifier strings are validated at
    /// resolution time by the respective registries.
    pub fn validate(&self) -> Result<()> {
        if self.merkle_depth == 0 || self.merkle_depth > MAX_MERKLE_DEPTH {
            return Err(Error::MerkleDepthTooSmall {
                depth: self.merkle_depth,
                max: MAX_MERKLE_DEPTH,
            });
        }
        if self.range_width == 0 || self.range_width > MAX_RANGE_WIDTH {
            return Err(Error::RangeWidthOutOfBounds {
                width: self.range_width,
                max: MAX_RANGE_WIDTH,
            });
        }
        if self.path_segment_max == 0 {
            return Err(Error::UnsupportedFeature(
                "path_segment_max must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        ProofConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_depth_is_rejected() {
        let cfg = ProofConfig { merkle_depth: 0, ..ProofConfig::default() };
        assert!(matches!(cfg.validate(), Err(Error::MerkleDepthTooSmall { .. })));
    }

    #[test]
    fn oversized_range_width_is_rejected() {
        let cfg = ProofConfig { range_width: 256, ..ProofConfig::default() };
        assert!(matches!(cfg.validate(), Err(Error::RangeWidthOutOfBounds { .. })));
    }

    #[test]
    fn numeric_bound_matches_width() {
        let cfg = ProofConfig { range_width: 8, ..ProofConfig::default() };
        assert_eq!(cfg.numeric_bound(), 127);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = ProofConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ProofConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
