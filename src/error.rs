//! Crate-wide error taxonomy
//!
//! One enum, kind-first. Every fallible entry point in the crate surfaces
//! one of these variants; there is no retry and no partial success. The
//! taxonomy groups into configuration, input, semantic, witness, proof,
//! and control kinds, and the CLI maps those groups onto its exit codes.

#![forbid(unsafe_code)]

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure kinds surfaced by the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ------------------------------ configuration ----------------------------
    /// The envelope (or caller) named a hash oracle this build does not know.
    /// Unknown identifiers are rejected, never silently defaulted.
    #[error("unknown hash oracle identifier `{0}`")]
    HashMismatch(String),

    /// The envelope (or caller) named a signature scheme this build does not know.
    #[error("unsupported signer scheme `{0}`")]
    UnsupportedSignerScheme(String),

    /// Merkle depth is zero or above the supported ceiling.
    #[error("merkle depth {depth} out of range (must be 1..={max})")]
    MerkleDepthTooSmall {
        /// The depth that was supplied.
        depth: usize,
        /// The maximum supported depth.
        max: usize,
    },

    /// Numeric range width is zero or too close to the field bit length.
    #[error("numeric range width {width} out of bounds (must be 1..={max})")]
    RangeWidthOutOfBounds {
        /// The width that was supplied.
        width: usize,
        /// The maximum supported width.
        max: usize,
    },

    // --------------------------------- input ---------------------------------
    /// SPARQL (or envelope document) failed to parse.
    #[error("parse error: {0}")]
    Parse(String),

    /// The query uses a feature outside the circuit-accepted subset.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// A term kind the encoder does not handle (e.g. embedded triples).
    #[error("unsupported term type: {0}")]
    UnsupportedTermType(String),

    /// An integer literal's magnitude exceeds the configured numeric window.
    #[error("integer literal `{lexical}` exceeds the configured numeric range")]
    LiteralOverflow {
        /// The offending lexical form.
        lexical: String,
    },

    /// A malformed `xsd:dateTime` lexical form.
    #[error("cannot parse `{lexical}` as xsd:dateTime")]
    DatetimeParse {
        /// The offending lexical form.
        lexical: String,
    },

    /// More quads than the `2^D` leaf capacity of the commitment tree.
    #[error("dataset has {quads} quads but the depth-{depth} tree holds at most {capacity}")]
    DatasetTooLarge {
        /// Number of quads in the dataset.
        quads: usize,
        /// Leaf capacity of the commitment tree.
        capacity: usize,
        /// Depth of the commitment tree.
        depth: usize,
    },

    // -------------------------------- semantic -------------------------------
    /// Filter evaluation over incompatible operand types, outside any
    /// short-circuiting boolean context that could absorb it.
    #[error("type error: {0}")]
    TypeErr(String),

    /// Multiple assignments with different disclosed values exist. The
    /// builder still produced a witness under its tie-break rule; this is
    /// surfaced as a warning alongside the bundle, and as an error only
    /// when the caller requested strict binding.
    #[error("binding is ambiguous: multiple assignments disclose different values")]
    AmbiguousBinding,

    // -------------------------------- witness --------------------------------
    /// The backtracking search exhausted every quad assignment.
    #[error("no satisfying assignment over the signed datasets")]
    NoSatisfyingAssignment,

    // --------------------------------- proof ---------------------------------
    /// Opaque failure reported by (or about) the proof backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// Envelope verification failed.
    #[error("verification failed: {0}")]
    VerifyFailed(String),

    // -------------------------------- control --------------------------------
    /// The caller's cancel flag was observed; no partial outputs committed.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// CLI exit code for this error: 1 = verification failure, 2 =
    /// usage/configuration/input, 3 = unsupported feature.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::UnsupportedFeature(_) | Error::UnsupportedTermType(_) => 3,
            Error::VerifyFailed(_) => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_cli_contract() {
        assert_eq!(Error::UnsupportedFeature("MINUS".into()).exit_code(), 3);
        assert_eq!(Error::VerifyFailed("bad proof".into()).exit_code(), 1);
        assert_eq!(Error::Parse("oops".into()).exit_code(), 2);
        assert_eq!(
            Error::DatasetTooLarge { quads: 17, capacity: 16, depth: 4 }.exit_code(),
            2
        );
    }

    #[test]
    fn messages_name_the_offending_input() {
        let e = Error::LiteralOverflow { lexical: "999999999999999999999999".into() };
        assert!(e.to_string().contains("999999999999999999999999"));
        let e = Error::DatetimeParse { lexical: "not-a-date".into() };
        assert!(e.to_string().contains("not-a-date"));
    }
}
