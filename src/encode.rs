//! RDF term and quad encoding (deterministic map into the field)
//!
//! Every RDF term becomes `h2(type_code, value_encoding)`. Literals are a
//! 4-coordinate record `h4(value, special, language, datatype)` so that the
//! collision profile is symmetric across the coordinates and constraints
//! can compare numeric/datetime *values* through the `special` coordinate
//! without decoding the literal.
//!
//! Type codes are part of the wire contract and MUST NOT change:
//! IRI=0, blank node=1, literal=2, variable=3 (patterns only), default
//! graph=4.
//!
//! Determinism: identical term + configuration yields a bitwise-identical
//! field element, across invocations and across processes. Blank-node
//! labels are assumed stable (upstream canonicalization).

#![forbid(unsafe_code)]

use ark_ff::PrimeField;
use oxrdf::vocab::xsd;
use oxrdf::{GraphNameRef, LiteralRef, NamedNodeRef, Quad, SubjectRef, TermRef};

use crate::config::ProofConfig;
use crate::error::{Error, Result};
use crate::hash::HashOracle;
use crate::F;

/// Type code for IRIs.
pub const TYPE_CODE_IRI: u64 = 0;
/// Type code for blank nodes.
pub const TYPE_CODE_BLANK: u64 = 1;
/// Type code for literals.
pub const TYPE_CODE_LITERAL: u64 = 2;
/// Type code for variables (appears only in patterns, never in data).
pub const TYPE_CODE_VARIABLE: u64 = 3;
/// Type code for the default graph.
pub const TYPE_CODE_DEFAULT_GRAPH: u64 = 4;

/// `encode_string(s) = hash_bytes(utf8(s))`, reduced into the field by the
/// oracle.
pub fn encode_string(oracle: &dyn HashOracle, s: &str) -> F {
    oracle.hash_bytes(s.as_bytes())
}

/// Classification of a literal's `special` coordinate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Special {
    /// Integer family (`xsd:integer` and subtypes): the parsed signed value.
    Numeric(i128),
    /// `xsd:dateTime`: Unix epoch milliseconds.
    DateTime(i128),
    /// `xsd:boolean`: 1 for lexicals in {"true","1"}, 0 otherwise.
    Bool(bool),
    /// Every other datatype: the coordinate is the string encoding of the
    /// lexical value.
    Text,
}

/// The four coordinates of a literal record, pre-`h4`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiteralCoords {
    /// `encode_string(lexical value)`.
    pub value: F,
    /// The `special` coordinate (see [`Special`]).
    pub special: F,
    /// `encode_string(language tag or "")`.
    pub lang: F,
    /// `encode_string(datatype IRI)`.
    pub datatype: F,
}

/// True for `xsd:integer` and its derived integer types.
pub fn is_integer_datatype(dt: NamedNodeRef<'_>) -> bool {
    dt == xsd::INTEGER
        || dt == xsd::LONG
        || dt == xsd::INT
        || dt == xsd::SHORT
        || dt == xsd::BYTE
        || dt == xsd::NON_NEGATIVE_INTEGER
        || dt == xsd::POSITIVE_INTEGER
        || dt == xsd::NON_POSITIVE_INTEGER
        || dt == xsd::NEGATIVE_INTEGER
        || dt == xsd::UNSIGNED_LONG
        || dt == xsd::UNSIGNED_INT
        || dt == xsd::UNSIGNED_SHORT
        || dt == xsd::UNSIGNED_BYTE
}

/// Comparison class of a datatype: integer family, dateTime, or neither.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumericClass {
    /// Integer family.
    Integer,
    /// `xsd:dateTime`.
    DateTime,
    /// Not comparable through `special`.
    Other,
}

/// Classify a datatype IRI for ordered comparison.
pub fn numeric_class(dt: NamedNodeRef<'_>) -> NumericClass {
    if is_integer_datatype(dt) {
        NumericClass::Integer
    } else if dt == xsd::DATE_TIME {
        NumericClass::DateTime
    } else {
        NumericClass::Other
    }
}

/// Parse an `xsd:dateTime` lexical into epoch milliseconds.
///
/// Accepts timezone-qualified forms (RFC 3339) and timezone-less forms,
/// which are interpreted as UTC.
pub fn parse_datetime_millis(lexical: &str) -> Result<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(lexical) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(lexical, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc().timestamp_millis());
    }
    Err(Error::DatetimeParse { lexical: lexical.to_string() })
}

/// Compute the [`Special`] classification of a literal under `config`.
///
/// Fails with `LiteralOverflow` when an integer (or epoch-millis) magnitude
/// exceeds the configured window, and with `DatetimeParse` on malformed
/// `xsd:dateTime` lexicals.
pub fn classify_special(config: &ProofConfig, lit: LiteralRef<'_>) -> Result<Special> {
    let dt = lit.datatype();
    if dt == xsd::BOOLEAN {
        let lexical = lit.value().trim();
        return Ok(Special::Bool(lexical == "true" || lexical == "1"));
    }
    if is_integer_datatype(dt) {
        let lexical = lit.value().trim();
        let v: i128 = lexical
            .parse()
            .map_err(|_| Error::LiteralOverflow { lexical: lexical.to_string() })?;
        if v.unsigned_abs() > config.numeric_bound() as u128 {
            return Err(Error::LiteralOverflow { lexical: lexical.to_string() });
        }
        return Ok(Special::Numeric(v));
    }
    if dt == xsd::DATE_TIME {
        let millis = parse_datetime_millis(lit.value().trim())? as i128;
        if millis.unsigned_abs() > config.numeric_bound() as u128 {
            return Err(Error::LiteralOverflow { lexical: lit.value().to_string() });
        }
        return Ok(Special::DateTime(millis));
    }
    Ok(Special::Text)
}

/// Map a signed comparison value into the field (negative values wrap to
/// `p - |v|`).
pub fn signed_to_field(v: i128) -> F {
    if v >= 0 {
        F::from(v as u128)
    } else {
        -F::from(v.unsigned_abs())
    }
}

/// Recover a signed value from the field, if it lies inside the
/// `±(2^(range_width-1) - 1)` window. Values outside the window (including
/// string-encoded `special` coordinates) return `None`.
pub fn field_to_signed(f: F, range_width: usize) -> Option<i128> {
    let bound: u128 = (1u128 << (range_width - 1)) - 1;
    if let Some(p) = field_to_u128(f) {
        if p <= bound {
            return Some(p as i128);
        }
    }
    if let Some(n) = field_to_u128(-f) {
        if n <= bound {
            return Some(-(n as i128));
        }
    }
    None
}

fn field_to_u128(f: F) -> Option<u128> {
    let limbs = f.into_bigint().0;
    if limbs[2] != 0 || limbs[3] != 0 {
        return None;
    }
    Some(((limbs[1] as u128) << 64) | limbs[0] as u128)
}

/// The language tag actually encoded, after optional case folding.
fn effective_lang(config: &ProofConfig, lit: LiteralRef<'_>) -> String {
    let lang = lit.language().unwrap_or("");
    if config.fold_language_case {
        lang.to_ascii_lowercase()
    } else {
        lang.to_string()
    }
}

/// Compute the four literal coordinates.
pub fn literal_coords(
    oracle: &dyn HashOracle,
    config: &ProofConfig,
    lit: LiteralRef<'_>,
) -> Result<LiteralCoords> {
    let special = match classify_special(config, lit)? {
        Special::Bool(b) => F::from(b as u64),
        Special::Numeric(v) | Special::DateTime(v) => signed_to_field(v),
        Special::Text => encode_string(oracle, lit.value()),
    };
    Ok(LiteralCoords {
        value: encode_string(oracle, lit.value()),
        special,
        lang: encode_string(oracle, &effective_lang(config, lit)),
        datatype: encode_string(oracle, lit.datatype().as_str()),
    })
}

/// `E(literal) = h2(2, h4(value, special, lang, datatype))`.
pub fn encode_literal(
    oracle: &dyn HashOracle,
    config: &ProofConfig,
    lit: LiteralRef<'_>,
) -> Result<F> {
    let c = literal_coords(oracle, config, lit)?;
    let record = oracle.h4(c.value, c.special, c.lang, c.datatype);
    Ok(oracle.h2(F::from(TYPE_CODE_LITERAL), record))
}

/// Encode any data-position term.
pub fn encode_term(oracle: &dyn HashOracle, config: &ProofConfig, t: TermRef<'_>) -> Result<F> {
    match t {
        TermRef::NamedNode(n) => {
            Ok(oracle.h2(F::from(TYPE_CODE_IRI), encode_string(oracle, n.as_str())))
        }
        TermRef::BlankNode(b) => {
            Ok(oracle.h2(F::from(TYPE_CODE_BLANK), encode_string(oracle, b.as_str())))
        }
        TermRef::Literal(l) => encode_literal(oracle, config, l),
    }
}

/// Encode a subject-position term.
pub fn encode_subject(oracle: &dyn HashOracle, config: &ProofConfig, s: SubjectRef<'_>) -> Result<F> {
    match s {
        SubjectRef::NamedNode(n) => encode_term(oracle, config, TermRef::NamedNode(n)),
        SubjectRef::BlankNode(b) => encode_term(oracle, config, TermRef::BlankNode(b)),
    }
}

/// Encode a graph-position term. The default graph encodes as
/// `h2(4, encode_string(""))`.
pub fn encode_graph(oracle: &dyn HashOracle, config: &ProofConfig, g: GraphNameRef<'_>) -> Result<F> {
    match g {
        GraphNameRef::NamedNode(n) => encode_term(oracle, config, TermRef::NamedNode(n)),
        GraphNameRef::BlankNode(b) => encode_term(oracle, config, TermRef::BlankNode(b)),
        GraphNameRef::DefaultGraph => {
            Ok(oracle.h2(F::from(TYPE_CODE_DEFAULT_GRAPH), encode_string(oracle, "")))
        }
    }
}

/// The four encoded positions of a quad, in `(s, p, o, g)` order.
pub fn encode_quad_terms(
    oracle: &dyn HashOracle,
    config: &ProofConfig,
    q: &Quad,
) -> Result<[F; 4]> {
    Ok([
        encode_subject(oracle, config, q.subject.as_ref())?,
        encode_term(oracle, config, TermRef::NamedNode(q.predicate.as_ref()))?,
        encode_term(oracle, config, q.object.as_ref())?,
        encode_graph(oracle, config, q.graph_name.as_ref())?,
    ])
}

/// `encode_quad(s,p,o,g) = h4(E(s), E(p), E(o), E(g))`, the Merkle leaf.
pub fn encode_quad(oracle: &dyn HashOracle, config: &ProofConfig, q: &Quad) -> Result<F> {
    let [s, p, o, g] = encode_quad_terms(oracle, config, q)?;
    Ok(oracle.h4(s, p, o, g))
}
