//! Disclosure info and the proof envelope
//!
//! The envelope is the self-describing JSON document a verifier needs:
//! the query (original and normalized), the full configuration, the
//! public keys and signed roots, the disclosed bindings, the backend
//! artifact, and the post-processing instructions stripped during
//! normalization. `verify_envelope` re-derives the constraint program
//! from the disclosed query, so no out-of-band coordination exists.
//!
//! Wire conventions: field elements are hex-encoded big-endian integers;
//! all byte strings (keys, signatures, proof, vk) are base64.

#![forbid(unsafe_code)]

use ark_ff::{BigInteger, PrimeField};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use oxrdf::vocab::xsd;
use oxrdf::{BlankNode, Literal, NamedNode, Term, Variable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::algebra::PostProcessing;
use crate::backend::PublicInputs;
use crate::config::ProofConfig;
use crate::encode::encode_term;
use crate::error::{Error, Result};
use crate::normalize::normalize_text;
use crate::signer::{PublicKey, Signature};
use crate::{unbound_sentinel, F};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u16 = 1;

// ============================================================================
// Wire types
// ============================================================================

/// Structural serialization of an RDF term (no document-level RDF syntax
/// needed to read it back).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SerializedTerm {
    /// An IRI.
    Iri {
        /// The IRI string.
        value: String,
    },
    /// A blank node (canonical label).
    Blank {
        /// The blank-node label.
        value: String,
    },
    /// A literal.
    Literal {
        /// Lexical value.
        value: String,
        /// Language tag, when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        /// Datatype IRI; omitted for plain `xsd:string` literals.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datatype: Option<String>,
    },
}

impl SerializedTerm {
    /// Serialize a term.
    pub fn from_term(t: &Term) -> Self {
        match t {
            Term::NamedNode(n) => SerializedTerm::Iri { value: n.as_str().to_string() },
            Term::BlankNode(b) => SerializedTerm::Blank { value: b.as_str().to_string() },
            Term::Literal(l) => {
                let language = l.language().map(str::to_string);
                let datatype = if language.is_some() || l.datatype() == xsd::STRING {
                    None
                } else {
                    Some(l.datatype().as_str().to_string())
                };
                SerializedTerm::Literal { value: l.value().to_string(), language, datatype }
            }
        }
    }

    /// Reconstruct the term.
    pub fn to_term(&self) -> Result<Term> {
        Ok(match self {
            SerializedTerm::Iri { value } => Term::NamedNode(
                NamedNode::new(value.clone()).map_err(|e| Error::Parse(e.to_string()))?,
            ),
            SerializedTerm::Blank { value } => Term::BlankNode(
                BlankNode::new(value.clone()).map_err(|e| Error::Parse(e.to_string()))?,
            ),
            SerializedTerm::Literal { value, language, datatype } => {
                Term::Literal(match (language, datatype) {
                    (Some(lang), _) => Literal::new_language_tagged_literal(value, lang)
                        .map_err(|e| Error::Parse(e.to_string()))?,
                    (None, Some(dt)) => Literal::new_typed_literal(
                        value.clone(),
                        NamedNode::new(dt.clone()).map_err(|e| Error::Parse(e.to_string()))?,
                    ),
                    (None, None) => Literal::new_simple_literal(value),
                })
            }
        })
    }
}

/// The disclosed configuration subset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Hash oracle identifier.
    pub hash_id: String,
    /// Signature scheme identifier.
    pub signer_id: String,
    /// Proof backend identifier.
    pub backend_id: String,
    /// Merkle depth `D`.
    pub d: usize,
    /// Property-path expansion bound.
    pub path_max: usize,
    /// Signed comparison window width.
    pub range_width: usize,
    /// Language-tag case folding.
    #[serde(default)]
    pub fold_language_case: bool,
}

impl EnvelopeConfig {
    fn from_config(config: &ProofConfig) -> Self {
        Self {
            hash_id: config.hash_id.clone(),
            signer_id: config.signer_id.clone(),
            backend_id: config.backend_id.clone(),
            d: config.merkle_depth,
            path_max: config.path_segment_max,
            range_width: config.range_width,
            fold_language_case: config.fold_language_case,
        }
    }

    fn to_config(&self) -> ProofConfig {
        ProofConfig {
            hash_id: self.hash_id.clone(),
            signer_id: self.signer_id.clone(),
            backend_id: self.backend_id.clone(),
            merkle_depth: self.d,
            path_segment_max: self.path_max,
            range_width: self.range_width,
            fold_language_case: self.fold_language_case,
        }
    }
}

/// One signed dataset root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeRoot {
    /// Hex-encoded Merkle root.
    pub root: String,
    /// Base64 signature over the root.
    pub signature: String,
    /// Index into the envelope's `public_keys`.
    pub key_index: usize,
}

/// The proof envelope (§ wire format).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope format version.
    pub version: u16,
    /// The query as the prover submitted it.
    pub query: String,
    /// Canonical rendering of the normalized algebra (auditability).
    pub normalized_query: String,
    /// Disclosed configuration.
    pub config: EnvelopeConfig,
    /// Base64 public keys, deduplicated, in first-use order.
    pub public_keys: Vec<String>,
    /// Signed roots, one per dataset.
    pub datasets: Vec<EnvelopeRoot>,
    /// Disclosed binding rows (`null` = unbound). One row per proof.
    pub bindings: Vec<BTreeMap<String, Option<SerializedTerm>>>,
    /// Base64 backend proof artifact.
    pub proof: String,
    /// Base64 verification-key descriptor.
    pub vk: String,
    /// Stripped solution modifiers, applied by the verifier.
    pub post_processing: PostProcessing,
}

impl Envelope {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Parse(e.to_string()))
    }
}

/// Hex-encode a field element (big-endian).
pub fn field_to_hex(f: F) -> String {
    hex::encode(f.into_bigint().to_bytes_be())
}

/// Decode a hex-encoded field element.
pub fn hex_to_field(s: &str) -> Result<F> {
    let bytes = hex::decode(s).map_err(|e| Error::Parse(format!("bad field hex: {e}")))?;
    Ok(F::from_be_bytes_mod_order(&bytes))
}

// ============================================================================
// info
// ============================================================================

/// Structural disclosures implied by a query under a configuration,
/// computed without generating any proof.
#[derive(Clone, Debug, Serialize)]
pub struct DisclosureInfo {
    /// Projected (disclosed) variable names, in projection order.
    pub projected: Vec<String>,
    /// Merkle depth `D` (disclosed).
    pub merkle_depth: usize,
    /// Property-path expansion bound (disclosed).
    pub path_segment_max: usize,
    /// Whether an optional-match flag will be disclosed.
    pub uses_optional: bool,
    /// Whether a branch choice will be disclosed.
    pub uses_union: bool,
    /// Whether named-graph structure is constrained.
    pub uses_named_graph: bool,
    /// Branch arity of each union, in tree order; the taken index is
    /// revealed on success (for expanded paths this is the path length).
    pub union_branch_counts: Vec<usize>,
    /// Post-processing the verifier will apply to disclosed bindings.
    pub post_processing: PostProcessing,
    /// Public keys a verifier will learn participated, when supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_keys: Option<Vec<String>>,
}

/// Compute the disclosure info for `query` under `config`. Fails only
/// for `ParseError`/`UnsupportedFeature` (and invalid configuration).
pub fn info(
    query: &str,
    config: &ProofConfig,
    public_keys: Option<&[PublicKey]>,
) -> Result<DisclosureInfo> {
    config.validate()?;
    let normalized = normalize_text(query, config)?;
    Ok(DisclosureInfo {
        projected: normalized.projection.iter().map(|v| v.as_str().to_string()).collect(),
        merkle_depth: config.merkle_depth,
        path_segment_max: config.path_segment_max,
        uses_optional: normalized.algebra.contains_optional(),
        uses_union: normalized.algebra.contains_union(),
        uses_named_graph: normalized.algebra.contains_named_graph(),
        union_branch_counts: normalized.algebra.union_arities(),
        post_processing: normalized.post.clone(),
        public_keys: public_keys.map(|keys| keys.iter().map(|k| BASE64.encode(&k.0)).collect()),
    })
}

// ============================================================================
// Assembly (prover side)
// ============================================================================

/// Assemble the envelope from prove-time artifacts.
#[allow(clippy::too_many_arguments)]
pub(crate) fn assemble(
    query: &str,
    normalized_query: String,
    config: &ProofConfig,
    datasets: &[crate::SignedDataset],
    disclosed_terms: &BTreeMap<Variable, Option<Term>>,
    proof: &[u8],
    vk: &[u8],
    post: PostProcessing,
) -> Envelope {
    let mut public_keys: Vec<PublicKey> = Vec::new();
    let mut roots = Vec::with_capacity(datasets.len());
    for ds in datasets {
        let key_index = match public_keys.iter().position(|k| *k == ds.public_key) {
            Some(i) => i,
            None => {
                public_keys.push(ds.public_key.clone());
                public_keys.len() - 1
            }
        };
        roots.push(EnvelopeRoot {
            root: field_to_hex(ds.root()),
            signature: BASE64.encode(&ds.signature.0),
            key_index,
        });
    }

    let row: BTreeMap<String, Option<SerializedTerm>> = disclosed_terms
        .iter()
        .map(|(var, term)| {
            (
                var.as_str().to_string(),
                term.as_ref().map(SerializedTerm::from_term),
            )
        })
        .collect();

    Envelope {
        version: ENVELOPE_VERSION,
        query: query.to_string(),
        normalized_query,
        config: EnvelopeConfig::from_config(config),
        public_keys: public_keys.iter().map(|k| BASE64.encode(&k.0)).collect(),
        datasets: roots,
        bindings: vec![row],
        proof: BASE64.encode(proof),
        vk: BASE64.encode(vk),
        post_processing: post,
    }
}

// ============================================================================
// verify
// ============================================================================

/// Result of envelope verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationResult {
    /// The proof checks out; the post-processed disclosed bindings.
    Valid {
        /// Binding rows after Distinct/OrderBy/Slice application.
        bindings: Vec<BTreeMap<String, Option<SerializedTerm>>>,
    },
    /// The proof (or the envelope's internal consistency) does not.
    Invalid {
        /// Human-readable reason.
        reason: String,
    },
}

/// Verify an envelope: re-derive the constraint program from the
/// disclosed query and configuration, check the root signatures, invoke
/// the backend, and apply the stripped post-processing.
pub fn verify_envelope(envelope: &Envelope) -> Result<VerificationResult> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(Error::Parse(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }

    let config = envelope.config.to_config();
    config.validate()?;
    let oracle = crate::hash::oracle_by_id(&config.hash_id)?;
    let signer = crate::signer::signer_by_id(&config.signer_id)?;
    let backend = crate::backend::backend_by_id(&config.backend_id)?;

    // 1. Re-derive the constraint program from the disclosed query.
    let normalized = normalize_text(&envelope.query, &config)?;
    if normalized.to_string() != envelope.normalized_query {
        return Ok(VerificationResult::Invalid {
            reason: "normalized query does not match the disclosed normalization".into(),
        });
    }
    if normalized.post != envelope.post_processing {
        return Ok(VerificationResult::Invalid {
            reason: "post-processing instructions do not match the query".into(),
        });
    }
    let program = crate::lower::lower(
        &normalized,
        envelope.datasets.len(),
        &config,
        oracle.as_ref(),
        None,
    )?;

    // 2. Decode and check the signed roots.
    let mut public_keys = Vec::with_capacity(envelope.public_keys.len());
    for pk in &envelope.public_keys {
        public_keys.push(PublicKey(
            BASE64.decode(pk).map_err(|e| Error::Parse(format!("bad public key: {e}")))?,
        ));
    }
    let mut roots = Vec::with_capacity(envelope.datasets.len());
    let mut signatures = Vec::with_capacity(envelope.datasets.len());
    let mut key_indices = Vec::with_capacity(envelope.datasets.len());
    for (i, ds) in envelope.datasets.iter().enumerate() {
        let root = hex_to_field(&ds.root)?;
        let signature = Signature(
            BASE64
                .decode(&ds.signature)
                .map_err(|e| Error::Parse(format!("bad signature: {e}")))?,
        );
        if ds.key_index >= public_keys.len() {
            return Ok(VerificationResult::Invalid {
                reason: format!("dataset {i} names a missing public key"),
            });
        }
        if !signer.verify(&public_keys[ds.key_index], root, &signature) {
            return Ok(VerificationResult::Invalid {
                reason: format!("dataset {i} root signature is invalid"),
            });
        }
        roots.push(root);
        signatures.push(signature);
        key_indices.push(ds.key_index);
    }

    // 3. Decode the disclosed bindings (one row per proof).
    if envelope.bindings.len() != 1 {
        return Ok(VerificationResult::Invalid {
            reason: format!("expected one binding row, found {}", envelope.bindings.len()),
        });
    }
    let row = &envelope.bindings[0];
    let projected: Vec<&Variable> = program.projected.iter().map(|(v, _)| v).collect();
    if row.len() != projected.len()
        || !projected.iter().all(|v| row.contains_key(v.as_str()))
    {
        return Ok(VerificationResult::Invalid {
            reason: "disclosed variables do not match the query projection".into(),
        });
    }
    let mut disclosed = BTreeMap::new();
    for var in projected {
        let value = match &row[var.as_str()] {
            Some(term) => {
                let term = match term.to_term() {
                    Ok(t) => t,
                    Err(e) => {
                        return Ok(VerificationResult::Invalid {
                            reason: format!("binding for {var} is malformed: {e}"),
                        })
                    }
                };
                match encode_term(oracle.as_ref(), &config, term.as_ref()) {
                    Ok(f) => f,
                    Err(e) => {
                        return Ok(VerificationResult::Invalid {
                            reason: format!("binding for {var} cannot be encoded: {e}"),
                        })
                    }
                }
            }
            None => unbound_sentinel(),
        };
        disclosed.insert(var.clone(), value);
    }

    // 4. Backend verification.
    let public = PublicInputs {
        roots,
        signatures,
        key_indices,
        public_keys,
        disclosed,
        program_digest: program.digest(),
    };
    let proof = BASE64
        .decode(&envelope.proof)
        .map_err(|e| Error::Parse(format!("bad proof blob: {e}")))?;
    let vk = BASE64
        .decode(&envelope.vk)
        .map_err(|e| Error::Parse(format!("bad vk blob: {e}")))?;
    if !backend.verify(&proof, &vk, &public)? {
        debug!(target: "zksparql::envelope", "backend rejected the proof");
        return Ok(VerificationResult::Invalid { reason: "backend rejected the proof".into() });
    }

    // 5. Post-processing on disclosed bindings.
    let bindings = apply_post_processing(envelope.bindings.clone(), &envelope.post_processing);
    Ok(VerificationResult::Valid { bindings })
}

/// Apply Distinct/Reduced, OrderBy, and Limit to disclosed binding rows.
///
/// The rows of one envelope are the disclosed *window* of the full
/// solution sequence, and `offset` is the claimed position of that
/// window within the sequence. It therefore travels as metadata rather
/// than slicing the window itself: a proof for `OFFSET k` discloses the
/// row already sitting at position `k`, and re-slicing the one-row
/// window would discard it. Only `limit` can truncate the window.
pub fn apply_post_processing(
    mut rows: Vec<BTreeMap<String, Option<SerializedTerm>>>,
    post: &PostProcessing,
) -> Vec<BTreeMap<String, Option<SerializedTerm>>> {
    if !post.order_by.is_empty() {
        rows.sort_by(|a, b| {
            for key in &post.order_by {
                let va = a.get(&key.var).cloned().flatten();
                let vb = b.get(&key.var).cloned().flatten();
                let ord = term_sort_key(&va).cmp(&term_sort_key(&vb));
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
    }
    if post.distinct || post.reduced {
        let mut seen = Vec::new();
        rows.retain(|row| {
            if seen.contains(row) {
                false
            } else {
                seen.push(row.clone());
                true
            }
        });
    }
    if let Some(limit) = post.limit {
        rows.truncate(limit);
    }
    rows
}

/// Sort key: unbound first, then by kind and serialized form.
fn term_sort_key(t: &Option<SerializedTerm>) -> (u8, String, String) {
    match t {
        None => (0, String::new(), String::new()),
        Some(SerializedTerm::Blank { value }) => (1, value.clone(), String::new()),
        Some(SerializedTerm::Iri { value }) => (2, value.clone(), String::new()),
        Some(SerializedTerm::Literal { value, language, datatype }) => (
            3,
            value.clone(),
            format!("{}|{}", language.clone().unwrap_or_default(), datatype.clone().unwrap_or_default()),
        ),
    }
}
