//! Happy-path crate API
//!
//! One-shot wrappers over the pipeline: generate keys, sign a dataset,
//! prepare a proof bundle, verify an envelope. Everything delegates to
//! the subsystem modules; nothing here adds semantics.
//!
//! ```ignore
//! let config = ProofConfig { merkle_depth: 4, ..ProofConfig::default() };
//! let keys = generate_keypair(&config)?;
//! let signed = sign_dataset(quads, &keys, &config)?;
//! let bundle = prepare_proof(query, &[signed], &Binding::new(), &config)?;
//! match verify_envelope(&bundle.envelope)? {
//!     VerificationResult::Valid { bindings } => println!("{bindings:?}"),
//!     VerificationResult::Invalid { reason } => eprintln!("{reason}"),
//! }
//! ```

#![forbid(unsafe_code)]

use oxrdf::Quad;
use tracing::info;

use crate::backend::PublicInputs;
use crate::commit::Commitment;
use crate::config::ProofConfig;
use crate::envelope::{self, Envelope};
use crate::error::Result;
use crate::lower::{lower, ConstraintProgram};
use crate::normalize::normalize_text;
use crate::signer::KeyPair;
use crate::witness::{build_witness, Witness};
use crate::{Binding, CancelFlag, SignedDataset};

/// Generate a key pair under the configured signature scheme.
pub fn generate_keypair(config: &ProofConfig) -> Result<KeyPair> {
    let signer = crate::signer::signer_by_id(&config.signer_id)?;
    let mut rng = rand::thread_rng();
    signer.generate(&mut rng)
}

/// Commit a canonicalized quad sequence and sign the root.
///
/// The input is treated as an opaque ordered multiset: blank-node labels
/// and quad order must already be canonical (an external concern).
pub fn sign_dataset(
    quads: Vec<Quad>,
    keys: &KeyPair,
    config: &ProofConfig,
) -> Result<SignedDataset> {
    config.validate()?;
    let oracle = crate::hash::oracle_by_id(&config.hash_id)?;
    let signer = crate::signer::signer_by_id(&config.signer_id)?;

    let commitment = Commitment::over_quads(oracle.as_ref(), config, &quads)?;
    let signature = signer.sign(&keys.secret, commitment.root())?;
    info!(
        target: "zksparql::api",
        quads = quads.len(),
        depth = config.merkle_depth,
        "dataset committed and signed"
    );
    Ok(SignedDataset { quads, commitment, signature, public_key: keys.public.clone() })
}

/// Everything `prepare_proof` produces.
#[derive(Clone, Debug)]
pub struct ProofBundle {
    /// The lowered constraint program (symbolic).
    pub program: ConstraintProgram,
    /// The witness filling it.
    pub witness: Witness,
    /// The self-describing envelope for the verifier.
    pub envelope: Envelope,
    /// The binding was under-specified: another assignment would
    /// disclose different values (the tie-break rule picked this one).
    pub ambiguous: bool,
}

/// Compile, search, prove, and assemble the envelope.
pub fn prepare_proof(
    query: &str,
    datasets: &[SignedDataset],
    binding: &Binding,
    config: &ProofConfig,
) -> Result<ProofBundle> {
    prepare_proof_with_cancel(query, datasets, binding, config, None)
}

/// [`prepare_proof`] with a cooperative cancellation flag.
pub fn prepare_proof_with_cancel(
    query: &str,
    datasets: &[SignedDataset],
    binding: &Binding,
    config: &ProofConfig,
    cancel: Option<&CancelFlag>,
) -> Result<ProofBundle> {
    config.validate()?;
    let oracle = crate::hash::oracle_by_id(&config.hash_id)?;
    let signer = crate::signer::signer_by_id(&config.signer_id)?;
    let backend = crate::backend::backend_by_id(&config.backend_id)?;

    let normalized = normalize_text(query, config)?;
    let program = lower(&normalized, datasets.len(), config, oracle.as_ref(), cancel)?;
    let built = build_witness(&program, datasets, binding, config, oracle.as_ref(), cancel)?;
    if built.ambiguous {
        info!(target: "zksparql::api", "binding is ambiguous; tie-break applied");
    }

    // Public inputs: roots, signatures, deduplicated keys, disclosures.
    let mut public_keys = Vec::new();
    let mut key_indices = Vec::with_capacity(datasets.len());
    for ds in datasets {
        let idx = match public_keys.iter().position(|k| *k == ds.public_key) {
            Some(i) => i,
            None => {
                public_keys.push(ds.public_key.clone());
                public_keys.len() - 1
            }
        };
        key_indices.push(idx);
    }
    let public = PublicInputs {
        roots: datasets.iter().map(SignedDataset::root).collect(),
        signatures: datasets.iter().map(|ds| ds.signature.clone()).collect(),
        key_indices,
        public_keys,
        disclosed: built.witness.disclosed.clone(),
        program_digest: program.digest(),
    };

    let (proof, vk) = backend.prove(
        &program,
        &public,
        &built.witness,
        oracle.as_ref(),
        signer.as_ref(),
    )?;
    info!(
        target: "zksparql::api",
        slots = program.slots.len(),
        hidden = program.hidden.len(),
        "proof generated"
    );

    let envelope = envelope::assemble(
        query,
        normalized.to_string(),
        config,
        datasets,
        &built.disclosed_terms,
        &proof,
        &vk,
        normalized.post.clone(),
    );

    Ok(ProofBundle { program, witness: built.witness, envelope, ambiguous: built.ambiguous })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{verify_envelope, SerializedTerm};
    use crate::error::Error;
    use crate::VerificationResult;
    use oxrdf::vocab::xsd;
    use oxrdf::{GraphName, Literal, NamedNode, Term, Variable};

    fn cfg() -> ProofConfig {
        ProofConfig { merkle_depth: 4, ..ProofConfig::default() }
    }

    fn iri(s: &str) -> NamedNode {
        NamedNode::new(format!("http://example.org/{s}")).unwrap()
    }

    fn valid_bindings(env: &Envelope) -> Vec<std::collections::BTreeMap<String, Option<SerializedTerm>>> {
        match verify_envelope(env).unwrap() {
            VerificationResult::Valid { bindings } => bindings,
            VerificationResult::Invalid { reason } => panic!("expected valid proof: {reason}"),
        }
    }

    #[test]
    fn single_bgp_literal_equality_end_to_end() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let signed = sign_dataset(
            vec![Quad::new(
                iri("a"),
                iri("p"),
                Literal::new_typed_literal("42", xsd::INTEGER),
                GraphName::DefaultGraph,
            )],
            &keys,
            &config,
        )
        .unwrap();

        let bundle = prepare_proof(
            "SELECT ?s WHERE { ?s <http://example.org/p> 42 }",
            &[signed],
            &Binding::new(),
            &config,
        )
        .unwrap();
        assert!(!bundle.ambiguous);

        let rows = valid_bindings(&bundle.envelope);
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0]["s"],
            Some(SerializedTerm::Iri { value: "http://example.org/a".into() })
        );
    }

    #[test]
    fn untyped_literal_twin_fails_to_prove() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let signed = sign_dataset(
            vec![Quad::new(
                iri("a"),
                iri("p"),
                Literal::new_simple_literal("42"),
                GraphName::DefaultGraph,
            )],
            &keys,
            &config,
        )
        .unwrap();
        let err = prepare_proof(
            "SELECT ?s WHERE { ?s <http://example.org/p> 42 }",
            &[signed],
            &Binding::new(),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoSatisfyingAssignment));
    }

    #[test]
    fn numeric_range_filter_hides_the_value() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let signed = sign_dataset(
            vec![Quad::new(
                iri("u"),
                iri("age"),
                Literal::new_typed_literal("30", xsd::INTEGER),
                GraphName::DefaultGraph,
            )],
            &keys,
            &config,
        )
        .unwrap();
        let query = "SELECT ?u WHERE { ?u <http://example.org/age> ?a . FILTER(?a >= 18) }";
        let bundle = prepare_proof(query, &[signed], &Binding::new(), &config).unwrap();

        // Only ?u is disclosed; the envelope never carries the age term.
        let rows = valid_bindings(&bundle.envelope);
        assert_eq!(rows[0].len(), 1);
        assert_eq!(
            rows[0]["u"],
            Some(SerializedTerm::Iri { value: "http://example.org/u".into() })
        );
        for row in &bundle.envelope.bindings {
            assert!(!row.contains_key("a"));
        }
        // The comparison bound is public through the query text.
        assert!(bundle.envelope.query.contains("18"));
    }

    #[test]
    fn optional_pattern_disclosure() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let signed = sign_dataset(
            vec![Quad::new(
                iri("a"),
                iri("name"),
                Literal::new_simple_literal("Alice"),
                GraphName::DefaultGraph,
            )],
            &keys,
            &config,
        )
        .unwrap();
        let bundle = prepare_proof(
            "SELECT ?n ?e WHERE { ?x <http://example.org/name> ?n . \
             OPTIONAL { ?x <http://example.org/email> ?e } }",
            &[signed],
            &Binding::new(),
            &config,
        )
        .unwrap();
        let rows = valid_bindings(&bundle.envelope);
        assert_eq!(
            rows[0]["n"],
            Some(SerializedTerm::Literal { value: "Alice".into(), language: None, datatype: None })
        );
        assert_eq!(rows[0]["e"], None);
    }

    #[test]
    fn union_over_two_signed_graphs() {
        let config = cfg();
        let keys_one = generate_keypair(&config).unwrap();
        let keys_two = generate_keypair(&config).unwrap();
        let first = sign_dataset(
            vec![Quad::new(iri("a"), iri("p1"), iri("v"), GraphName::DefaultGraph)],
            &keys_one,
            &config,
        )
        .unwrap();
        let second = sign_dataset(
            vec![Quad::new(iri("a"), iri("p2"), iri("v"), GraphName::DefaultGraph)],
            &keys_two,
            &config,
        )
        .unwrap();

        let bundle = prepare_proof(
            "SELECT ?x WHERE { { ?x <http://example.org/p1> <http://example.org/v> } UNION \
             { ?x <http://example.org/p2> <http://example.org/v> } }",
            &[first, second],
            &Binding::new(),
            &config,
        )
        .unwrap();

        // The chosen branch is disclosed through the witness flags.
        assert_eq!(bundle.witness.flags, vec![true, false]);
        assert_eq!(bundle.envelope.public_keys.len(), 2);
        let rows = valid_bindings(&bundle.envelope);
        assert_eq!(
            rows[0]["x"],
            Some(SerializedTerm::Iri { value: "http://example.org/a".into() })
        );
    }

    #[test]
    fn ask_query_proves_existence_with_empty_projection() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let signed = sign_dataset(
            vec![Quad::new(iri("a"), iri("p"), iri("b"), GraphName::DefaultGraph)],
            &keys,
            &config,
        )
        .unwrap();
        let bundle = prepare_proof(
            "ASK { <http://example.org/a> <http://example.org/p> ?o }",
            &[signed],
            &Binding::new(),
            &config,
        )
        .unwrap();
        let rows = valid_bindings(&bundle.envelope);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_empty());
    }

    #[test]
    fn tampered_binding_is_rejected() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let signed = sign_dataset(
            vec![Quad::new(iri("a"), iri("p"), iri("v"), GraphName::DefaultGraph)],
            &keys,
            &config,
        )
        .unwrap();
        let bundle = prepare_proof(
            "SELECT ?x WHERE { ?x <http://example.org/p> <http://example.org/v> }",
            &[signed],
            &Binding::new(),
            &config,
        )
        .unwrap();

        let mut tampered = bundle.envelope.clone();
        tampered.bindings[0].insert(
            "x".into(),
            Some(SerializedTerm::Iri { value: "http://example.org/mallory".into() }),
        );
        match verify_envelope(&tampered).unwrap() {
            VerificationResult::Invalid { .. } => {}
            other => panic!("tampered envelope verified: {other:?}"),
        }
    }

    #[test]
    fn tampered_root_signature_is_rejected() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let signed = sign_dataset(
            vec![Quad::new(iri("a"), iri("p"), iri("v"), GraphName::DefaultGraph)],
            &keys,
            &config,
        )
        .unwrap();
        let bundle = prepare_proof(
            "SELECT ?x WHERE { ?x <http://example.org/p> <http://example.org/v> }",
            &[signed],
            &Binding::new(),
            &config,
        )
        .unwrap();

        let mut tampered = bundle.envelope.clone();
        tampered.datasets[0].root =
            crate::envelope::field_to_hex(crate::F::from(999u64));
        match verify_envelope(&tampered).unwrap() {
            VerificationResult::Invalid { reason } => {
                assert!(reason.contains("signature"), "unexpected reason: {reason}")
            }
            other => panic!("tampered envelope verified: {other:?}"),
        }
    }

    #[test]
    fn envelope_survives_a_json_round_trip() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let signed = sign_dataset(
            vec![Quad::new(iri("a"), iri("p"), iri("v"), GraphName::DefaultGraph)],
            &keys,
            &config,
        )
        .unwrap();
        let bundle = prepare_proof(
            "SELECT ?x WHERE { ?x <http://example.org/p> <http://example.org/v> }",
            &[signed],
            &Binding::new(),
            &config,
        )
        .unwrap();
        let json = bundle.envelope.to_json().unwrap();
        let parsed = Envelope::from_json(&json).unwrap();
        assert_eq!(parsed, bundle.envelope);
        valid_bindings(&parsed);
    }

    #[test]
    fn queries_modifiers_land_in_the_envelope() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let signed = sign_dataset(
            vec![Quad::new(iri("a"), iri("p"), iri("v"), GraphName::DefaultGraph)],
            &keys,
            &config,
        )
        .unwrap();
        let mut binding = Binding::new();
        binding.insert(
            Variable::new("x").unwrap(),
            Term::NamedNode(iri("a")),
        );
        let bundle = prepare_proof(
            "SELECT DISTINCT ?x WHERE { ?x <http://example.org/p> <http://example.org/v> } \
             LIMIT 5 OFFSET 2",
            &[signed],
            &binding,
            &config,
        )
        .unwrap();
        assert!(bundle.envelope.post_processing.distinct);
        assert_eq!(bundle.envelope.post_processing.limit, Some(5));
        assert_eq!(bundle.envelope.post_processing.offset, Some(2));
        // The offset records the row's claimed position; the disclosed
        // row itself survives verification.
        let rows = valid_bindings(&bundle.envelope);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn value_equality_holds_where_term_equality_does_not() {
        // "042"^^xsd:integer has the value 42 but a different encoding.
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let signed = sign_dataset(
            vec![Quad::new(
                iri("a"),
                iri("p"),
                Literal::new_typed_literal("042", xsd::INTEGER),
                GraphName::DefaultGraph,
            )],
            &keys,
            &config,
        )
        .unwrap();

        // A BGP with the literal 42 requires term equality: no match.
        let err = prepare_proof(
            "SELECT ?s WHERE { ?s <http://example.org/p> 42 }",
            std::slice::from_ref(&signed),
            &Binding::new(),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoSatisfyingAssignment));

        // sameTerm likewise fails.
        let err = prepare_proof(
            "SELECT ?s WHERE { ?s <http://example.org/p> ?v . FILTER(sameTerm(?v, 42)) }",
            std::slice::from_ref(&signed),
            &Binding::new(),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoSatisfyingAssignment));

        // Value equality through the special coordinate succeeds.
        let bundle = prepare_proof(
            "SELECT ?s WHERE { ?s <http://example.org/p> ?v . FILTER(?v = 42) }",
            &[signed],
            &Binding::new(),
            &config,
        )
        .unwrap();
        let rows = valid_bindings(&bundle.envelope);
        assert_eq!(
            rows[0]["s"],
            Some(SerializedTerm::Iri { value: "http://example.org/a".into() })
        );
    }

    #[test]
    fn datetime_comparison_proves_without_disclosing_the_instant() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let signed = sign_dataset(
            vec![Quad::new(
                iri("doc"),
                iri("created"),
                Literal::new_typed_literal("2024-05-01T10:00:00Z", xsd::DATE_TIME),
                GraphName::DefaultGraph,
            )],
            &keys,
            &config,
        )
        .unwrap();
        let bundle = prepare_proof(
            "SELECT ?d WHERE { ?d <http://example.org/created> ?t . \
             FILTER(?t < \"2025-01-01T00:00:00Z\"^^<http://www.w3.org/2001/XMLSchema#dateTime>) }",
            std::slice::from_ref(&signed),
            &Binding::new(),
            &config,
        )
        .unwrap();
        let rows = valid_bindings(&bundle.envelope);
        assert_eq!(rows[0].len(), 1);
        assert_eq!(
            rows[0]["d"],
            Some(SerializedTerm::Iri { value: "http://example.org/doc".into() })
        );

        // The opposite bound has no satisfying assignment.
        let err = prepare_proof(
            "SELECT ?d WHERE { ?d <http://example.org/created> ?t . \
             FILTER(?t < \"2024-01-01T00:00:00Z\"^^<http://www.w3.org/2001/XMLSchema#dateTime>) }",
            &[signed],
            &Binding::new(),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoSatisfyingAssignment));
    }

    #[test]
    fn path_repetition_is_bounded_by_the_configured_maximum() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        // Chain of five hops: a -> b -> c -> d -> e -> f.
        let knows = iri("knows");
        let quads: Vec<Quad> = [("a", "b"), ("b", "c"), ("c", "d"), ("d", "e"), ("e", "f")]
            .into_iter()
            .map(|(s, o)| Quad::new(iri(s), knows.clone(), iri(o), GraphName::DefaultGraph))
            .collect();
        let signed = sign_dataset(quads, &keys, &config).unwrap();

        let query = "SELECT ?y WHERE { <http://example.org/a> <http://example.org/knows>+ ?y }";
        let reach = |target: &str| {
            let mut binding = Binding::new();
            binding.insert(Variable::new("y").unwrap(), Term::NamedNode(iri(target)));
            prepare_proof(query, std::slice::from_ref(&signed), &binding, &config)
        };

        // path_segment_max = 4: four hops reach ?y = e, five do not.
        assert!(reach("e").is_ok());
        assert!(matches!(reach("f"), Err(Error::NoSatisfyingAssignment)));
    }

    #[test]
    fn sign_dataset_respects_capacity() {
        let config = ProofConfig { merkle_depth: 1, ..ProofConfig::default() };
        let keys = generate_keypair(&config).unwrap();
        let quads: Vec<Quad> = (0..3)
            .map(|i| Quad::new(iri(&format!("s{i}")), iri("p"), iri("o"), GraphName::DefaultGraph))
            .collect();
        let err = sign_dataset(quads, &keys, &config).unwrap_err();
        assert!(matches!(err, Error::DatasetTooLarge { .. }));
    }

    #[test]
    fn reencoding_the_same_quads_reproduces_the_root() {
        let config = cfg();
        let keys = generate_keypair(&config).unwrap();
        let quads = vec![Quad::new(iri("a"), iri("p"), iri("v"), GraphName::DefaultGraph)];
        let one = sign_dataset(quads.clone(), &keys, &config).unwrap();
        let two = sign_dataset(quads, &keys, &config).unwrap();
        assert_eq!(one.root(), two.root());
        // Deterministic signer: identical signatures as well.
        assert_eq!(one.signature, two.signature);
    }
}
