//! Proof backend seam and the mock development backend
//!
//! The core never proves anything itself: it emits a constraint program
//! plus witness data, and any backend satisfying [`ProofBackend`] turns
//! them into an opaque proof artifact. The backend identifier is
//! disclosed in the envelope and unknown identifiers are rejected.
//!
//! This module also owns the reference **assertion evaluator**, the
//! executable semantics of the constraint program. The witness builder
//! validates every complete assignment against it, and the mock backend
//! runs it at prove time, so the two cannot drift apart.
//!
//! `mock-check-v1` is a development backend in the spirit of a dev-mode
//! SRS: it checks the full program against the witness when proving and
//! binds the artifact to a digest of (program, public inputs). It is NOT
//! zero-knowledge and NOT sound against a malicious prover; it exists so
//! the whole pipeline is exercisable in ordinary tests.

#![forbid(unsafe_code)]

use ark_serialize::CanonicalSerialize;
use std::sync::Arc;

use crate::commit::verify_inclusion;
use crate::encode::field_to_signed;
use crate::error::{Error, Result};
use crate::hash::HashOracle;
use crate::lower::{Assertion, CmpOp, ConstraintProgram, Guard, Pred, ValueRef};
use crate::signer::{PublicKey, Signature, Signer};
use crate::witness::Witness;
use crate::{unbound_sentinel, F};

/// Identifier of the mock development backend.
pub const MOCK_BACKEND_ID: &str = "mock-check-v1";

/// Everything a verifier learns: the public half of the proof relation.
#[derive(Clone, Debug)]
pub struct PublicInputs {
    /// Per-dataset signed Merkle roots.
    pub roots: Vec<F>,
    /// Per-dataset root signatures.
    pub signatures: Vec<Signature>,
    /// Per-dataset index into `public_keys`.
    pub key_indices: Vec<usize>,
    /// Deduplicated public keys.
    pub public_keys: Vec<PublicKey>,
    /// Disclosed variable values (sentinel for unbound).
    pub disclosed: std::collections::BTreeMap<oxrdf::Variable, F>,
    /// Digest of the constraint program being proven.
    pub program_digest: [u8; 32],
}

impl PublicInputs {
    /// Canonical digest of the public inputs.
    pub fn digest(&self) -> [u8; 32] {
        let mut h = blake3::Hasher::new();
        h.update(b"zksparql.public.v1");
        h.update(&self.program_digest);
        h.update(&(self.roots.len() as u64).to_be_bytes());
        for (i, root) in self.roots.iter().enumerate() {
            let mut bytes = Vec::with_capacity(32);
            root.serialize_compressed(&mut bytes).expect("serialize root");
            h.update(&bytes);
            h.update(&(self.key_indices[i] as u64).to_be_bytes());
            h.update(&(self.signatures[i].0.len() as u64).to_be_bytes());
            h.update(&self.signatures[i].0);
        }
        h.update(&(self.public_keys.len() as u64).to_be_bytes());
        for pk in &self.public_keys {
            h.update(&(pk.0.len() as u64).to_be_bytes());
            h.update(&pk.0);
        }
        for (var, value) in &self.disclosed {
            h.update(b"var:");
            h.update(var.as_str().as_bytes());
            let mut bytes = Vec::with_capacity(32);
            value.serialize_compressed(&mut bytes).expect("serialize value");
            h.update(&bytes);
        }
        *h.finalize().as_bytes()
    }
}

/// Pluggable proof backend.
pub trait ProofBackend: Send + Sync {
    /// Stable identifier, disclosed in the envelope.
    fn id(&self) -> &'static str;

    /// Produce a proof artifact and its verification-key descriptor.
    fn prove(
        &self,
        program: &ConstraintProgram,
        public: &PublicInputs,
        witness: &Witness,
        oracle: &dyn HashOracle,
        signer: &dyn Signer,
    ) -> Result<(Vec<u8>, Vec<u8>)>;

    /// Verify an artifact against the verification key and public inputs.
    fn verify(&self, proof: &[u8], vk: &[u8], public: &PublicInputs) -> Result<bool>;
}

/// Resolve a backend by identifier.
pub fn backend_by_id(id: &str) -> Result<Arc<dyn ProofBackend>> {
    match id {
        MOCK_BACKEND_ID => Ok(Arc::new(MockBackend)),
        other => Err(Error::Backend(format!("unknown proof backend `{other}`"))),
    }
}

/// The mock development backend (see module docs).
pub struct MockBackend;

impl MockBackend {
    fn artifact(public: &PublicInputs) -> Vec<u8> {
        let mut h = blake3::Hasher::new();
        h.update(b"zksparql.mock.v1");
        h.update(&public.digest());
        h.finalize().as_bytes().to_vec()
    }
}

impl ProofBackend for MockBackend {
    fn id(&self) -> &'static str {
        MOCK_BACKEND_ID
    }

    fn prove(
        &self,
        program: &ConstraintProgram,
        public: &PublicInputs,
        witness: &Witness,
        oracle: &dyn HashOracle,
        signer: &dyn Signer,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let sig_ctx = SigContext {
            signer,
            signatures: &public.signatures,
            key_indices: &public.key_indices,
            keys: &public.public_keys,
        };
        match check_witness(program, witness, &public.roots, oracle, Some(sig_ctx)) {
            CheckResult::Pass => {}
            CheckResult::Fail(msg) => {
                return Err(Error::Backend(format!("witness check failed: {msg}")))
            }
            CheckResult::TypeError(msg) => {
                return Err(Error::Backend(format!("witness check type error: {msg}")))
            }
        }
        Ok((Self::artifact(public), program.digest().to_vec()))
    }

    fn verify(&self, proof: &[u8], vk: &[u8], public: &PublicInputs) -> Result<bool> {
        if vk != public.program_digest.as_slice() {
            return Ok(false);
        }
        Ok(proof == Self::artifact(public).as_slice())
    }
}

// ============================================================================
// Assertion evaluator (executable program semantics)
// ============================================================================

/// Signature-checking context; `None` skips `SigOk` (the witness builder
/// does not re-verify signatures it was handed).
pub(crate) struct SigContext<'a> {
    pub signer: &'a dyn Signer,
    pub signatures: &'a [Signature],
    pub key_indices: &'a [usize],
    pub keys: &'a [PublicKey],
}

/// Outcome of evaluating a witness against the program.
pub(crate) enum CheckResult {
    Pass,
    /// An assertion is false (candidate rejected / proof invalid).
    Fail(String),
    /// A filter predicate evaluated to a type error at top level.
    TypeError(String),
}

pub(crate) fn check_witness(
    program: &ConstraintProgram,
    witness: &Witness,
    roots: &[F],
    oracle: &dyn HashOracle,
    sig_ctx: Option<SigContext<'_>>,
) -> CheckResult {
    for (i, guarded) in program.assertions.iter().enumerate() {
        if !guards_ok(&guarded.guards, witness) {
            continue;
        }
        match &guarded.assertion {
            Assertion::SigOk { root_index } => {
                let Some(ctx) = &sig_ctx else { continue };
                let root = roots[*root_index];
                let key = &ctx.keys[ctx.key_indices[*root_index]];
                if !ctx.signer.verify(key, root, &ctx.signatures[*root_index]) {
                    return CheckResult::Fail(format!("root {root_index} signature invalid"));
                }
            }
            Assertion::Inclusion { slot } => {
                let sw = &witness.slots[slot.0];
                if sw.root_index >= roots.len() {
                    return CheckResult::Fail(format!("slot {} root index out of range", slot.0));
                }
                let leaf = oracle.h4(sw.terms[0], sw.terms[1], sw.terms[2], sw.terms[3]);
                if !verify_inclusion(oracle, leaf, &sw.path, &sw.directions, roots[sw.root_index]) {
                    return CheckResult::Fail(format!("slot {} inclusion fails", slot.0));
                }
            }
            Assertion::TermEq { pos, value } => {
                if witness.slots[pos.slot.0].terms[pos.pos.index()] != *value {
                    return CheckResult::Fail(format!(
                        "slot {} position {:?} differs from the query term",
                        pos.slot.0, pos.pos
                    ));
                }
            }
            Assertion::Unify { a, b } => {
                let va = witness.slots[a.slot.0].terms[a.pos.index()];
                let vb = witness.slots[b.slot.0].terms[b.pos.index()];
                if va != vb {
                    return CheckResult::Fail(format!(
                        "unification between slots {} and {} fails",
                        a.slot.0, b.slot.0
                    ));
                }
            }
            Assertion::VarBind { var, value } => {
                let Some(disclosed) = witness.disclosed.get(var) else {
                    return CheckResult::Fail(format!("variable {var} is not disclosed"));
                };
                if *disclosed != value_of(value, witness) {
                    return CheckResult::Fail(format!(
                        "disclosed value of {var} differs from the witness"
                    ));
                }
            }
            Assertion::HiddenBind { hidden, value } => {
                if witness.hidden[hidden.0] != value_of(value, witness) {
                    return CheckResult::Fail(format!("hidden input {} bind fails", hidden.0));
                }
            }
            Assertion::Predicate(pred) => {
                match eval_pred(pred, witness, oracle, program.range_width) {
                    Some(true) => {}
                    Some(false) => {
                        return CheckResult::Fail(format!("filter predicate {i} is false"))
                    }
                    None => {
                        return CheckResult::TypeError(format!(
                            "filter predicate {i} evaluates to a type error"
                        ))
                    }
                }
            }
            Assertion::OneHot { flags } => {
                let set = flags.iter().filter(|f| witness.flags[f.0]).count();
                if set != 1 {
                    return CheckResult::Fail(format!(
                        "one-hot group has {set} branches set"
                    ));
                }
            }
        }
    }
    CheckResult::Pass
}

fn guards_ok(guards: &[Guard], witness: &Witness) -> bool {
    guards.iter().all(|(flag, want)| witness.flags[flag.0] == *want)
}

fn value_of(v: &ValueRef, witness: &Witness) -> F {
    match v {
        ValueRef::Pos(p) => witness.slots[p.slot.0].terms[p.pos.index()],
        ValueRef::Hidden(h) => witness.hidden[h.0],
        ValueRef::Const(f) => *f,
        ValueRef::Unbound => unbound_sentinel(),
    }
}

/// Tri-state predicate evaluation: `Some(bool)` or `None` for a type
/// error, combined under SPARQL effective-boolean-value rules.
fn eval_pred(
    pred: &Pred,
    witness: &Witness,
    oracle: &dyn HashOracle,
    range_width: usize,
) -> Option<bool> {
    match pred {
        Pred::Bool(b) => Some(*b),
        Pred::Err => None,
        Pred::Eq(a, b) => Some(value_of(a, witness) == value_of(b, witness)),
        Pred::Cmp { op, a, b } => {
            let a = field_to_signed(value_of(a, witness), range_width)?;
            let b = field_to_signed(value_of(b, witness), range_width)?;
            Some(match op {
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
            })
        }
        Pred::And(x, y) => {
            match (
                eval_pred(x, witness, oracle, range_width),
                eval_pred(y, witness, oracle, range_width),
            ) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }
        }
        Pred::Or(x, y) => {
            match (
                eval_pred(x, witness, oracle, range_width),
                eval_pred(y, witness, oracle, range_width),
            ) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }
        }
        Pred::Not(x) => eval_pred(x, witness, oracle, range_width).map(|b| !b),
        Pred::LiteralDecomp { term, coords } => {
            let record = oracle.h4(
                witness.hidden[coords[0].0],
                witness.hidden[coords[1].0],
                witness.hidden[coords[2].0],
                witness.hidden[coords[3].0],
            );
            let rebuilt = oracle.h2(F::from(crate::encode::TYPE_CODE_LITERAL), record);
            if rebuilt == value_of(term, witness) {
                Some(true)
            } else {
                None
            }
        }
        Pred::TermDecomp { term, type_code, value } => {
            let rebuilt = oracle.h2(witness.hidden[type_code.0], witness.hidden[value.0]);
            if rebuilt == value_of(term, witness) {
                Some(true)
            } else {
                None
            }
        }
        Pred::ClassOf { coord, classes } => {
            if classes.contains(&value_of(coord, witness)) {
                Some(true)
            } else {
                None
            }
        }
    }
}
