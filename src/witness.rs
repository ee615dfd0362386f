//! Prover input builder: backtracking quad selection
//!
//! Given the signed datasets, the constraint program, and a candidate
//! binding, find a quad assignment for every active slot, branch and
//! optional flag values, and the hidden inputs, consistent with every
//! assertion; or establish that none exists.
//!
//! The search is an explicit-stack depth-first walk over the program's
//! decision schedule (branch groups in disclosure order, optionals bound
//! before unbound, slots over datasets then quad indices). The frame
//! stack keeps memory bounded and makes cancellation polling trivial; no
//! recursion, no coroutines.
//!
//! Every complete assignment is validated against the reference
//! assertion evaluator, so the builder cannot accept anything the
//! backend would reject. The first solution (lowest index at the first
//! divergence point) wins; if a later solution discloses different
//! values, the binding is reported as ambiguous.

#![forbid(unsafe_code)]

use ark_ff::Zero;
use oxrdf::{Quad, SubjectRef, Term, TermRef, Variable};
use std::collections::BTreeMap;
use tracing::debug;

use crate::algebra::PatternTerm;
use crate::backend::{check_witness, CheckResult};
use crate::config::ProofConfig;
use crate::encode::{
    encode_quad_terms, encode_string, encode_term, literal_coords, LiteralCoords, TYPE_CODE_BLANK,
    TYPE_CODE_IRI, TYPE_CODE_LITERAL,
};
use crate::error::{Error, Result};
use crate::hash::HashOracle;
use crate::lower::{
    ConstraintProgram, Decision, FlagId, Guard, HiddenDecl, LiteralCoordKind, SlotId, SlotPos,
    TermCoordKind, ValueRef,
};
use crate::{unbound_sentinel, Binding, CancelFlag, SignedDataset, F};

/// Witness data for one slot.
#[derive(Clone, Debug)]
pub struct SlotWitness {
    /// The four encoded positions `(s, p, o, g)`.
    pub terms: [F; 4],
    /// Which dataset provides the quad.
    pub root_index: usize,
    /// Leaf index of the quad inside that dataset.
    pub leaf_index: usize,
    /// Merkle sibling path.
    pub path: Vec<F>,
    /// LSB-first direction bits.
    pub directions: Vec<bool>,
    /// False for slots under an untaken branch (padding witness).
    pub active: bool,
}

/// Complete witness data for one proof attempt.
#[derive(Clone, Debug)]
pub struct Witness {
    /// Per-slot quad witnesses.
    pub slots: Vec<SlotWitness>,
    /// Branch and optional flag values.
    pub flags: Vec<bool>,
    /// Hidden prover inputs, in the layout order declared by the lowering.
    pub hidden: Vec<F>,
    /// Disclosed values per projected variable (sentinel when unbound).
    pub disclosed: BTreeMap<Variable, F>,
}

/// Builder output: the witness plus disclosure-level information.
#[derive(Clone, Debug)]
pub struct BuiltWitness {
    /// The witness.
    pub witness: Witness,
    /// Disclosed terms per projected variable (`None` = unbound).
    pub disclosed_terms: BTreeMap<Variable, Option<Term>>,
    /// True when another assignment with different disclosed values
    /// exists; the returned witness follows the tie-break rule.
    pub ambiguous: bool,
}

/// Build the witness for `program` over `datasets` under `binding`.
pub fn build_witness(
    program: &ConstraintProgram,
    datasets: &[SignedDataset],
    binding: &Binding,
    config: &ProofConfig,
    oracle: &dyn HashOracle,
    cancel: Option<&CancelFlag>,
) -> Result<BuiltWitness> {
    if datasets.len() != program.n_datasets {
        return Err(Error::Backend(format!(
            "program expects {} datasets, got {}",
            program.n_datasets,
            datasets.len()
        )));
    }

    let mut assignment: BTreeMap<Variable, Term> = BTreeMap::new();
    let mut binding_enc: BTreeMap<Variable, F> = BTreeMap::new();
    for (var, term) in binding {
        binding_enc.insert(var.clone(), encode_term(oracle, config, term.as_ref())?);
        assignment.insert(var.clone(), term.clone());
    }

    let roots: Vec<F> = datasets.iter().map(SignedDataset::root).collect();
    let mut search = Search {
        program,
        datasets,
        config,
        oracle,
        cancel,
        roots,
        binding_enc,
        assignment,
        flags: vec![None; program.flags.len()],
        choices: vec![None; program.slots.len()],
    };
    search.run(binding)
}

struct Search<'a> {
    program: &'a ConstraintProgram,
    datasets: &'a [SignedDataset],
    config: &'a ProofConfig,
    oracle: &'a dyn HashOracle,
    cancel: Option<&'a CancelFlag>,
    roots: Vec<F>,
    binding_enc: BTreeMap<Variable, F>,
    assignment: BTreeMap<Variable, Term>,
    flags: Vec<Option<bool>>,
    choices: Vec<Option<(usize, usize)>>,
}

/// Enumerated options of one decision frame.
enum Options {
    /// Pick arm `k` of a live branch group (or all-false when dead).
    Branch { flags: Vec<FlagId>, live: bool },
    /// Pick bound (0) then unbound (1); dead optionals stay unbound.
    Optional { flag: FlagId, live: bool },
    /// Pick `(root_index, leaf_index)` for a live slot; dead slots skip.
    Slot { slot: SlotId, picks: Vec<(usize, usize)>, live: bool },
}

struct Frame {
    options: Options,
    next: usize,
    applied: bool,
    bound: Vec<Variable>,
    /// A full solution was found somewhere below this frame.
    succeeded: bool,
}

impl Frame {
    fn option_count(&self) -> usize {
        match &self.options {
            Options::Branch { flags, live } => {
                if *live {
                    flags.len()
                } else {
                    1
                }
            }
            Options::Optional { live, .. } => {
                if *live {
                    2
                } else {
                    1
                }
            }
            // A live slot offers its candidates (possibly none: a dead
            // end); a dead slot has the single "skip" option.
            Options::Slot { picks, live, .. } => {
                if *live {
                    picks.len()
                } else {
                    1
                }
            }
        }
    }
}

enum Finalized {
    Solution(Box<Solution>),
    Reject,
    TypeError(String),
}

struct Solution {
    witness: Witness,
    disclosed_terms: BTreeMap<Variable, Option<Term>>,
}

impl<'a> Search<'a> {
    fn check_cancel(&self) -> Result<()> {
        match self.cancel {
            Some(flag) if flag.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    fn run(&mut self, binding: &Binding) -> Result<BuiltWitness> {
        let schedule_len = self.program.schedule.len();
        let mut frames: Vec<Frame> = Vec::new();
        let mut descend = true;
        let mut first: Option<Solution> = None;
        let mut ambiguous = false;
        let mut type_error: Option<String> = None;

        loop {
            self.check_cancel()?;

            if descend {
                if frames.len() == schedule_len {
                    match self.finalize(binding)? {
                        Finalized::Solution(sol) => {
                            for f in frames.iter_mut() {
                                f.succeeded = true;
                            }
                            match &first {
                                None => {
                                    debug!(target: "zksparql::witness", "assignment found");
                                    first = Some(*sol);
                                }
                                Some(prev) => {
                                    if prev.witness.disclosed != sol.witness.disclosed {
                                        ambiguous = true;
                                        break;
                                    }
                                }
                            }
                        }
                        Finalized::TypeError(msg) => {
                            type_error.get_or_insert(msg);
                        }
                        Finalized::Reject => {}
                    }
                    descend = false;
                    continue;
                }
                let frame = self.make_frame(frames.len());
                frames.push(frame);
            }

            let Some(frame) = frames.last_mut() else { break };
            if frame.applied {
                // Undo the previous option before trying the next.
                let bound = std::mem::take(&mut frame.bound);
                for var in bound {
                    self.assignment.remove(&var);
                }
                match &frame.options {
                    Options::Branch { flags, .. } => {
                        for f in flags {
                            self.flags[f.0] = None;
                        }
                    }
                    Options::Optional { flag, .. } => self.flags[flag.0] = None,
                    Options::Slot { slot, .. } => self.choices[slot.0] = None,
                }
                frame.applied = false;
            }
            // An optional that matched inside a found solution stays
            // committed to its bound half: left-join semantics forbid
            // leaving a matchable optional unbound, so the unbound
            // alternative is neither a solution nor an ambiguity.
            let committed =
                frame.succeeded && matches!(&frame.options, Options::Optional { live: true, .. });
            if committed || frame.next >= frame.option_count() {
                frames.pop();
                descend = false;
                continue;
            }
            let k = frame.next;
            frame.next += 1;

            match &frame.options {
                Options::Branch { flags, live } => {
                    for (i, f) in flags.iter().enumerate() {
                        self.flags[f.0] = Some(*live && i == k);
                    }
                }
                Options::Optional { flag, live } => {
                    self.flags[flag.0] = Some(*live && k == 0);
                }
                Options::Slot { slot, picks, live } => {
                    if !*live {
                        // Dead slot: leave unchosen (padding witness).
                        self.choices[slot.0] = None;
                    } else {
                        let (root, leaf) = picks[k];
                        self.choices[slot.0] = Some((root, leaf));
                        let quad = &self.datasets[root].quads[leaf];
                        let pattern = &self.program.slots[slot.0].pattern;
                        let binds = self
                            .match_quad(pattern, quad)
                            .expect("enumerated candidate must match");
                        for (var, term) in binds {
                            self.assignment.insert(var.clone(), term);
                            frame.bound.push(var);
                        }
                    }
                }
            }
            frame.applied = true;
            descend = true;
        }

        match first {
            Some(sol) => Ok(BuiltWitness {
                witness: sol.witness,
                disclosed_terms: sol.disclosed_terms,
                ambiguous,
            }),
            None => match type_error {
                Some(msg) => Err(Error::TypeErr(msg)),
                None => {
                    debug!(target: "zksparql::witness", "search exhausted");
                    Err(Error::NoSatisfyingAssignment)
                }
            },
        }
    }

    fn guards_live(&self, guards: &[Guard]) -> bool {
        guards
            .iter()
            .all(|(flag, want)| self.flags[flag.0] == Some(*want))
    }

    fn make_frame(&self, idx: usize) -> Frame {
        let options = match &self.program.schedule[idx] {
            Decision::Branch { flags, guards, .. } => Options::Branch {
                flags: flags.clone(),
                live: self.guards_live(guards),
            },
            Decision::Optional { flag, guards } => Options::Optional {
                flag: *flag,
                live: self.guards_live(guards),
            },
            Decision::Slot { slot } => {
                let decl = &self.program.slots[slot.0];
                let live = self.guards_live(&decl.guards);
                let mut picks = Vec::new();
                if live {
                    for (root, dataset) in self.datasets.iter().enumerate() {
                        for (leaf, quad) in dataset.quads.iter().enumerate() {
                            if self.match_quad(&decl.pattern, quad).is_some() {
                                picks.push((root, leaf));
                            }
                        }
                    }
                }
                Options::Slot { slot: *slot, picks, live }
            }
        };
        Frame { options, next: 0, applied: false, bound: Vec::new(), succeeded: false }
    }

    /// Does `quad` match `pattern` under the current assignment? Returns
    /// the new variable bindings the match would introduce.
    fn match_quad(&self, pattern: &crate::algebra::QuadPattern, quad: &Quad) -> Option<Vec<(Variable, Term)>> {
        let mut binds: Vec<(Variable, Term)> = Vec::new();
        for pos in SlotPos::ALL {
            let pat = pattern.positions()[pos.index()];
            let actual = quad_position(quad, pos);
            match pat {
                PatternTerm::Iri(n) => match actual {
                    Some(TermRef::NamedNode(m)) if m == n.as_ref() => {}
                    _ => return None,
                },
                PatternTerm::Literal(l) => match actual {
                    Some(TermRef::Literal(m)) if m == l.as_ref() => {}
                    _ => return None,
                },
                PatternTerm::DefaultGraph => {
                    if actual.is_some() {
                        return None;
                    }
                }
                PatternTerm::Var(v) => {
                    // A variable graph position ranges over named graphs
                    // only, so the default graph never matches it.
                    let Some(t) = actual else { return None };
                    let t = t.into_owned();
                    if let Some(prev) = self.assignment.get(v) {
                        if *prev != t {
                            return None;
                        }
                    } else if let Some((_, bt)) = binds.iter().find(|(bv, _)| bv == v) {
                        if *bt != t {
                            return None;
                        }
                    } else {
                        binds.push((v.clone(), t));
                    }
                }
            }
        }
        Some(binds)
    }

    // ------------------------------ finalization ------------------------------

    fn finalize(&self, binding: &Binding) -> Result<Finalized> {
        let depth = self.program.merkle_depth;

        let mut slots = Vec::with_capacity(self.program.slots.len());
        let mut slot_terms: Vec<[Option<Term>; 4]> = Vec::with_capacity(self.program.slots.len());
        for choice in &self.choices {
            match choice {
                Some((root, leaf)) => {
                    let dataset = &self.datasets[*root];
                    let quad = &dataset.quads[*leaf];
                    let terms = encode_quad_terms(self.oracle, self.config, quad)?;
                    slots.push(SlotWitness {
                        terms,
                        root_index: *root,
                        leaf_index: *leaf,
                        path: dataset.commitment.path(*leaf),
                        directions: dataset.commitment.directions(*leaf),
                        active: true,
                    });
                    slot_terms.push([
                        Some(subject_term(quad)),
                        Some(Term::NamedNode(quad.predicate.clone())),
                        Some(quad.object.clone()),
                        graph_term(quad),
                    ]);
                }
                None => {
                    slots.push(SlotWitness {
                        terms: [F::zero(); 4],
                        root_index: 0,
                        leaf_index: 0,
                        path: vec![F::zero(); depth],
                        directions: vec![false; depth],
                        active: false,
                    });
                    slot_terms.push([None, None, None, None]);
                }
            }
        }

        let flags: Vec<bool> = self.flags.iter().map(|f| f.unwrap_or(false)).collect();

        // Hidden inputs, in declared order. Terms propagate alongside the
        // field values so coordinate hiddens can be computed honestly.
        let mut hidden: Vec<F> = Vec::with_capacity(self.program.hidden.len());
        let mut hidden_terms: Vec<Option<Term>> = Vec::with_capacity(self.program.hidden.len());
        for (id, decl) in self.program.hidden.iter().enumerate() {
            let (value, term) = match decl {
                HiddenDecl::Join { .. } => {
                    match self.active_join_bind(id, &slots, &hidden, &hidden_terms, &flags, &slot_terms) {
                        Some(resolved) => resolved,
                        None => (F::zero(), None),
                    }
                }
                HiddenDecl::LiteralCoord { source, coord } => {
                    let (_, term) =
                        self.resolve(source, &slots, &hidden, &hidden_terms, &slot_terms);
                    let value = match &term {
                        Some(Term::Literal(l)) => {
                            let c: LiteralCoords =
                                literal_coords(self.oracle, self.config, l.as_ref())?;
                            match coord {
                                LiteralCoordKind::Value => c.value,
                                LiteralCoordKind::Special => c.special,
                                LiteralCoordKind::Lang => c.lang,
                                LiteralCoordKind::Datatype => c.datatype,
                            }
                        }
                        _ => F::zero(),
                    };
                    (value, None)
                }
                HiddenDecl::TermCoord { source, coord } => {
                    let (_, term) =
                        self.resolve(source, &slots, &hidden, &hidden_terms, &slot_terms);
                    let value = match (&term, coord) {
                        (Some(Term::NamedNode(_)), TermCoordKind::TypeCode) => {
                            F::from(TYPE_CODE_IRI)
                        }
                        (Some(Term::BlankNode(_)), TermCoordKind::TypeCode) => {
                            F::from(TYPE_CODE_BLANK)
                        }
                        (Some(Term::Literal(_)), TermCoordKind::TypeCode) => {
                            F::from(TYPE_CODE_LITERAL)
                        }
                        (Some(Term::NamedNode(n)), TermCoordKind::Value) => {
                            encode_string(self.oracle, n.as_str())
                        }
                        (Some(Term::BlankNode(b)), TermCoordKind::Value) => {
                            encode_string(self.oracle, b.as_str())
                        }
                        (Some(Term::Literal(l)), TermCoordKind::Value) => {
                            let c = literal_coords(self.oracle, self.config, l.as_ref())?;
                            self.oracle.h4(c.value, c.special, c.lang, c.datatype)
                        }
                        (None, _) => F::zero(),
                    };
                    (value, None)
                }
            };
            hidden.push(value);
            hidden_terms.push(term);
        }

        // Disclosed values, checked against the candidate binding.
        let mut disclosed = BTreeMap::new();
        let mut disclosed_terms = BTreeMap::new();
        for (var, vref) in &self.program.projected {
            let (value, term) = self.resolve(vref, &slots, &hidden, &hidden_terms, &slot_terms);
            if let Some(expected) = self.binding_enc.get(var) {
                if *expected != value {
                    return Ok(Finalized::Reject);
                }
            }
            let term = if value == unbound_sentinel() {
                None
            } else {
                term.or_else(|| self.assignment.get(var).cloned())
                    .or_else(|| binding.get(var).cloned())
            };
            disclosed.insert(var.clone(), value);
            disclosed_terms.insert(var.clone(), term);
        }

        let witness = Witness { slots, flags, hidden, disclosed };

        match check_witness(self.program, &witness, &self.roots, self.oracle, None) {
            CheckResult::Pass => Ok(Finalized::Solution(Box::new(Solution {
                witness,
                disclosed_terms,
            }))),
            CheckResult::Fail(_) => Ok(Finalized::Reject),
            CheckResult::TypeError(msg) => Ok(Finalized::TypeError(msg)),
        }
    }

    /// Resolve the active `HiddenBind` for a join hidden, if any.
    fn active_join_bind(
        &self,
        id: usize,
        slots: &[SlotWitness],
        hidden: &[F],
        hidden_terms: &[Option<Term>],
        flags: &[bool],
        slot_terms: &[[Option<Term>; 4]],
    ) -> Option<(F, Option<Term>)> {
        for guarded in &self.program.assertions {
            let crate::lower::Assertion::HiddenBind { hidden: h, value } = &guarded.assertion
            else {
                continue;
            };
            if h.0 != id {
                continue;
            }
            let live = guarded
                .guards
                .iter()
                .all(|(flag, want)| flags[flag.0] == *want);
            if !live {
                continue;
            }
            return Some(self.resolve(value, slots, hidden, hidden_terms, slot_terms));
        }
        None
    }

    fn resolve(
        &self,
        vref: &ValueRef,
        slots: &[SlotWitness],
        hidden: &[F],
        hidden_terms: &[Option<Term>],
        slot_terms: &[[Option<Term>; 4]],
    ) -> (F, Option<Term>) {
        match vref {
            ValueRef::Pos(p) => (
                slots[p.slot.0].terms[p.pos.index()],
                slot_terms[p.slot.0][p.pos.index()].clone(),
            ),
            ValueRef::Hidden(h) => (hidden[h.0], hidden_terms[h.0].clone()),
            ValueRef::Const(f) => (*f, self.program.constants.get(f).cloned()),
            ValueRef::Unbound => (unbound_sentinel(), None),
        }
    }
}

fn quad_position(quad: &Quad, pos: SlotPos) -> Option<TermRef<'_>> {
    match pos {
        SlotPos::Subject => Some(match quad.subject.as_ref() {
            SubjectRef::NamedNode(n) => TermRef::NamedNode(n),
            SubjectRef::BlankNode(b) => TermRef::BlankNode(b),
        }),
        SlotPos::Predicate => Some(TermRef::NamedNode(quad.predicate.as_ref())),
        SlotPos::Object => Some(quad.object.as_ref()),
        SlotPos::Graph => match quad.graph_name.as_ref() {
            oxrdf::GraphNameRef::NamedNode(n) => Some(TermRef::NamedNode(n)),
            oxrdf::GraphNameRef::BlankNode(b) => Some(TermRef::BlankNode(b)),
            oxrdf::GraphNameRef::DefaultGraph => None,
        },
    }
}

fn subject_term(quad: &Quad) -> Term {
    match &quad.subject {
        oxrdf::Subject::NamedNode(n) => Term::NamedNode(n.clone()),
        oxrdf::Subject::BlankNode(b) => Term::BlankNode(b.clone()),
    }
}

fn graph_term(quad: &Quad) -> Option<Term> {
    match &quad.graph_name {
        oxrdf::GraphName::NamedNode(n) => Some(Term::NamedNode(n.clone())),
        oxrdf::GraphName::BlankNode(b) => Some(Term::BlankNode(b.clone())),
        oxrdf::GraphName::DefaultGraph => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::Commitment;
    use crate::hash::Blake3Oracle;
    use crate::lower::lower;
    use crate::normalize::normalize_text;
    use crate::signer::{PublicKey, Signature};
    use oxrdf::vocab::xsd;
    use oxrdf::{GraphName, Literal, NamedNode};

    fn cfg() -> ProofConfig {
        ProofConfig { merkle_depth: 4, ..ProofConfig::default() }
    }

    fn iri(s: &str) -> NamedNode {
        NamedNode::new(s).unwrap()
    }

    fn dataset(quads: Vec<Quad>) -> SignedDataset {
        let commitment = Commitment::over_quads(&Blake3Oracle, &cfg(), &quads).unwrap();
        SignedDataset {
            quads,
            commitment,
            signature: Signature(Vec::new()),
            public_key: PublicKey(Vec::new()),
        }
    }

    fn build(
        query: &str,
        datasets: &[SignedDataset],
        binding: &Binding,
    ) -> Result<BuiltWitness> {
        let q = normalize_text(query, &cfg()).unwrap();
        let program = lower(&q, datasets.len(), &cfg(), &Blake3Oracle, None).unwrap();
        build_witness(&program, datasets, binding, &cfg(), &Blake3Oracle, None)
    }

    #[test]
    fn single_bgp_selects_the_matching_quad() {
        let ds = dataset(vec![
            Quad::new(
                iri("http://example.org/other"),
                iri("http://example.org/q"),
                iri("http://example.org/x"),
                GraphName::DefaultGraph,
            ),
            Quad::new(
                iri("http://example.org/a"),
                iri("http://example.org/p"),
                Literal::new_typed_literal("42", xsd::INTEGER),
                GraphName::DefaultGraph,
            ),
        ]);
        let built = build(
            "SELECT ?s WHERE { ?s <http://example.org/p> 42 }",
            &[ds],
            &Binding::new(),
        )
        .unwrap();
        assert!(!built.ambiguous);
        assert_eq!(built.witness.slots[0].leaf_index, 1);
        let s = Variable::new("s").unwrap();
        assert_eq!(
            built.disclosed_terms[&s],
            Some(Term::NamedNode(iri("http://example.org/a")))
        );
    }

    #[test]
    fn type_confusion_yields_no_assignment() {
        // Data holds a plain "42"; the query wants the integer 42.
        let ds = dataset(vec![Quad::new(
            iri("http://example.org/a"),
            iri("http://example.org/p"),
            Literal::new_simple_literal("42"),
            GraphName::DefaultGraph,
        )]);
        let err = build(
            "SELECT ?s WHERE { ?s <http://example.org/p> 42 }",
            &[ds],
            &Binding::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoSatisfyingAssignment));
    }

    #[test]
    fn shared_variables_prune_candidates() {
        let ds = dataset(vec![
            Quad::new(
                iri("http://example.org/a"),
                iri("http://example.org/p"),
                iri("http://example.org/b"),
                GraphName::DefaultGraph,
            ),
            Quad::new(
                iri("http://example.org/b"),
                iri("http://example.org/q"),
                iri("http://example.org/c"),
                GraphName::DefaultGraph,
            ),
            Quad::new(
                iri("http://example.org/z"),
                iri("http://example.org/q"),
                iri("http://example.org/c"),
                GraphName::DefaultGraph,
            ),
        ]);
        let built = build(
            "SELECT ?m WHERE { <http://example.org/a> <http://example.org/p> ?m . \
             ?m <http://example.org/q> ?o }",
            &[ds],
            &Binding::new(),
        )
        .unwrap();
        assert_eq!(built.witness.slots[1].leaf_index, 1);
    }

    #[test]
    fn optional_without_match_discloses_the_sentinel() {
        let ds = dataset(vec![Quad::new(
            iri("http://example.org/a"),
            iri("http://example.org/name"),
            Literal::new_simple_literal("Alice"),
            GraphName::DefaultGraph,
        )]);
        let built = build(
            "SELECT ?n ?e WHERE { ?x <http://example.org/name> ?n . \
             OPTIONAL { ?x <http://example.org/email> ?e } }",
            &[ds],
            &Binding::new(),
        )
        .unwrap();
        assert_eq!(built.witness.flags, vec![false]);
        let e = Variable::new("e").unwrap();
        let n = Variable::new("n").unwrap();
        assert_eq!(built.witness.disclosed[&e], unbound_sentinel());
        assert_eq!(built.disclosed_terms[&e], None);
        assert_eq!(
            built.disclosed_terms[&n],
            Some(Term::Literal(Literal::new_simple_literal("Alice")))
        );
        // The unmatched optional slot is padding.
        assert!(!built.witness.slots[1].active);
    }

    #[test]
    fn optional_with_match_binds_it() {
        let ds = dataset(vec![
            Quad::new(
                iri("http://example.org/a"),
                iri("http://example.org/name"),
                Literal::new_simple_literal("Alice"),
                GraphName::DefaultGraph,
            ),
            Quad::new(
                iri("http://example.org/a"),
                iri("http://example.org/email"),
                Literal::new_simple_literal("alice@example.org"),
                GraphName::DefaultGraph,
            ),
        ]);
        let built = build(
            "SELECT ?n ?e WHERE { ?x <http://example.org/name> ?n . \
             OPTIONAL { ?x <http://example.org/email> ?e } }",
            &[ds],
            &Binding::new(),
        )
        .unwrap();
        assert_eq!(built.witness.flags, vec![true]);
        let e = Variable::new("e").unwrap();
        assert_eq!(
            built.disclosed_terms[&e],
            Some(Term::Literal(Literal::new_simple_literal("alice@example.org")))
        );
    }

    #[test]
    fn union_commits_to_the_matching_branch() {
        let left = dataset(vec![Quad::new(
            iri("http://example.org/a"),
            iri("http://example.org/p1"),
            iri("http://example.org/v"),
            GraphName::DefaultGraph,
        )]);
        let right = dataset(vec![Quad::new(
            iri("http://example.org/a"),
            iri("http://example.org/p2"),
            iri("http://example.org/v"),
            GraphName::DefaultGraph,
        )]);
        // Only the second arm matches in the second dataset.
        let built = build(
            "SELECT ?x WHERE { { ?x <http://example.org/p2> <http://example.org/v> } UNION \
             { ?x <http://example.org/p1> <http://example.org/v> } }",
            &[right, left],
            &Binding::new(),
        )
        .unwrap();
        assert_eq!(built.witness.flags, vec![true, false]);
        assert!(built.witness.slots[0].active);
        assert!(!built.witness.slots[1].active);
    }

    #[test]
    fn numeric_filter_prunes_and_hides_the_value() {
        let ds = dataset(vec![
            Quad::new(
                iri("http://example.org/minor"),
                iri("http://example.org/age"),
                Literal::new_typed_literal("15", xsd::INTEGER),
                GraphName::DefaultGraph,
            ),
            Quad::new(
                iri("http://example.org/u"),
                iri("http://example.org/age"),
                Literal::new_typed_literal("30", xsd::INTEGER),
                GraphName::DefaultGraph,
            ),
        ]);
        let built = build(
            "SELECT ?u WHERE { ?u <http://example.org/age> ?a . FILTER(?a >= 18) }",
            &[ds],
            &Binding::new(),
        )
        .unwrap();
        let u = Variable::new("u").unwrap();
        assert_eq!(
            built.disclosed_terms[&u],
            Some(Term::NamedNode(iri("http://example.org/u")))
        );
        // ?a is not projected: nothing about it is disclosed.
        assert!(!built.witness.disclosed.contains_key(&Variable::new("a").unwrap()));
        // Its value rides in the hidden inputs (special coordinate = 30).
        assert!(built
            .witness
            .hidden
            .contains(&crate::encode::signed_to_field(30)));
    }

    #[test]
    fn filter_type_error_surfaces_when_nothing_matches() {
        let ds = dataset(vec![Quad::new(
            iri("http://example.org/u"),
            iri("http://example.org/age"),
            Literal::new_simple_literal("thirty"),
            GraphName::DefaultGraph,
        )]);
        let err = build(
            "SELECT ?u WHERE { ?u <http://example.org/age> ?a . FILTER(?a >= 18) }",
            &[ds],
            &Binding::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::TypeErr(_)));
    }

    #[test]
    fn boolean_value_equality_crosses_lexical_forms() {
        // "1"^^xsd:boolean carries the value true.
        let ds = dataset(vec![Quad::new(
            iri("http://example.org/f"),
            iri("http://example.org/active"),
            Literal::new_typed_literal("1", xsd::BOOLEAN),
            GraphName::DefaultGraph,
        )]);
        let built = build(
            "SELECT ?f WHERE { ?f <http://example.org/active> ?v . FILTER(?v = true) }",
            &[ds.clone()],
            &Binding::new(),
        )
        .unwrap();
        let f = Variable::new("f").unwrap();
        assert_eq!(
            built.disclosed_terms[&f],
            Some(Term::NamedNode(iri("http://example.org/f")))
        );

        let err = build(
            "SELECT ?f WHERE { ?f <http://example.org/active> ?v . FILTER(?v = false) }",
            &[ds],
            &Binding::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoSatisfyingAssignment));
    }

    #[test]
    fn string_equality_is_false_for_known_types_and_errors_for_unknown() {
        let custom = iri("http://example.org/customType");
        let with_object = |lit: Literal| {
            dataset(vec![Quad::new(
                iri("http://example.org/a"),
                iri("http://example.org/p"),
                lit,
                GraphName::DefaultGraph,
            )])
        };
        let query = "SELECT ?s WHERE { ?s <http://example.org/p> ?v . FILTER(?v = \"x\") }";

        // Identical term: proves.
        let built = build(
            query,
            &[with_object(Literal::new_simple_literal("x"))],
            &Binding::new(),
        )
        .unwrap();
        let s = Variable::new("s").unwrap();
        assert_eq!(
            built.disclosed_terms[&s],
            Some(Term::NamedNode(iri("http://example.org/a")))
        );

        // A different recognized string: plain mismatch, no type error.
        let err = build(
            query,
            &[with_object(Literal::new_simple_literal("y"))],
            &Binding::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoSatisfyingAssignment));

        // An unrecognized datatype with a different lexical: type error.
        let err = build(
            query,
            &[with_object(Literal::new_typed_literal("y", custom.clone()))],
            &Binding::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::TypeErr(_)));

        // Same lexical under the unrecognized datatype is still a
        // different term, and still a type error rather than false.
        let err = build(
            query,
            &[with_object(Literal::new_typed_literal("x", custom))],
            &Binding::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::TypeErr(_)));
    }

    #[test]
    fn unknown_datatype_equality_accepts_only_the_identical_term() {
        let custom = iri("http://example.org/customType");
        let quad = |lexical: &str| {
            Quad::new(
                iri("http://example.org/a"),
                iri("http://example.org/p"),
                Literal::new_typed_literal(lexical, custom.clone()),
                GraphName::DefaultGraph,
            )
        };
        let query = "SELECT ?s WHERE { ?s <http://example.org/p> ?v . \
                     FILTER(?v = \"x\"^^<http://example.org/customType>) }";

        let built = build(query, &[dataset(vec![quad("x")])], &Binding::new()).unwrap();
        let s = Variable::new("s").unwrap();
        assert_eq!(
            built.disclosed_terms[&s],
            Some(Term::NamedNode(iri("http://example.org/a")))
        );

        let err = build(query, &[dataset(vec![quad("z")])], &Binding::new()).unwrap_err();
        assert!(matches!(err, Error::TypeErr(_)));
    }

    #[test]
    fn lang_matches_selects_by_language_tag() {
        let ds = dataset(vec![
            Quad::new(
                iri("http://example.org/a"),
                iri("http://example.org/label"),
                Literal::new_language_tagged_literal("hello", "en").unwrap(),
                GraphName::DefaultGraph,
            ),
            Quad::new(
                iri("http://example.org/b"),
                iri("http://example.org/label"),
                Literal::new_language_tagged_literal("bonjour", "fr").unwrap(),
                GraphName::DefaultGraph,
            ),
        ]);
        let built = build(
            "SELECT ?x WHERE { ?x <http://example.org/label> ?l . \
             FILTER(langMatches(lang(?l), \"fr\")) }",
            &[ds],
            &Binding::new(),
        )
        .unwrap();
        let x = Variable::new("x").unwrap();
        assert_eq!(
            built.disclosed_terms[&x],
            Some(Term::NamedNode(iri("http://example.org/b")))
        );
    }

    #[test]
    fn candidate_binding_restricts_solutions() {
        let ds = dataset(vec![
            Quad::new(
                iri("http://example.org/a"),
                iri("http://example.org/p"),
                iri("http://example.org/v"),
                GraphName::DefaultGraph,
            ),
            Quad::new(
                iri("http://example.org/b"),
                iri("http://example.org/p"),
                iri("http://example.org/v"),
                GraphName::DefaultGraph,
            ),
        ]);
        let mut binding = Binding::new();
        binding.insert(
            Variable::new("x").unwrap(),
            Term::NamedNode(iri("http://example.org/b")),
        );
        let built = build(
            "SELECT ?x WHERE { ?x <http://example.org/p> <http://example.org/v> }",
            &[ds],
            &binding,
        )
        .unwrap();
        assert!(!built.ambiguous);
        assert_eq!(built.witness.slots[0].leaf_index, 1);
    }

    #[test]
    fn unconstrained_multi_solution_query_reports_ambiguity() {
        let ds = dataset(vec![
            Quad::new(
                iri("http://example.org/a"),
                iri("http://example.org/p"),
                iri("http://example.org/v"),
                GraphName::DefaultGraph,
            ),
            Quad::new(
                iri("http://example.org/b"),
                iri("http://example.org/p"),
                iri("http://example.org/v"),
                GraphName::DefaultGraph,
            ),
        ]);
        let built = build(
            "SELECT ?x WHERE { ?x <http://example.org/p> <http://example.org/v> }",
            &[ds],
            &Binding::new(),
        )
        .unwrap();
        assert!(built.ambiguous);
        // Tie-break: the lowest quad index wins.
        assert_eq!(built.witness.slots[0].leaf_index, 0);
    }

    #[test]
    fn variable_graph_position_skips_the_default_graph() {
        let g = iri("http://example.org/g");
        let ds = dataset(vec![
            Quad::new(
                iri("http://example.org/a"),
                iri("http://example.org/p"),
                iri("http://example.org/v"),
                GraphName::DefaultGraph,
            ),
            Quad::new(
                iri("http://example.org/a"),
                iri("http://example.org/p"),
                iri("http://example.org/v"),
                g.clone(),
            ),
        ]);
        let built = build(
            "SELECT ?g WHERE { GRAPH ?g { ?s <http://example.org/p> ?o } }",
            &[ds],
            &Binding::new(),
        )
        .unwrap();
        let gv = Variable::new("g").unwrap();
        assert_eq!(built.disclosed_terms[&gv], Some(Term::NamedNode(g)));
        assert_eq!(built.witness.slots[0].leaf_index, 1);
    }

    #[test]
    fn property_path_discloses_its_length_via_the_branch() {
        let knows = iri("http://example.org/knows");
        let quads: Vec<Quad> = [("a", "b"), ("b", "c"), ("c", "d")]
            .into_iter()
            .map(|(s, o)| {
                Quad::new(
                    iri(&format!("http://example.org/{s}")),
                    knows.clone(),
                    iri(&format!("http://example.org/{o}")),
                    GraphName::DefaultGraph,
                )
            })
            .collect();
        let ds = dataset(quads);

        let mut binding = Binding::new();
        binding.insert(
            Variable::new("y").unwrap(),
            Term::NamedNode(iri("http://example.org/d")),
        );
        let built = build(
            "SELECT ?y WHERE { <http://example.org/a> <http://example.org/knows>+ ?y }",
            &[ds.clone()],
            &binding,
        )
        .unwrap();
        // Branch 2 (three hops) is the taken arm.
        assert_eq!(built.witness.flags, vec![false, false, true, false]);

        let mut binding = Binding::new();
        binding.insert(
            Variable::new("y").unwrap(),
            Term::NamedNode(iri("http://example.org/b")),
        );
        let built = build(
            "SELECT ?y WHERE { <http://example.org/a> <http://example.org/knows>+ ?y }",
            &[ds.clone()],
            &binding,
        )
        .unwrap();
        assert_eq!(built.witness.flags, vec![true, false, false, false]);

        let mut binding = Binding::new();
        binding.insert(
            Variable::new("y").unwrap(),
            Term::NamedNode(iri("http://example.org/nowhere")),
        );
        let err = build(
            "SELECT ?y WHERE { <http://example.org/a> <http://example.org/knows>+ ?y }",
            &[ds],
            &binding,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoSatisfyingAssignment));
    }

    #[test]
    fn cancellation_aborts_the_search() {
        let ds = dataset(vec![Quad::new(
            iri("http://example.org/a"),
            iri("http://example.org/p"),
            iri("http://example.org/v"),
            GraphName::DefaultGraph,
        )]);
        let q = normalize_text(
            "SELECT ?x WHERE { ?x <http://example.org/p> <http://example.org/v> }",
            &cfg(),
        )
        .unwrap();
        let program = lower(&q, 1, &cfg(), &Blake3Oracle, None).unwrap();
        let flag = CancelFlag::new();
        flag.cancel();
        let err = build_witness(&program, &[ds], &Binding::new(), &cfg(), &Blake3Oracle, Some(&flag))
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
