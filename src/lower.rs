//! Algebra lowering: normalized algebra → constraint program
//!
//! The constraint program is symbolic: it declares BGP slots, branch and
//! optional flags, hidden prover inputs, and a list of guarded
//! assertions, but carries no witness values. The witness builder fills
//! slots and hidden inputs; the backend checks the assertions.
//!
//! Guard semantics: an assertion with guards `[(f, want), …]` is enforced
//! only in assignments where every flag `f` has value `want`. Union arms
//! guard their assertions on their branch indicator; optional bodies on
//! the `is_bound` flag; the unbound half of an optional on its negation.
//!
//! Variables are resolved to representatives in first-occurrence order:
//! the first position carrying a variable becomes its representative and
//! every later occurrence emits exactly one `Unify` edge against it (the
//! representative map is the depth-1 union-find this walk needs).
//! Variables bound inside union arms or optional bodies are merged
//! through a guard-independent hidden join field, so every projected
//! variable ends with exactly one `VarBind`.
//!
//! Emission order is deterministic: it depends only on the normalized
//! tree (ordered maps everywhere iteration order is observable).

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use ark_serialize::CanonicalSerialize;
use oxrdf::Variable;
use std::collections::BTreeMap;

use crate::algebra::{Algebra, NormalizedQuery, PatternTerm, QuadPattern};
use crate::config::ProofConfig;
use crate::encode::{encode_literal, encode_string, TYPE_CODE_DEFAULT_GRAPH, TYPE_CODE_IRI};
use crate::error::{Error, Result};
use crate::hash::HashOracle;
use crate::{CancelFlag, F};

// ============================================================================
// Program data model
// ============================================================================

/// Index of a BGP slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub usize);

/// Index of a branch/optional flag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlagId(pub usize);

/// Index into the hidden prover-input layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HiddenId(pub usize);

/// One of the four positions of a slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotPos {
    Subject,
    Predicate,
    Object,
    Graph,
}

impl SlotPos {
    /// Position index in `(s, p, o, g)` order.
    pub fn index(self) -> usize {
        match self {
            SlotPos::Subject => 0,
            SlotPos::Predicate => 1,
            SlotPos::Object => 2,
            SlotPos::Graph => 3,
        }
    }

    /// All positions, in order.
    pub const ALL: [SlotPos; 4] = [SlotPos::Subject, SlotPos::Predicate, SlotPos::Object, SlotPos::Graph];
}

/// A slot position reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PosRef {
    pub slot: SlotId,
    pub pos: SlotPos,
}

/// A symbolic field value the assertions can reference.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueRef {
    /// A slot position (filled by the witness).
    Pos(PosRef),
    /// A hidden prover input.
    Hidden(HiddenId),
    /// A field literal fixed by the query.
    Const(F),
    /// The reserved unbound sentinel.
    Unbound,
}

/// Guard literal: the flag must carry this value for the assertion to apply.
pub type Guard = (FlagId, bool);

/// Declared slot: the pattern it must match and the guards under which it
/// is active.
#[derive(Clone, Debug)]
pub struct SlotDecl {
    pub pattern: QuadPattern,
    pub guards: Vec<Guard>,
}

/// Flag kinds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlagDecl {
    /// Member of the one-hot group with this index.
    Branch { group: usize },
    /// `is_bound` indicator of an optional.
    OptionalBound,
}

/// Hidden prover-input kinds, in witness layout order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HiddenDecl {
    /// A guard-independent join field (extend values, union/optional
    /// variable merging); pinned by guarded `HiddenBind` assertions.
    Join { var: Variable },
    /// A literal coordinate of the term at `source`.
    LiteralCoord { source: ValueRef, coord: LiteralCoordKind },
    /// A term-record coordinate of the term at `source`.
    TermCoord { source: ValueRef, coord: TermCoordKind },
}

/// The four literal-record coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LiteralCoordKind {
    Value,
    Special,
    Lang,
    Datatype,
}

/// The two term-record coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TermCoordKind {
    TypeCode,
    Value,
}

/// Ordered comparison operators over the signed window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

/// Filter predicate tree. Evaluation is tri-state (true / false / error)
/// following SPARQL effective-boolean-value rules; `Err` is the statically
/// erroneous leaf a short-circuiting context may absorb.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pred {
    Bool(bool),
    /// Unconditional evaluation error (absorbed by `Or`/`And` per EBV).
    Err,
    /// Field equality.
    Eq(ValueRef, ValueRef),
    /// Signed comparison over `special` values inside the range window;
    /// operands outside the window are an evaluation error.
    Cmp { op: CmpOp, a: ValueRef, b: ValueRef },
    And(Box<Pred>, Box<Pred>),
    Or(Box<Pred>, Box<Pred>),
    Not(Box<Pred>),
    /// `h2(2, h4(coords)) == term`; holds or errors.
    LiteralDecomp { term: ValueRef, coords: [HiddenId; 4] },
    /// `h2(type_code, value) == term`; holds or errors.
    TermDecomp { term: ValueRef, type_code: HiddenId, value: HiddenId },
    /// The coordinate must be one of the listed encodings (datatype-class
    /// compatibility); non-membership is an evaluation error.
    ClassOf { coord: ValueRef, classes: Vec<F> },
}

/// Assertion kinds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Assertion {
    /// Signature over `roots[root_index]` verifies under its public key.
    SigOk { root_index: usize },
    /// The slot's terms hash to a leaf included under its chosen root.
    Inclusion { slot: SlotId },
    /// A slot position equals a field literal from the query.
    TermEq { pos: PosRef, value: F },
    /// Two positions carrying the same variable are equal.
    Unify { a: PosRef, b: PosRef },
    /// A projected variable equals this value.
    VarBind { var: Variable, value: ValueRef },
    /// A hidden join field equals this value (under the guards).
    HiddenBind { hidden: HiddenId, value: ValueRef },
    /// A filter predicate evaluates to true.
    Predicate(Pred),
    /// Exactly one of the flags is set.
    OneHot { flags: Vec<FlagId> },
}

/// An assertion with its guard literals.
#[derive(Clone, Debug)]
pub struct Guarded {
    pub guards: Vec<Guard>,
    pub assertion: Assertion,
}

/// Decision points for the witness search, in lowering order. Each
/// carries the guards under which it is live; a decision under an
/// untaken branch collapses to its inactive default.
#[derive(Clone, Debug)]
pub enum Decision {
    /// Choose which branch of the one-hot group is taken.
    Branch { group: usize, flags: Vec<FlagId>, guards: Vec<Guard> },
    /// Choose whether the optional matched.
    Optional { flag: FlagId, guards: Vec<Guard> },
    /// Choose the quad (and dataset) filling the slot.
    Slot { slot: SlotId },
}

/// The lowered constraint program.
#[derive(Clone, Debug)]
pub struct ConstraintProgram {
    /// Number of signed datasets the proof ranges over (one `SigOk` each).
    pub n_datasets: usize,
    pub merkle_depth: usize,
    pub range_width: usize,
    pub slots: Vec<SlotDecl>,
    pub flags: Vec<FlagDecl>,
    /// One-hot groups, indexing into `flags`.
    pub groups: Vec<Vec<FlagId>>,
    pub hidden: Vec<HiddenDecl>,
    pub assertions: Vec<Guarded>,
    pub schedule: Vec<Decision>,
    /// Projected variables in projection order, each bound exactly once.
    pub projected: Vec<(Variable, ValueRef)>,
    /// Terms behind `ValueRef::Const` values that can surface as
    /// disclosed bindings (bind expressions); keyed by encoding.
    pub constants: BTreeMap<F, oxrdf::Term>,
}

impl ConstraintProgram {
    /// Canonical BLAKE3 digest of the program structure. Used as the mock
    /// backend's verification-key descriptor and for audit logging.
    pub fn digest(&self) -> [u8; 32] {
        let mut h = blake3::Hasher::new();
        h.update(b"zksparql.program.v1");
        h.update(&(self.n_datasets as u64).to_be_bytes());
        h.update(&(self.merkle_depth as u64).to_be_bytes());
        h.update(&(self.range_width as u64).to_be_bytes());
        h.update(&(self.slots.len() as u64).to_be_bytes());
        h.update(&(self.flags.len() as u64).to_be_bytes());
        h.update(&(self.hidden.len() as u64).to_be_bytes());
        for g in &self.groups {
            h.update(&(g.len() as u64).to_be_bytes());
            for f in g {
                h.update(&(f.0 as u64).to_be_bytes());
            }
        }
        for a in &self.assertions {
            digest_guarded(&mut h, a);
        }
        for (var, value) in &self.projected {
            h.update(b"proj:");
            h.update(var.as_str().as_bytes());
            digest_value(&mut h, value);
        }
        *h.finalize().as_bytes()
    }
}

fn digest_guarded(h: &mut blake3::Hasher, a: &Guarded) {
    h.update(b"assert:");
    h.update(&(a.guards.len() as u64).to_be_bytes());
    for (f, want) in &a.guards {
        h.update(&(f.0 as u64).to_be_bytes());
        h.update(&[*want as u8]);
    }
    digest_assertion(h, &a.assertion);
}

fn digest_assertion(h: &mut blake3::Hasher, a: &Assertion) {
    match a {
        Assertion::SigOk { root_index } => {
            h.update(b"sig:");
            h.update(&(*root_index as u64).to_be_bytes());
        }
        Assertion::Inclusion { slot } => {
            h.update(b"incl:");
            h.update(&(slot.0 as u64).to_be_bytes());
        }
        Assertion::TermEq { pos, value } => {
            h.update(b"termeq:");
            digest_pos(h, pos);
            digest_field(h, value);
        }
        Assertion::Unify { a, b } => {
            h.update(b"unify:");
            digest_pos(h, a);
            digest_pos(h, b);
        }
        Assertion::VarBind { var, value } => {
            h.update(b"varbind:");
            h.update(var.as_str().as_bytes());
            digest_value(h, value);
        }
        Assertion::HiddenBind { hidden, value } => {
            h.update(b"hiddenbind:");
            h.update(&(hidden.0 as u64).to_be_bytes());
            digest_value(h, value);
        }
        Assertion::Predicate(p) => {
            h.update(b"pred:");
            digest_pred(h, p);
        }
        Assertion::OneHot { flags } => {
            h.update(b"onehot:");
            h.update(&(flags.len() as u64).to_be_bytes());
            for f in flags {
                h.update(&(f.0 as u64).to_be_bytes());
            }
        }
    }
}

fn digest_pred(h: &mut blake3::Hasher, p: &Pred) {
    match p {
        Pred::Bool(b) => {
            h.update(b"b:");
            h.update(&[*b as u8]);
        }
        Pred::Err => {
            h.update(b"err:");
        }
        Pred::Eq(a, b) => {
            h.update(b"eq:");
            digest_value(h, a);
            digest_value(h, b);
        }
        Pred::Cmp { op, a, b } => {
            h.update(b"cmp:");
            h.update(&[*op as u8]);
            digest_value(h, a);
            digest_value(h, b);
        }
        Pred::And(a, b) => {
            h.update(b"and:");
            digest_pred(h, a);
            digest_pred(h, b);
        }
        Pred::Or(a, b) => {
            h.update(b"or:");
            digest_pred(h, a);
            digest_pred(h, b);
        }
        Pred::Not(a) => {
            h.update(b"not:");
            digest_pred(h, a);
        }
        Pred::LiteralDecomp { term, coords } => {
            h.update(b"litdec:");
            digest_value(h, term);
            for c in coords {
                h.update(&(c.0 as u64).to_be_bytes());
            }
        }
        Pred::TermDecomp { term, type_code, value } => {
            h.update(b"termdec:");
            digest_value(h, term);
            h.update(&(type_code.0 as u64).to_be_bytes());
            h.update(&(value.0 as u64).to_be_bytes());
        }
        Pred::ClassOf { coord, classes } => {
            h.update(b"class:");
            digest_value(h, coord);
            h.update(&(classes.len() as u64).to_be_bytes());
            for c in classes {
                digest_field(h, c);
            }
        }
    }
}

fn digest_pos(h: &mut blake3::Hasher, p: &PosRef) {
    h.update(&(p.slot.0 as u64).to_be_bytes());
    h.update(&(p.pos.index() as u64).to_be_bytes());
}

fn digest_value(h: &mut blake3::Hasher, v: &ValueRef) {
    match v {
        ValueRef::Pos(p) => {
            h.update(b"p");
            digest_pos(h, p);
        }
        ValueRef::Hidden(id) => {
            h.update(b"h");
            h.update(&(id.0 as u64).to_be_bytes());
        }
        ValueRef::Const(f) => {
            h.update(b"c");
            digest_field(h, f);
        }
        ValueRef::Unbound => {
            h.update(b"u");
        }
    }
}

fn digest_field(h: &mut blake3::Hasher, f: &F) {
    let mut bytes = Vec::with_capacity(32);
    f.serialize_compressed(&mut bytes).expect("serialize field element");
    h.update(&bytes);
}

// ============================================================================
// Lowering
// ============================================================================

/// Variable state inside the lowering walk.
#[derive(Clone, Debug)]
pub(crate) struct VarState {
    pub repr: ValueRef,
    /// True when the variable may be unbound (sentinel) at runtime.
    pub nullable: bool,
}

/// The lowering walk state. Filter lowering (`filter.rs`) extends this
/// type with the expression-side methods.
pub(crate) struct Lowering<'a> {
    pub oracle: &'a dyn HashOracle,
    pub config: &'a ProofConfig,
    cancel: Option<&'a CancelFlag>,
    pub vars: BTreeMap<Variable, VarState>,
    guard_stack: Vec<Guard>,
    slots: Vec<SlotDecl>,
    flags: Vec<FlagDecl>,
    groups: Vec<Vec<FlagId>>,
    hidden: Vec<HiddenDecl>,
    assertions: Vec<Guarded>,
    schedule: Vec<Decision>,
    /// Dedupe cache for coordinate hiddens: (source, kind tag) → first ids.
    coord_cache: BTreeMap<(ValueRef, u8), Vec<HiddenId>>,
    pub(crate) constants: BTreeMap<F, oxrdf::Term>,
}

impl<'a> Lowering<'a> {
    fn new(
        oracle: &'a dyn HashOracle,
        config: &'a ProofConfig,
        cancel: Option<&'a CancelFlag>,
    ) -> Self {
        Self {
            oracle,
            config,
            cancel,
            vars: BTreeMap::new(),
            guard_stack: Vec::new(),
            slots: Vec::new(),
            flags: Vec::new(),
            groups: Vec::new(),
            hidden: Vec::new(),
            assertions: Vec::new(),
            schedule: Vec::new(),
            coord_cache: BTreeMap::new(),
            constants: BTreeMap::new(),
        }
    }

    fn check_cancel(&self) -> Result<()> {
        match self.cancel {
            Some(flag) if flag.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    pub(crate) fn emit(&mut self, assertion: Assertion) {
        self.assertions.push(Guarded { guards: self.guard_stack.clone(), assertion });
    }

    fn emit_with_guards(&mut self, guards: Vec<Guard>, assertion: Assertion) {
        self.assertions.push(Guarded { guards, assertion });
    }

    pub(crate) fn alloc_hidden(&mut self, decl: HiddenDecl) -> HiddenId {
        let id = HiddenId(self.hidden.len());
        self.hidden.push(decl);
        id
    }

    /// Coordinate hiddens are deduplicated per (source, kind) so repeated
    /// filters over one variable share a single decomposition.
    pub(crate) fn coord_hiddens(
        &mut self,
        source: &ValueRef,
        kind: u8,
        build: impl FnOnce(&mut Self) -> Vec<HiddenId>,
    ) -> Vec<HiddenId> {
        if let Some(ids) = self.coord_cache.get(&(source.clone(), kind)) {
            return ids.clone();
        }
        let ids = build(self);
        self.coord_cache.insert((source.clone(), kind), ids.clone());
        ids
    }

    /// Encode a concrete pattern term.
    pub(crate) fn encode_pattern_term(&self, t: &PatternTerm) -> Result<F> {
        match t {
            PatternTerm::Iri(n) => Ok(self
                .oracle
                .h2(F::from(TYPE_CODE_IRI), encode_string(self.oracle, n.as_str()))),
            PatternTerm::Literal(l) => encode_literal(self.oracle, self.config, l.as_ref()),
            PatternTerm::DefaultGraph => Ok(self
                .oracle
                .h2(F::from(TYPE_CODE_DEFAULT_GRAPH), encode_string(self.oracle, ""))),
            PatternTerm::Var(v) => Err(Error::TypeErr(format!(
                "variable {v} where a concrete term was required"
            ))),
        }
    }

    /// Representative of `var`, if bound in the current scope.
    pub(crate) fn var_repr(&self, var: &Variable) -> Option<&VarState> {
        self.vars.get(var)
    }

    fn bind_or_unify(&mut self, var: &Variable, pos: PosRef) {
        match self.vars.get(var) {
            Some(state) => match &state.repr {
                ValueRef::Pos(existing) => {
                    let a = *existing;
                    self.emit(Assertion::Unify { a, b: pos });
                }
                other => {
                    let repr = other.clone();
                    self.emit(Assertion::Predicate(Pred::Eq(repr, ValueRef::Pos(pos))));
                }
            },
            None => {
                self.vars.insert(
                    var.clone(),
                    VarState { repr: ValueRef::Pos(pos), nullable: false },
                );
            }
        }
    }

    fn lower_node(&mut self, a: &Algebra) -> Result<()> {
        self.check_cancel()?;
        match a {
            Algebra::Bgp(patterns) => {
                for pattern in patterns {
                    self.lower_pattern(pattern)?;
                }
                Ok(())
            }
            Algebra::Join(l, r) => {
                self.lower_node(l)?;
                self.lower_node(r)
            }
            Algebra::Union(arms) => self.lower_union(arms),
            Algebra::LeftJoin { left, right, filter } => {
                self.lower_optional(left, right, filter.as_ref())
            }
            Algebra::Filter { expr, inner } => {
                self.lower_node(inner)?;
                let pred = self.lower_filter(expr)?;
                if pred == Pred::Err {
                    return Err(Error::TypeErr(format!(
                        "filter expression {expr} has no consistent typing"
                    )));
                }
                self.emit(Assertion::Predicate(pred));
                Ok(())
            }
            Algebra::Extend { inner, var, expr } => {
                self.lower_node(inner)?;
                let value = self.lower_value(expr)?;
                match self.vars.get(var) {
                    Some(state) => {
                        // Rebinding an in-scope variable is join
                        // compatibility: assert equality instead.
                        let repr = state.repr.clone();
                        self.emit(Assertion::Predicate(Pred::Eq(repr, value)));
                    }
                    None => {
                        let h = self.alloc_hidden(HiddenDecl::Join { var: var.clone() });
                        self.emit(Assertion::HiddenBind { hidden: h, value });
                        self.vars.insert(
                            var.clone(),
                            VarState { repr: ValueRef::Hidden(h), nullable: false },
                        );
                    }
                }
                Ok(())
            }
        }
    }

    fn lower_pattern(&mut self, pattern: &QuadPattern) -> Result<()> {
        let slot = SlotId(self.slots.len());
        self.slots.push(SlotDecl {
            pattern: pattern.clone(),
            guards: self.guard_stack.clone(),
        });
        self.schedule.push(Decision::Slot { slot });
        self.emit(Assertion::Inclusion { slot });

        for pos in SlotPos::ALL {
            let term = pattern.positions()[pos.index()];
            let pos_ref = PosRef { slot, pos };
            match term {
                PatternTerm::Var(v) => {
                    let v = v.clone();
                    self.bind_or_unify(&v, pos_ref);
                }
                concrete => {
                    let value = self.encode_pattern_term(concrete)?;
                    self.emit(Assertion::TermEq { pos: pos_ref, value });
                }
            }
        }
        Ok(())
    }

    fn lower_union(&mut self, arms: &[Algebra]) -> Result<()> {
        let group = self.groups.len();
        let flags: Vec<FlagId> = (0..arms.len())
            .map(|_| {
                let id = FlagId(self.flags.len());
                self.flags.push(FlagDecl::Branch { group });
                id
            })
            .collect();
        self.groups.push(flags.clone());
        self.schedule.push(Decision::Branch {
            group,
            flags: flags.clone(),
            guards: self.guard_stack.clone(),
        });
        self.emit(Assertion::OneHot { flags: flags.clone() });

        let snapshot = self.vars.clone();
        // Variables introduced per arm, with that arm's representative.
        let mut introduced: BTreeMap<Variable, Vec<(usize, VarState)>> = BTreeMap::new();

        for (i, arm) in arms.iter().enumerate() {
            self.guard_stack.push((flags[i], true));
            self.lower_node(arm)?;
            self.guard_stack.pop();

            for (var, state) in &self.vars {
                if !snapshot.contains_key(var) {
                    introduced.entry(var.clone()).or_default().push((i, state.clone()));
                }
            }
            self.vars = snapshot.clone();
        }

        for (var, arm_states) in introduced {
            let h = self.alloc_hidden(HiddenDecl::Join { var: var.clone() });
            let mut nullable = arm_states.len() < arms.len();
            let mut by_arm: BTreeMap<usize, VarState> = BTreeMap::new();
            for (i, state) in arm_states {
                nullable |= state.nullable;
                by_arm.insert(i, state);
            }
            for (i, flag) in flags.iter().enumerate() {
                let mut guards = self.guard_stack.clone();
                guards.push((*flag, true));
                let value = match by_arm.get(&i) {
                    Some(state) => state.repr.clone(),
                    None => ValueRef::Unbound,
                };
                self.emit_with_guards(guards, Assertion::HiddenBind { hidden: h, value });
            }
            self.vars
                .insert(var, VarState { repr: ValueRef::Hidden(h), nullable });
        }
        Ok(())
    }

    fn lower_optional(
        &mut self,
        left: &Algebra,
        right: &Algebra,
        filter: Option<&crate::algebra::Expr>,
    ) -> Result<()> {
        self.lower_node(left)?;

        let flag = FlagId(self.flags.len());
        self.flags.push(FlagDecl::OptionalBound);
        self.schedule.push(Decision::Optional { flag, guards: self.guard_stack.clone() });

        let snapshot = self.vars.clone();
        self.guard_stack.push((flag, true));
        self.lower_node(right)?;
        if let Some(expr) = filter {
            let pred = self.lower_filter(expr)?;
            if pred == Pred::Err {
                return Err(Error::TypeErr(format!(
                    "optional filter expression {expr} has no consistent typing"
                )));
            }
            self.emit(Assertion::Predicate(pred));
        }
        self.guard_stack.pop();

        let inner_vars = std::mem::replace(&mut self.vars, snapshot);
        for (var, state) in inner_vars {
            if self.vars.contains_key(&var) {
                continue;
            }
            let h = self.alloc_hidden(HiddenDecl::Join { var: var.clone() });
            let mut bound_guards = self.guard_stack.clone();
            bound_guards.push((flag, true));
            self.emit_with_guards(
                bound_guards,
                Assertion::HiddenBind { hidden: h, value: state.repr },
            );
            let mut unbound_guards = self.guard_stack.clone();
            unbound_guards.push((flag, false));
            self.emit_with_guards(
                unbound_guards,
                Assertion::HiddenBind { hidden: h, value: ValueRef::Unbound },
            );
            self.vars
                .insert(var, VarState { repr: ValueRef::Hidden(h), nullable: true });
        }
        Ok(())
    }
}

/// Lower a normalized query into a constraint program over `n_datasets`
/// signed datasets.
pub fn lower(
    query: &NormalizedQuery,
    n_datasets: usize,
    config: &ProofConfig,
    oracle: &dyn HashOracle,
    cancel: Option<&CancelFlag>,
) -> Result<ConstraintProgram> {
    config.validate()?;
    let mut cx = Lowering::new(oracle, config, cancel);

    for root_index in 0..n_datasets {
        cx.emit(Assertion::SigOk { root_index });
    }

    cx.lower_node(&query.algebra)?;

    let mut projected = Vec::with_capacity(query.projection.len());
    for var in &query.projection {
        let value = match cx.vars.get(var) {
            Some(state) => state.repr.clone(),
            None => ValueRef::Unbound,
        };
        cx.emit(Assertion::VarBind { var: var.clone(), value: value.clone() });
        projected.push((var.clone(), value));
    }

    Ok(ConstraintProgram {
        n_datasets,
        merkle_depth: config.merkle_depth,
        range_width: config.range_width,
        slots: cx.slots,
        flags: cx.flags,
        groups: cx.groups,
        hidden: cx.hidden,
        assertions: cx.assertions,
        schedule: cx.schedule,
        projected,
        constants: cx.constants,
    })
}
