//! Normalized SPARQL algebra
//!
//! The circuit-accepted operator subset that survives preprocessing:
//! `Bgp`, `Join`, `Union` (n-ary, matching the one-hot branch vector),
//! `LeftJoin`, `Filter`, `Extend`, with the projection carried at the
//! root. `GRAPH` contexts are resolved into the graph position of each
//! quad pattern during normalization, so patterns are always full quads.
//!
//! The canonical text rendering here is what the envelope discloses as
//! `normalized_query`; it is deterministic and stable, which also makes
//! it the idempotence witness for the normalizer.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use oxrdf::{Literal, NamedNode, Variable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One position of a quad pattern: a concrete term or a variable.
///
/// Blank nodes never appear here: pattern blank nodes are rewritten to
/// fresh non-distinguished variables before this type is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatternTerm {
    Iri(NamedNode),
    Literal(Literal),
    Var(Variable),
    DefaultGraph,
}

impl PatternTerm {
    /// The variable name, when this position is a variable.
    pub fn as_var(&self) -> Option<&Variable> {
        match self {
            PatternTerm::Var(v) => Some(v),
            _ => None,
        }
    }

    /// True for concrete (non-variable) positions.
    pub fn is_concrete(&self) -> bool {
        !matches!(self, PatternTerm::Var(_))
    }
}

impl fmt::Display for PatternTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternTerm::Iri(n) => write!(f, "{n}"),
            PatternTerm::Literal(l) => write!(f, "{l}"),
            PatternTerm::Var(v) => write!(f, "{v}"),
            PatternTerm::DefaultGraph => write!(f, "default"),
        }
    }
}

/// A quad pattern `(s, p, o, g)`. The graph position defaults to
/// [`PatternTerm::DefaultGraph`] outside any `GRAPH` context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuadPattern {
    pub subject: PatternTerm,
    pub predicate: PatternTerm,
    pub object: PatternTerm,
    pub graph: PatternTerm,
}

impl QuadPattern {
    /// Positions in `(s, p, o, g)` order.
    pub fn positions(&self) -> [&PatternTerm; 4] {
        [&self.subject, &self.predicate, &self.object, &self.graph]
    }

    fn collect_vars(&self, out: &mut BTreeSet<Variable>) {
        for pos in self.positions() {
            if let Some(v) = pos.as_var() {
                out.insert(v.clone());
            }
        }
    }
}

impl fmt::Display for QuadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(quad {} {} {} {})",
            self.subject, self.predicate, self.object, self.graph
        )
    }
}

/// Normalized filter expression (the subset the lowering accepts).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    NamedNode(NamedNode),
    Literal(Literal),
    Var(Variable),
    /// Folded boolean constant.
    Bool(bool),
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Equal(Box<Expr>, Box<Expr>),
    SameTerm(Box<Expr>, Box<Expr>),
    Less(Box<Expr>, Box<Expr>),
    LessEq(Box<Expr>, Box<Expr>),
    Greater(Box<Expr>, Box<Expr>),
    GreaterEq(Box<Expr>, Box<Expr>),
    Bound(Variable),
    IsIri(Box<Expr>),
    IsBlank(Box<Expr>),
    IsLiteral(Box<Expr>),
    Str(Box<Expr>),
    Lang(Box<Expr>),
    Datatype(Box<Expr>),
    LangMatches(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Collect every variable the expression mentions.
    pub fn collect_vars(&self, out: &mut BTreeSet<Variable>) {
        match self {
            Expr::NamedNode(_) | Expr::Literal(_) | Expr::Bool(_) => {}
            Expr::Var(v) | Expr::Bound(v) => {
                out.insert(v.clone());
            }
            Expr::Not(a)
            | Expr::IsIri(a)
            | Expr::IsBlank(a)
            | Expr::IsLiteral(a)
            | Expr::Str(a)
            | Expr::Lang(a)
            | Expr::Datatype(a) => a.collect_vars(out),
            Expr::Or(a, b)
            | Expr::And(a, b)
            | Expr::Equal(a, b)
            | Expr::SameTerm(a, b)
            | Expr::Less(a, b)
            | Expr::LessEq(a, b)
            | Expr::Greater(a, b)
            | Expr::GreaterEq(a, b)
            | Expr::LangMatches(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::NamedNode(n) => write!(f, "{n}"),
            Expr::Literal(l) => write!(f, "{l}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Or(a, b) => write!(f, "(|| {a} {b})"),
            Expr::And(a, b) => write!(f, "(&& {a} {b})"),
            Expr::Not(a) => write!(f, "(! {a})"),
            Expr::Equal(a, b) => write!(f, "(= {a} {b})"),
            Expr::SameTerm(a, b) => write!(f, "(sameTerm {a} {b})"),
            Expr::Less(a, b) => write!(f, "(< {a} {b})"),
            Expr::LessEq(a, b) => write!(f, "(<= {a} {b})"),
            Expr::Greater(a, b) => write!(f, "(> {a} {b})"),
            Expr::GreaterEq(a, b) => write!(f, "(>= {a} {b})"),
            Expr::Bound(v) => write!(f, "(bound {v})"),
            Expr::IsIri(a) => write!(f, "(isIRI {a})"),
            Expr::IsBlank(a) => write!(f, "(isBlank {a})"),
            Expr::IsLiteral(a) => write!(f, "(isLiteral {a})"),
            Expr::Str(a) => write!(f, "(str {a})"),
            Expr::Lang(a) => write!(f, "(lang {a})"),
            Expr::Datatype(a) => write!(f, "(datatype {a})"),
            Expr::LangMatches(a, b) => write!(f, "(langMatches {a} {b})"),
        }
    }
}

/// The normalized operator tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Algebra {
    Bgp(Vec<QuadPattern>),
    Join(Box<Algebra>, Box<Algebra>),
    /// n-ary union; the lowering allocates one branch indicator per arm.
    Union(Vec<Algebra>),
    LeftJoin {
        left: Box<Algebra>,
        right: Box<Algebra>,
        filter: Option<Expr>,
    },
    Filter {
        expr: Expr,
        inner: Box<Algebra>,
    },
    Extend {
        inner: Box<Algebra>,
        var: Variable,
        expr: Expr,
    },
}

impl Algebra {
    /// An always-satisfied empty pattern.
    pub fn unit() -> Self {
        Algebra::Bgp(Vec::new())
    }

    /// An unsatisfiable pattern (a union with no branches).
    pub fn empty() -> Self {
        Algebra::Union(Vec::new())
    }

    /// Variables this subtree can bind (certainly or optionally).
    pub fn visible_vars(&self) -> BTreeSet<Variable> {
        let mut out = BTreeSet::new();
        self.collect_visible(&mut out);
        out
    }

    fn collect_visible(&self, out: &mut BTreeSet<Variable>) {
        match self {
            Algebra::Bgp(patterns) => {
                for p in patterns {
                    p.collect_vars(out);
                }
            }
            Algebra::Join(a, b) => {
                a.collect_visible(out);
                b.collect_visible(out);
            }
            Algebra::Union(arms) => {
                for arm in arms {
                    arm.collect_visible(out);
                }
            }
            Algebra::LeftJoin { left, right, .. } => {
                left.collect_visible(out);
                right.collect_visible(out);
            }
            Algebra::Filter { inner, .. } => inner.collect_visible(out),
            Algebra::Extend { inner, var, .. } => {
                inner.collect_visible(out);
                out.insert(var.clone());
            }
        }
    }

    /// True if any `Union` occurs in this subtree.
    pub fn contains_union(&self) -> bool {
        match self {
            Algebra::Union(_) => true,
            Algebra::Bgp(_) => false,
            Algebra::Join(a, b) => a.contains_union() || b.contains_union(),
            Algebra::LeftJoin { left, right, .. } => {
                left.contains_union() || right.contains_union()
            }
            Algebra::Filter { inner, .. } | Algebra::Extend { inner, .. } => {
                inner.contains_union()
            }
        }
    }

    /// True if any `LeftJoin` (OPTIONAL) occurs in this subtree.
    pub fn contains_optional(&self) -> bool {
        match self {
            Algebra::LeftJoin { .. } => true,
            Algebra::Bgp(_) => false,
            Algebra::Join(a, b) => a.contains_optional() || b.contains_optional(),
            Algebra::Union(arms) => arms.iter().any(Algebra::contains_optional),
            Algebra::Filter { inner, .. } | Algebra::Extend { inner, .. } => {
                inner.contains_optional()
            }
        }
    }

    /// True if any pattern constrains a non-default graph position.
    pub fn contains_named_graph(&self) -> bool {
        match self {
            Algebra::Bgp(patterns) => patterns
                .iter()
                .any(|p| !matches!(p.graph, PatternTerm::DefaultGraph)),
            Algebra::Join(a, b) => a.contains_named_graph() || b.contains_named_graph(),
            Algebra::Union(arms) => arms.iter().any(Algebra::contains_named_graph),
            Algebra::LeftJoin { left, right, .. } => {
                left.contains_named_graph() || right.contains_named_graph()
            }
            Algebra::Filter { inner, .. } | Algebra::Extend { inner, .. } => {
                inner.contains_named_graph()
            }
        }
    }

    /// Branch arity of every union in the tree, in depth-first order.
    pub fn union_arities(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_union_arities(&mut out);
        out
    }

    fn collect_union_arities(&self, out: &mut Vec<usize>) {
        match self {
            Algebra::Bgp(_) => {}
            Algebra::Join(a, b) => {
                a.collect_union_arities(out);
                b.collect_union_arities(out);
            }
            Algebra::Union(arms) => {
                out.push(arms.len());
                for arm in arms {
                    arm.collect_union_arities(out);
                }
            }
            Algebra::LeftJoin { left, right, .. } => {
                left.collect_union_arities(out);
                right.collect_union_arities(out);
            }
            Algebra::Filter { inner, .. } | Algebra::Extend { inner, .. } => {
                inner.collect_union_arities(out)
            }
        }
    }
}

impl fmt::Display for Algebra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algebra::Bgp(patterns) => {
                write!(f, "(bgp")?;
                for p in patterns {
                    write!(f, " {p}")?;
                }
                write!(f, ")")
            }
            Algebra::Join(a, b) => write!(f, "(join {a} {b})"),
            Algebra::Union(arms) => {
                write!(f, "(union")?;
                for arm in arms {
                    write!(f, " {arm}")?;
                }
                write!(f, ")")
            }
            Algebra::LeftJoin { left, right, filter } => match filter {
                Some(e) => write!(f, "(leftjoin {left} {right} {e})"),
                None => write!(f, "(leftjoin {left} {right})"),
            },
            Algebra::Filter { expr, inner } => write!(f, "(filter {expr} {inner})"),
            Algebra::Extend { inner, var, expr } => {
                write!(f, "(extend ({var} {expr}) {inner})")
            }
        }
    }
}

/// Solution-modifier instructions stripped during normalization and
/// applied by the verifier on disclosed bindings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcessing {
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub reduced: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// One `ORDER BY` key over a projected variable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub var: String,
    #[serde(default)]
    pub descending: bool,
}

/// A fully normalized query: operator tree, root projection, query form,
/// and the stripped post-processing instructions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub algebra: Algebra,
    /// Projected (disclosed) variables; empty for ASK.
    pub projection: Vec<Variable>,
    /// True when the source query was an ASK.
    pub ask: bool,
    pub post: PostProcessing,
}

impl fmt::Display for NormalizedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(project (")?;
        for (i, v) in self.projection.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ") {})", self.algebra)
    }
}
