//! Query normalizer (SPARQL algebra → circuit-accepted subset)
//!
//! Rewrites, applied until the tree stops changing:
//! 1. property paths → BGP / Join / Union (repetition bounded by
//!    `path_segment_max`; the branch taken discloses the path length),
//! 2. `VALUES` → a union of per-row binds,
//! 3. `IN` / `NOT IN` → (negated) equality disjunction,
//! 4. solution modifiers stripped into [`PostProcessing`],
//! 5. ASK → SELECT with an empty projection,
//! 6. constant/boolean folding on filter expressions and the tree.
//!
//! Everything outside the subset (aggregates, subqueries, `MINUS`,
//! `SERVICE`, `EXISTS`, `CONSTRUCT`/`DESCRIBE`, negated property sets)
//! is rejected with `UnsupportedFeature`. Pattern blank nodes become
//! fresh non-distinguished variables; `GRAPH` contexts are resolved into
//! the graph position of the nested quad patterns.

#![forbid(unsafe_code)]

use oxrdf::vocab::xsd;
use oxrdf::{Literal, Variable};
use spargebra::algebra::{Expression, Function, GraphPattern, OrderExpression, PropertyPathExpression};
use spargebra::term::{GroundTerm, NamedNodePattern, TermPattern, TriplePattern};
use std::collections::BTreeMap;

use crate::algebra::{Algebra, Expr, NormalizedQuery, OrderKey, PatternTerm, PostProcessing, QuadPattern};
use crate::config::ProofConfig;
use crate::encode::{classify_special, numeric_class, NumericClass, Special};
use crate::error::{Error, Result};

/// Parse and normalize a SPARQL query under the given configuration.
pub fn normalize_text(query: &str, config: &ProofConfig) -> Result<NormalizedQuery> {
    let parsed = spargebra::Query::parse(query, None).map_err(|e| Error::Parse(e.to_string()))?;
    normalize(&parsed, config)
}

/// Normalize an already-parsed query.
pub fn normalize(query: &spargebra::Query, config: &ProofConfig) -> Result<NormalizedQuery> {
    let (pattern, ask) = match query {
        spargebra::Query::Select { pattern, .. } => (pattern, false),
        spargebra::Query::Ask { pattern, .. } => (pattern, true),
        spargebra::Query::Construct { .. } => {
            return Err(Error::UnsupportedFeature("CONSTRUCT query form".into()))
        }
        spargebra::Query::Describe { .. } => {
            return Err(Error::UnsupportedFeature("DESCRIBE query form".into()))
        }
    };

    let mut post = PostProcessing::default();
    let mut cur = pattern;
    loop {
        match cur {
            GraphPattern::Slice { inner, start, length } => {
                if *start > 0 {
                    post.offset = Some(*start);
                }
                post.limit = *length;
                cur = inner.as_ref();
            }
            GraphPattern::Distinct { inner } => {
                post.distinct = true;
                cur = inner.as_ref();
            }
            GraphPattern::Reduced { inner } => {
                post.reduced = true;
                cur = inner.as_ref();
            }
            _ => break,
        }
    }

    let (projection, mut body) = match cur {
        GraphPattern::Project { inner, variables } => (variables.clone(), inner.as_ref()),
        other => (Vec::new(), other),
    };
    if let GraphPattern::OrderBy { inner, expression } = body {
        for key in expression {
            post.order_by.push(order_key(key)?);
        }
        body = inner.as_ref();
    }

    let mut cx = Context { config, fresh: 0, blanks: BTreeMap::new() };
    let algebra = cx.convert(body, None)?;
    let algebra = fold_fixpoint(algebra);

    Ok(NormalizedQuery { algebra, projection, ask, post })
}

fn order_key(key: &OrderExpression) -> Result<OrderKey> {
    let (expr, descending) = match key {
        OrderExpression::Asc(e) => (e, false),
        OrderExpression::Desc(e) => (e, true),
    };
    match expr {
        Expression::Variable(v) => Ok(OrderKey { var: v.as_str().to_string(), descending }),
        _ => Err(Error::UnsupportedFeature("ORDER BY over a non-variable expression".into())),
    }
}

// ============================================================================
// Tree conversion
// ============================================================================

struct Context<'a> {
    config: &'a ProofConfig,
    fresh: usize,
    /// Pattern blank-node labels already rewritten to variables.
    blanks: BTreeMap<String, Variable>,
}

impl Context<'_> {
    fn fresh_var(&mut self, hint: &str) -> Variable {
        let v = Variable::new_unchecked(format!("__{hint}{}", self.fresh));
        self.fresh += 1;
        v
    }

    fn blank_var(&mut self, label: &str) -> Variable {
        if let Some(v) = self.blanks.get(label) {
            return v.clone();
        }
        let v = Variable::new_unchecked(format!("__bn_{label}"));
        self.blanks.insert(label.to_string(), v.clone());
        v
    }

    fn convert(&mut self, p: &GraphPattern, graph: Option<&PatternTerm>) -> Result<Algebra> {
        match p {
            GraphPattern::Bgp { patterns } => {
                let mut quads = Vec::with_capacity(patterns.len());
                for t in patterns {
                    quads.push(self.triple_to_quad(t, graph)?);
                }
                Ok(Algebra::Bgp(quads))
            }
            GraphPattern::Path { subject, path, object } => {
                let s = self.term_pattern(subject)?;
                let o = self.term_pattern(object)?;
                self.expand_path(&s, path, &o, graph)
            }
            GraphPattern::Join { left, right } => Ok(Algebra::Join(
                Box::new(self.convert(left, graph)?),
                Box::new(self.convert(right, graph)?),
            )),
            GraphPattern::Union { left, right } => Ok(Algebra::Union(vec![
                self.convert(left, graph)?,
                self.convert(right, graph)?,
            ])),
            GraphPattern::LeftJoin { left, right, expression } => Ok(Algebra::LeftJoin {
                left: Box::new(self.convert(left, graph)?),
                right: Box::new(self.convert(right, graph)?),
                filter: expression.as_ref().map(|e| self.convert_expr(e)).transpose()?,
            }),
            GraphPattern::Filter { expr, inner } => Ok(Algebra::Filter {
                expr: self.convert_expr(expr)?,
                inner: Box::new(self.convert(inner, graph)?),
            }),
            GraphPattern::Extend { inner, variable, expression } => Ok(Algebra::Extend {
                inner: Box::new(self.convert(inner, graph)?),
                var: variable.clone(),
                expr: self.convert_expr(expression)?,
            }),
            GraphPattern::Graph { name, inner } => {
                let g = match name {
                    NamedNodePattern::NamedNode(n) => PatternTerm::Iri(n.clone()),
                    NamedNodePattern::Variable(v) => PatternTerm::Var(v.clone()),
                };
                self.convert(inner, Some(&g))
            }
            GraphPattern::Values { variables, bindings } => {
                let mut arms = Vec::with_capacity(bindings.len());
                for row in bindings {
                    let mut arm = Algebra::unit();
                    for (var, cell) in variables.iter().zip(row) {
                        if let Some(term) = cell {
                            arm = Algebra::Extend {
                                inner: Box::new(arm),
                                var: var.clone(),
                                expr: ground_term_expr(term)?,
                            };
                        }
                    }
                    arms.push(arm);
                }
                Ok(Algebra::Union(arms))
            }
            GraphPattern::Minus { .. } => Err(Error::UnsupportedFeature("MINUS".into())),
            GraphPattern::Service { .. } => Err(Error::UnsupportedFeature("SERVICE".into())),
            GraphPattern::Group { .. } => {
                Err(Error::UnsupportedFeature("aggregates / GROUP BY".into()))
            }
            GraphPattern::Project { .. } => Err(Error::UnsupportedFeature("subquery".into())),
            GraphPattern::OrderBy { .. }
            | GraphPattern::Distinct { .. }
            | GraphPattern::Reduced { .. }
            | GraphPattern::Slice { .. } => {
                Err(Error::UnsupportedFeature("nested solution modifier".into()))
            }
            #[allow(unreachable_patterns)]
            _ => Err(Error::UnsupportedFeature("unrecognized graph pattern".into())),
        }
    }

    fn triple_to_quad(&mut self, t: &TriplePattern, graph: Option<&PatternTerm>) -> Result<QuadPattern> {
        Ok(QuadPattern {
            subject: self.term_pattern(&t.subject)?,
            predicate: match &t.predicate {
                NamedNodePattern::NamedNode(n) => PatternTerm::Iri(n.clone()),
                NamedNodePattern::Variable(v) => PatternTerm::Var(v.clone()),
            },
            object: self.term_pattern(&t.object)?,
            graph: graph.cloned().unwrap_or(PatternTerm::DefaultGraph),
        })
    }

    fn term_pattern(&mut self, t: &TermPattern) -> Result<PatternTerm> {
        match t {
            TermPattern::NamedNode(n) => Ok(PatternTerm::Iri(n.clone())),
            TermPattern::Literal(l) => Ok(PatternTerm::Literal(l.clone())),
            TermPattern::Variable(v) => Ok(PatternTerm::Var(v.clone())),
            TermPattern::BlankNode(b) => Ok(PatternTerm::Var(self.blank_var(b.as_str()))),
            #[allow(unreachable_patterns)]
            _ => Err(Error::UnsupportedTermType("embedded triple pattern".into())),
        }
    }

    // ------------------------------ property paths ---------------------------

    fn expand_path(
        &mut self,
        s: &PatternTerm,
        path: &PropertyPathExpression,
        o: &PatternTerm,
        graph: Option<&PatternTerm>,
    ) -> Result<Algebra> {
        match path {
            PropertyPathExpression::NamedNode(p) => Ok(Algebra::Bgp(vec![QuadPattern {
                subject: s.clone(),
                predicate: PatternTerm::Iri(p.clone()),
                object: o.clone(),
                graph: graph.cloned().unwrap_or(PatternTerm::DefaultGraph),
            }])),
            PropertyPathExpression::Reverse(inner) => self.expand_path(o, inner, s, graph),
            PropertyPathExpression::Sequence(a, b) => {
                let mid = PatternTerm::Var(self.fresh_var("seg"));
                Ok(Algebra::Join(
                    Box::new(self.expand_path(s, a, &mid, graph)?),
                    Box::new(self.expand_path(&mid, b, o, graph)?),
                ))
            }
            PropertyPathExpression::Alternative(a, b) => Ok(Algebra::Union(vec![
                self.expand_path(s, a, o, graph)?,
                self.expand_path(s, b, o, graph)?,
            ])),
            PropertyPathExpression::ZeroOrOne(inner) => Ok(Algebra::Union(vec![
                identity_bind(s, o),
                self.expand_path(s, inner, o, graph)?,
            ])),
            PropertyPathExpression::OneOrMore(inner) => {
                let mut arms = Vec::with_capacity(self.config.path_segment_max);
                for hops in 1..=self.config.path_segment_max {
                    arms.push(self.path_chain(s, inner, o, graph, hops)?);
                }
                Ok(Algebra::Union(arms))
            }
            PropertyPathExpression::ZeroOrMore(inner) => {
                let mut arms = Vec::with_capacity(self.config.path_segment_max + 1);
                arms.push(identity_bind(s, o));
                for hops in 1..=self.config.path_segment_max {
                    arms.push(self.path_chain(s, inner, o, graph, hops)?);
                }
                Ok(Algebra::Union(arms))
            }
            PropertyPathExpression::NegatedPropertySet(_) => {
                Err(Error::UnsupportedFeature("negated property set".into()))
            }
        }
    }

    /// `hops`-fold concatenation of `inner` through fresh variables.
    fn path_chain(
        &mut self,
        s: &PatternTerm,
        inner: &PropertyPathExpression,
        o: &PatternTerm,
        graph: Option<&PatternTerm>,
        hops: usize,
    ) -> Result<Algebra> {
        debug_assert!(hops >= 1);
        let mut acc: Option<Algebra> = None;
        let mut from = s.clone();
        for hop in 0..hops {
            let to = if hop + 1 == hops {
                o.clone()
            } else {
                PatternTerm::Var(self.fresh_var("hop"))
            };
            let step = self.expand_path(&from, inner, &to, graph)?;
            acc = Some(match acc {
                None => step,
                Some(prev) => Algebra::Join(Box::new(prev), Box::new(step)),
            });
            from = to;
        }
        Ok(acc.expect("hops >= 1"))
    }

    // ------------------------------- expressions -----------------------------

    fn convert_expr(&mut self, e: &Expression) -> Result<Expr> {
        match e {
            Expression::NamedNode(n) => Ok(Expr::NamedNode(n.clone())),
            Expression::Literal(l) => Ok(Expr::Literal(l.clone())),
            Expression::Variable(v) => Ok(Expr::Var(v.clone())),
            Expression::Or(a, b) => Ok(Expr::Or(
                Box::new(self.convert_expr(a)?),
                Box::new(self.convert_expr(b)?),
            )),
            Expression::And(a, b) => Ok(Expr::And(
                Box::new(self.convert_expr(a)?),
                Box::new(self.convert_expr(b)?),
            )),
            Expression::Not(a) => Ok(Expr::Not(Box::new(self.convert_expr(a)?))),
            Expression::Equal(a, b) => Ok(Expr::Equal(
                Box::new(self.convert_expr(a)?),
                Box::new(self.convert_expr(b)?),
            )),
            Expression::SameTerm(a, b) => Ok(Expr::SameTerm(
                Box::new(self.convert_expr(a)?),
                Box::new(self.convert_expr(b)?),
            )),
            Expression::Less(a, b) => Ok(Expr::Less(
                Box::new(self.convert_expr(a)?),
                Box::new(self.convert_expr(b)?),
            )),
            Expression::LessOrEqual(a, b) => Ok(Expr::LessEq(
                Box::new(self.convert_expr(a)?),
                Box::new(self.convert_expr(b)?),
            )),
            Expression::Greater(a, b) => Ok(Expr::Greater(
                Box::new(self.convert_expr(a)?),
                Box::new(self.convert_expr(b)?),
            )),
            Expression::GreaterOrEqual(a, b) => Ok(Expr::GreaterEq(
                Box::new(self.convert_expr(a)?),
                Box::new(self.convert_expr(b)?),
            )),
            Expression::In(needle, haystack) => {
                let needle = self.convert_expr(needle)?;
                let mut out: Option<Expr> = None;
                for candidate in haystack {
                    let eq = Expr::Equal(
                        Box::new(needle.clone()),
                        Box::new(self.convert_expr(candidate)?),
                    );
                    out = Some(match out {
                        None => eq,
                        Some(prev) => Expr::Or(Box::new(prev), Box::new(eq)),
                    });
                }
                Ok(out.unwrap_or(Expr::Bool(false)))
            }
            Expression::Bound(v) => Ok(Expr::Bound(v.clone())),
            Expression::UnaryPlus(a) => self.convert_expr(a),
            Expression::UnaryMinus(a) => match self.convert_expr(a)? {
                Expr::Literal(l) if numeric_class(l.datatype()) == NumericClass::Integer => {
                    let lexical = l.value().trim();
                    let negated = match lexical.strip_prefix('-') {
                        Some(rest) => rest.to_string(),
                        None => format!("-{}", lexical.trim_start_matches('+')),
                    };
                    Ok(Expr::Literal(Literal::new_typed_literal(negated, l.datatype())))
                }
                _ => Err(Error::UnsupportedFeature("unary minus over a non-integer".into())),
            },
            Expression::Exists(_) => Err(Error::UnsupportedFeature("EXISTS / NOT EXISTS".into())),
            Expression::If(..) => Err(Error::UnsupportedFeature("IF expression".into())),
            Expression::Coalesce(_) => Err(Error::UnsupportedFeature("COALESCE".into())),
            Expression::Add(..)
            | Expression::Subtract(..)
            | Expression::Multiply(..)
            | Expression::Divide(..) => {
                Err(Error::UnsupportedFeature("arithmetic in filter expressions".into()))
            }
            Expression::FunctionCall(func, args) => self.convert_function(func, args),
        }
    }

    fn convert_function(&mut self, func: &Function, args: &[Expression]) -> Result<Expr> {
        let unary = |cx: &mut Self, args: &[Expression]| -> Result<Box<Expr>> {
            match args {
                [a] => Ok(Box::new(cx.convert_expr(a)?)),
                _ => Err(Error::Parse("wrong arity for builtin function".into())),
            }
        };
        match func {
            Function::Str => Ok(Expr::Str(unary(self, args)?)),
            Function::Lang => Ok(Expr::Lang(unary(self, args)?)),
            Function::Datatype => Ok(Expr::Datatype(unary(self, args)?)),
            Function::IsIri => Ok(Expr::IsIri(unary(self, args)?)),
            Function::IsBlank => Ok(Expr::IsBlank(unary(self, args)?)),
            Function::IsLiteral => Ok(Expr::IsLiteral(unary(self, args)?)),
            Function::LangMatches => match args {
                [tag, range] => Ok(Expr::LangMatches(
                    Box::new(self.convert_expr(tag)?),
                    Box::new(self.convert_expr(range)?),
                )),
                _ => Err(Error::Parse("wrong arity for langMatches".into())),
            },
            Function::Regex => Err(Error::UnsupportedFeature("regex".into())),
            other => Err(Error::UnsupportedFeature(format!("function {other:?}"))),
        }
    }
}

/// The `p?` identity branch: assert subject = object.
fn identity_bind(s: &PatternTerm, o: &PatternTerm) -> Algebra {
    match (s, o) {
        (PatternTerm::Var(sv), PatternTerm::Var(ov)) if sv == ov => Algebra::unit(),
        (s, PatternTerm::Var(ov)) if s.is_concrete() => Algebra::Extend {
            inner: Box::new(Algebra::unit()),
            var: ov.clone(),
            expr: pattern_expr(s),
        },
        (PatternTerm::Var(sv), o) => Algebra::Extend {
            inner: Box::new(Algebra::unit()),
            var: sv.clone(),
            expr: pattern_expr(o),
        },
        (s, o) if s == o => Algebra::unit(),
        _ => Algebra::empty(),
    }
}

fn pattern_expr(p: &PatternTerm) -> Expr {
    match p {
        PatternTerm::Iri(n) => Expr::NamedNode(n.clone()),
        PatternTerm::Literal(l) => Expr::Literal(l.clone()),
        PatternTerm::Var(v) => Expr::Var(v.clone()),
        PatternTerm::DefaultGraph => Expr::Bool(false),
    }
}

fn ground_term_expr(t: &GroundTerm) -> Result<Expr> {
    match t {
        GroundTerm::NamedNode(n) => Ok(Expr::NamedNode(n.clone())),
        GroundTerm::Literal(l) => Ok(Expr::Literal(l.clone())),
        #[allow(unreachable_patterns)]
        _ => Err(Error::UnsupportedTermType("embedded triple in VALUES".into())),
    }
}

// ============================================================================
// Constant folding (fixpoint)
// ============================================================================

/// Fold the tree until it stops changing. Normalization is idempotent:
/// folding an already-folded tree is the identity.
pub fn fold_fixpoint(mut a: Algebra) -> Algebra {
    loop {
        let next = fold_algebra(a.clone());
        if next == a {
            return a;
        }
        a = next;
    }
}

fn fold_algebra(a: Algebra) -> Algebra {
    match a {
        Algebra::Bgp(p) => Algebra::Bgp(p),
        Algebra::Join(l, r) => {
            let l = fold_algebra(*l);
            let r = fold_algebra(*r);
            match (l, r) {
                (Algebra::Union(arms), _) if arms.is_empty() => Algebra::empty(),
                (_, Algebra::Union(arms)) if arms.is_empty() => Algebra::empty(),
                (Algebra::Bgp(a), Algebra::Bgp(b)) => {
                    let mut merged = a;
                    merged.extend(b);
                    Algebra::Bgp(merged)
                }
                (l, r) => Algebra::Join(Box::new(l), Box::new(r)),
            }
        }
        Algebra::Union(arms) => {
            let mut flat = Vec::with_capacity(arms.len());
            for arm in arms {
                match fold_algebra(arm) {
                    Algebra::Union(nested) => flat.extend(nested),
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 {
                flat.pop().expect("one arm")
            } else {
                Algebra::Union(flat)
            }
        }
        Algebra::LeftJoin { left, right, filter } => Algebra::LeftJoin {
            left: Box::new(fold_algebra(*left)),
            right: Box::new(fold_algebra(*right)),
            filter: filter.map(fold_expr),
        },
        Algebra::Filter { expr, inner } => {
            let expr = fold_expr(expr);
            let inner = fold_algebra(*inner);
            match expr {
                Expr::Bool(true) => inner,
                Expr::Bool(false) => Algebra::empty(),
                expr => Algebra::Filter { expr, inner: Box::new(inner) },
            }
        }
        Algebra::Extend { inner, var, expr } => {
            let inner = fold_algebra(*inner);
            if matches!(&inner, Algebra::Union(arms) if arms.is_empty()) {
                return Algebra::empty();
            }
            Algebra::Extend { inner: Box::new(inner), var, expr: fold_expr(expr) }
        }
    }
}

/// Fold an expression. Only cleanly decidable constants fold; anything
/// that could be a runtime `TypeError` is kept so the EBV context can
/// decide its fate at lowering time.
pub fn fold_expr(e: Expr) -> Expr {
    match e {
        Expr::And(a, b) => match (fold_expr(*a), fold_expr(*b)) {
            (Expr::Bool(false), _) | (_, Expr::Bool(false)) => Expr::Bool(false),
            (Expr::Bool(true), x) | (x, Expr::Bool(true)) => x,
            (a, b) => Expr::And(Box::new(a), Box::new(b)),
        },
        Expr::Or(a, b) => match (fold_expr(*a), fold_expr(*b)) {
            (Expr::Bool(true), _) | (_, Expr::Bool(true)) => Expr::Bool(true),
            (Expr::Bool(false), x) | (x, Expr::Bool(false)) => x,
            (a, b) => Expr::Or(Box::new(a), Box::new(b)),
        },
        Expr::Not(a) => match fold_expr(*a) {
            Expr::Bool(b) => Expr::Bool(!b),
            a => Expr::Not(Box::new(a)),
        },
        Expr::SameTerm(a, b) => {
            let a = fold_expr(*a);
            let b = fold_expr(*b);
            match (&a, &b) {
                (Expr::NamedNode(x), Expr::NamedNode(y)) => Expr::Bool(x == y),
                (Expr::Literal(x), Expr::Literal(y)) => Expr::Bool(x == y),
                (Expr::NamedNode(_), Expr::Literal(_)) | (Expr::Literal(_), Expr::NamedNode(_)) => {
                    Expr::Bool(false)
                }
                _ => Expr::SameTerm(Box::new(a), Box::new(b)),
            }
        }
        Expr::Equal(a, b) => {
            let a = fold_expr(*a);
            let b = fold_expr(*b);
            match (&a, &b) {
                (Expr::NamedNode(x), Expr::NamedNode(y)) => Expr::Bool(x == y),
                (Expr::Literal(x), Expr::Literal(y)) => match static_value_eq(x, y) {
                    Some(v) => Expr::Bool(v),
                    None => Expr::Equal(Box::new(a), Box::new(b)),
                },
                _ => Expr::Equal(Box::new(a), Box::new(b)),
            }
        }
        Expr::Less(a, b) => fold_cmp(*a, *b, |o| o == std::cmp::Ordering::Less, Expr::Less),
        Expr::LessEq(a, b) => {
            fold_cmp(*a, *b, |o| o != std::cmp::Ordering::Greater, Expr::LessEq)
        }
        Expr::Greater(a, b) => {
            fold_cmp(*a, *b, |o| o == std::cmp::Ordering::Greater, Expr::Greater)
        }
        Expr::GreaterEq(a, b) => {
            fold_cmp(*a, *b, |o| o != std::cmp::Ordering::Less, Expr::GreaterEq)
        }
        Expr::IsIri(a) => match fold_expr(*a) {
            Expr::NamedNode(_) => Expr::Bool(true),
            Expr::Literal(_) => Expr::Bool(false),
            a => Expr::IsIri(Box::new(a)),
        },
        Expr::IsBlank(a) => match fold_expr(*a) {
            Expr::NamedNode(_) | Expr::Literal(_) => Expr::Bool(false),
            a => Expr::IsBlank(Box::new(a)),
        },
        Expr::IsLiteral(a) => match fold_expr(*a) {
            Expr::Literal(_) => Expr::Bool(true),
            Expr::NamedNode(_) => Expr::Bool(false),
            a => Expr::IsLiteral(Box::new(a)),
        },
        Expr::Str(a) => Expr::Str(Box::new(fold_expr(*a))),
        Expr::Lang(a) => Expr::Lang(Box::new(fold_expr(*a))),
        Expr::Datatype(a) => Expr::Datatype(Box::new(fold_expr(*a))),
        Expr::LangMatches(a, b) => {
            Expr::LangMatches(Box::new(fold_expr(*a)), Box::new(fold_expr(*b)))
        }
        leaf @ (Expr::NamedNode(_)
        | Expr::Literal(_)
        | Expr::Var(_)
        | Expr::Bool(_)
        | Expr::Bound(_)) => leaf,
    }
}

fn fold_cmp(
    a: Expr,
    b: Expr,
    decide: impl Fn(std::cmp::Ordering) -> bool,
    rebuild: impl Fn(Box<Expr>, Box<Expr>) -> Expr,
) -> Expr {
    let a = fold_expr(a);
    let b = fold_expr(b);
    if let (Expr::Literal(x), Expr::Literal(y)) = (&a, &b) {
        if let Some(ord) = static_value_cmp(x, y) {
            return Expr::Bool(decide(ord));
        }
    }
    rebuild(Box::new(a), Box::new(b))
}

/// Value equality between two constant literals, when statically decidable.
fn static_value_eq(x: &Literal, y: &Literal) -> Option<bool> {
    if x == y {
        return Some(true);
    }
    // Permissive bound for folding: overflow falls through to runtime.
    let cfg = ProofConfig::default();
    match (classify_special(&cfg, x.as_ref()), classify_special(&cfg, y.as_ref())) {
        (Ok(Special::Numeric(a)), Ok(Special::Numeric(b))) => Some(a == b),
        (Ok(Special::DateTime(a)), Ok(Special::DateTime(b))) => Some(a == b),
        (Ok(Special::Bool(a)), Ok(Special::Bool(b))) => Some(a == b),
        (Ok(Special::Text), Ok(Special::Text)) => {
            if x.datatype() == y.datatype() && x.datatype() == xsd::STRING {
                Some(x.value() == y.value())
            } else {
                // Distinct unknown datatypes: a runtime type error, not false.
                None
            }
        }
        _ => None,
    }
}

fn static_value_cmp(x: &Literal, y: &Literal) -> Option<std::cmp::Ordering> {
    let cfg = ProofConfig::default();
    match (classify_special(&cfg, x.as_ref()), classify_special(&cfg, y.as_ref())) {
        (Ok(Special::Numeric(a)), Ok(Special::Numeric(b))) => Some(a.cmp(&b)),
        (Ok(Special::DateTime(a)), Ok(Special::DateTime(b))) => Some(a.cmp(&b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ProofConfig {
        ProofConfig { merkle_depth: 4, ..ProofConfig::default() }
    }

    #[test]
    fn single_triple_select_normalizes_to_one_bgp() {
        let q = normalize_text(
            "SELECT ?s WHERE { ?s <http://example.org/p> 42 }",
            &cfg(),
        )
        .unwrap();
        assert!(!q.ask);
        assert_eq!(q.projection.len(), 1);
        match &q.algebra {
            Algebra::Bgp(patterns) => {
                assert_eq!(patterns.len(), 1);
                assert!(matches!(patterns[0].graph, PatternTerm::DefaultGraph));
            }
            other => panic!("expected bgp, got {other}"),
        }
    }

    #[test]
    fn ask_has_empty_projection() {
        let q = normalize_text("ASK { ?s ?p ?o }", &cfg()).unwrap();
        assert!(q.ask);
        assert!(q.projection.is_empty());
    }

    #[test]
    fn graph_context_lands_in_the_quad_pattern() {
        let q = normalize_text(
            "SELECT ?s WHERE { GRAPH <http://example.org/g> { ?s ?p ?o } }",
            &cfg(),
        )
        .unwrap();
        match &q.algebra {
            Algebra::Bgp(patterns) => {
                assert!(matches!(&patterns[0].graph, PatternTerm::Iri(n) if n.as_str() == "http://example.org/g"));
            }
            other => panic!("expected bgp, got {other}"),
        }
    }

    #[test]
    fn one_or_more_path_expands_to_bounded_union() {
        let q = normalize_text(
            "SELECT ?y WHERE { <http://example.org/a> <http://example.org/knows>+ ?y }",
            &cfg(),
        )
        .unwrap();
        match &q.algebra {
            Algebra::Union(arms) => {
                assert_eq!(arms.len(), cfg().path_segment_max);
                // Arm k holds a k+1-pattern BGP after join merging.
                for (k, arm) in arms.iter().enumerate() {
                    match arm {
                        Algebra::Bgp(p) => assert_eq!(p.len(), k + 1),
                        other => panic!("expected merged bgp arm, got {other}"),
                    }
                }
            }
            other => panic!("expected union, got {other}"),
        }
    }

    #[test]
    fn reverse_path_swaps_subject_and_object() {
        let q = normalize_text(
            "SELECT ?y WHERE { <http://example.org/a> ^<http://example.org/p> ?y }",
            &cfg(),
        )
        .unwrap();
        match &q.algebra {
            Algebra::Bgp(patterns) => {
                assert!(matches!(&patterns[0].subject, PatternTerm::Var(v) if v.as_str() == "y"));
                assert!(
                    matches!(&patterns[0].object, PatternTerm::Iri(n) if n.as_str() == "http://example.org/a")
                );
            }
            other => panic!("expected bgp, got {other}"),
        }
    }

    #[test]
    fn sequence_path_joins_through_a_fresh_variable() {
        let q = normalize_text(
            "SELECT ?y WHERE { <http://example.org/a> <http://example.org/p>/<http://example.org/q> ?y }",
            &cfg(),
        )
        .unwrap();
        match &q.algebra {
            Algebra::Bgp(patterns) => {
                assert_eq!(patterns.len(), 2);
                let mid = patterns[0].object.as_var().expect("fresh middle variable");
                assert_eq!(patterns[1].subject.as_var(), Some(mid));
                assert!(mid.as_str().starts_with("__seg"));
            }
            other => panic!("expected merged bgp, got {other}"),
        }
    }

    #[test]
    fn zero_or_one_path_has_identity_arm() {
        let q = normalize_text(
            "SELECT ?y WHERE { <http://example.org/a> <http://example.org/p>? ?y }",
            &cfg(),
        )
        .unwrap();
        match &q.algebra {
            Algebra::Union(arms) => {
                assert_eq!(arms.len(), 2);
                assert!(matches!(&arms[0], Algebra::Extend { .. }));
            }
            other => panic!("expected union, got {other}"),
        }
    }

    #[test]
    fn values_becomes_union_of_binds() {
        let q = normalize_text(
            "SELECT ?x WHERE { ?x <http://example.org/p> ?v . VALUES ?v { 1 2 } }",
            &cfg(),
        )
        .unwrap();
        match &q.algebra {
            Algebra::Join(_, right) => match right.as_ref() {
                Algebra::Union(arms) => assert_eq!(arms.len(), 2),
                other => panic!("expected union of binds, got {other}"),
            },
            other => panic!("expected join, got {other}"),
        }
    }

    #[test]
    fn in_rewrites_to_disjunction() {
        let q = normalize_text(
            "SELECT ?x WHERE { ?x <http://example.org/p> ?v . FILTER(?v IN (1, 2, 3)) }",
            &cfg(),
        )
        .unwrap();
        match &q.algebra {
            Algebra::Filter { expr, .. } => match expr {
                Expr::Or(_, _) => {}
                other => panic!("expected disjunction, got {other}"),
            },
            other => panic!("expected filter, got {other}"),
        }
    }

    #[test]
    fn modifiers_are_stripped_into_post_processing() {
        let q = normalize_text(
            "SELECT DISTINCT ?s WHERE { ?s ?p ?o } ORDER BY DESC(?s) LIMIT 10 OFFSET 5",
            &cfg(),
        )
        .unwrap();
        assert!(q.post.distinct);
        assert_eq!(q.post.limit, Some(10));
        assert_eq!(q.post.offset, Some(5));
        assert_eq!(q.post.order_by.len(), 1);
        assert!(q.post.order_by[0].descending);
        // The algebra itself carries no modifier operators.
        assert!(matches!(q.algebra, Algebra::Bgp(_)));
    }

    #[test]
    fn unsupported_features_are_rejected() {
        let cases = [
            ("SELECT ?s WHERE { ?s ?p ?o . MINUS { ?s ?p 1 } }", "MINUS"),
            ("SELECT ?s WHERE { SERVICE <http://example.org/sparql> { ?s ?p ?o } }", "SERVICE"),
            ("SELECT (COUNT(?s) AS ?n) WHERE { ?s ?p ?o }", "aggregate"),
            ("SELECT ?s WHERE { ?s ?p ?o . FILTER EXISTS { ?s ?p 1 } }", "EXISTS"),
            ("SELECT ?s WHERE { { SELECT ?s WHERE { ?s ?p ?o } } }", "subquery"),
            ("CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }", "CONSTRUCT"),
            (
                "SELECT ?s WHERE { ?s ?p ?o . FILTER regex(str(?o), \"x\") }",
                "regex",
            ),
            (
                "SELECT ?o WHERE { <http://example.org/a> !<http://example.org/p> ?o }",
                "negated",
            ),
        ];
        for (query, why) in cases {
            match normalize_text(query, &cfg()) {
                Err(Error::UnsupportedFeature(msg)) => {
                    assert!(
                        msg.to_lowercase().contains(&why.to_lowercase()),
                        "query {query:?}: message {msg:?} should mention {why:?}"
                    );
                }
                other => panic!("query {query:?}: expected UnsupportedFeature, got {other:?}"),
            }
        }
    }

    #[test]
    fn blank_nodes_become_shared_fresh_variables() {
        let q = normalize_text(
            "SELECT ?n WHERE { _:x <http://example.org/name> ?n . _:x <http://example.org/age> 30 }",
            &cfg(),
        )
        .unwrap();
        match &q.algebra {
            Algebra::Bgp(patterns) => {
                let a = patterns[0].subject.as_var().unwrap();
                let b = patterns[1].subject.as_var().unwrap();
                assert_eq!(a, b);
                assert!(a.as_str().starts_with("__bn_"));
            }
            other => panic!("expected bgp, got {other}"),
        }
    }

    #[test]
    fn folding_is_idempotent_and_normalization_deterministic() {
        let text = "SELECT ?y WHERE { { <http://example.org/a> <http://example.org/p>* ?y } \
                    FILTER(1 < 2) }";
        let a = normalize_text(text, &cfg()).unwrap();
        let b = normalize_text(text, &cfg()).unwrap();
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(fold_fixpoint(a.algebra.clone()), a.algebra);
    }

    #[test]
    fn constant_filters_fold_away() {
        let q = normalize_text(
            "SELECT ?s WHERE { ?s ?p ?o . FILTER(3 >= 2) }",
            &cfg(),
        )
        .unwrap();
        assert!(matches!(q.algebra, Algebra::Bgp(_)));

        let q = normalize_text(
            "SELECT ?s WHERE { ?s ?p ?o . FILTER(1 = 2) }",
            &cfg(),
        )
        .unwrap();
        assert!(matches!(&q.algebra, Algebra::Union(arms) if arms.is_empty()));
    }

    #[test]
    fn noncanonical_integer_constants_fold_as_values() {
        let q = normalize_text(
            "SELECT ?s WHERE { ?s ?p ?o . FILTER(\"01\"^^<http://www.w3.org/2001/XMLSchema#integer> = 1) }",
            &cfg(),
        )
        .unwrap();
        assert!(matches!(q.algebra, Algebra::Bgp(_)));
    }
}
