//! Filter expression lowering (SPARQL expressions → predicate trees)
//!
//! `sameTerm` is field equality on whole encoded terms. `=` is value
//! equality: against a numeric/datetime/boolean constant it compares the
//! literal's hidden `special` coordinate (bound to the term by a
//! recomputed `h4`/`h2` decomposition and a datatype-class check);
//! everywhere else it falls back to encoded-term equality. Ordered
//! comparisons require numeric/datetime operands and compare `special`
//! values inside the signed range window.
//!
//! Predicates follow SPARQL effective-boolean-value semantics: evaluation
//! is tri-state and `&&`/`||` absorb errors exactly where the language
//! says they may. A statically erroneous expression lowers to the `Err`
//! leaf; a whole filter that is statically `Err` is a hard `TypeError`
//! (raised by the tree lowering), while an `Err` under a short-circuiting
//! boolean survives to run time.

#![forbid(unsafe_code)]

use oxrdf::vocab::{rdf, xsd};
use oxrdf::{Literal, NamedNode, Variable};

use crate::algebra::Expr;
use crate::encode::{
    classify_special, encode_literal, encode_string, signed_to_field, NumericClass, Special,
    TYPE_CODE_BLANK, TYPE_CODE_IRI, TYPE_CODE_LITERAL,
};
use crate::error::{Error, Result};
use crate::lower::{
    CmpOp, HiddenDecl, HiddenId, LiteralCoordKind, Lowering, Pred, TermCoordKind, ValueRef,
};
use crate::F;

/// Operand shapes after constant reduction.
enum Operand {
    Iri(NamedNode),
    Lit(Literal),
    /// A scoped variable and its representative.
    Bound { vref: ValueRef },
    /// `str(?v)` over a scoped variable.
    StrOf(ValueRef),
    /// `lang(?v)` over a scoped variable.
    LangOf(ValueRef),
    /// `datatype(?v)` over a scoped variable.
    DatatypeOf(ValueRef),
    /// Statically erroneous operand (e.g. a variable that is never in
    /// scope, or `lang()` of an IRI constant).
    Error,
}

impl Operand {
    fn rank(&self) -> u8 {
        match self {
            Operand::Iri(_) => 0,
            Operand::Lit(_) => 1,
            Operand::StrOf(_) => 2,
            Operand::LangOf(_) => 3,
            Operand::DatatypeOf(_) => 4,
            Operand::Bound { .. } => 5,
            Operand::Error => 6,
        }
    }
}

/// A comparison operand resolved to a window-signed value reference.
/// `term` carries the underlying term reference for variables, so class
/// constraints can be attached to the datatype coordinate.
enum NumOperand {
    Value {
        vref: ValueRef,
        class: Option<NumericClass>,
        term: Option<ValueRef>,
        side: Vec<Pred>,
    },
    Error,
}

impl Lowering<'_> {
    // ------------------------------- entry points -----------------------------

    /// Lower a boolean-position expression to a predicate.
    pub(crate) fn lower_filter(&mut self, e: &Expr) -> Result<Pred> {
        match e {
            Expr::Bool(b) => Ok(Pred::Bool(*b)),
            Expr::And(a, b) => Ok(Pred::And(
                Box::new(self.lower_filter(a)?),
                Box::new(self.lower_filter(b)?),
            )),
            Expr::Or(a, b) => Ok(Pred::Or(
                Box::new(self.lower_filter(a)?),
                Box::new(self.lower_filter(b)?),
            )),
            Expr::Not(a) => Ok(Pred::Not(Box::new(self.lower_filter(a)?))),
            Expr::Equal(a, b) => {
                let a = self.operand(a)?;
                let b = self.operand(b)?;
                self.lower_eq(a, b)
            }
            Expr::SameTerm(a, b) => {
                let a = self.operand(a)?;
                let b = self.operand(b)?;
                self.lower_same_term(a, b)
            }
            Expr::Less(a, b) => self.lower_cmp(CmpOp::Lt, a, b),
            Expr::LessEq(a, b) => self.lower_cmp(CmpOp::Le, a, b),
            Expr::Greater(a, b) => self.lower_cmp(CmpOp::Gt, a, b),
            Expr::GreaterEq(a, b) => self.lower_cmp(CmpOp::Ge, a, b),
            Expr::Bound(v) => Ok(self.lower_bound(v)),
            Expr::IsIri(a) => self.lower_is_type(a, TYPE_CODE_IRI),
            Expr::IsBlank(a) => self.lower_is_type(a, TYPE_CODE_BLANK),
            Expr::IsLiteral(a) => self.lower_is_type(a, TYPE_CODE_LITERAL),
            Expr::LangMatches(tag, range) => self.lower_lang_matches(tag, range),
            // A bare term in boolean position: its effective boolean value.
            Expr::Literal(l) => Ok(literal_ebv(self.config, l)),
            Expr::NamedNode(_) => Ok(Pred::Err),
            Expr::Var(v) => Err(Error::UnsupportedFeature(format!(
                "effective boolean value of a bare variable {v}"
            ))),
            Expr::Str(_) | Expr::Lang(_) | Expr::Datatype(_) => {
                match self.operand(e)? {
                    Operand::Lit(l) => Ok(literal_ebv(self.config, &l)),
                    Operand::Iri(_) => Ok(Pred::Err),
                    Operand::Error => Ok(Pred::Err),
                    _ => Err(Error::UnsupportedFeature(
                        "effective boolean value of a term coordinate".into(),
                    )),
                }
            }
        }
    }

    /// Lower a value-position expression (BIND / identity binds) to a
    /// value reference.
    pub(crate) fn lower_value(&mut self, e: &Expr) -> Result<ValueRef> {
        match e {
            Expr::NamedNode(n) => {
                let f = self.encode_iri(n);
                self.constants.insert(f, oxrdf::Term::NamedNode(n.clone()));
                Ok(ValueRef::Const(f))
            }
            Expr::Literal(l) => {
                let f = self.encode_lit(l)?;
                self.constants.insert(f, oxrdf::Term::Literal(l.clone()));
                Ok(ValueRef::Const(f))
            }
            Expr::Bool(b) => {
                let lit = Literal::new_typed_literal(if *b { "true" } else { "false" }, xsd::BOOLEAN);
                let f = self.encode_lit(&lit)?;
                self.constants.insert(f, oxrdf::Term::Literal(lit));
                Ok(ValueRef::Const(f))
            }
            Expr::Var(v) => match self.var_repr(v) {
                Some(state) => Ok(state.repr.clone()),
                None => Err(Error::TypeErr(format!("unbound variable {v} in a bind expression"))),
            },
            other => Err(Error::UnsupportedFeature(format!(
                "bind expression {other} is not a term or variable"
            ))),
        }
    }

    // --------------------------------- operands -------------------------------

    fn operand(&mut self, e: &Expr) -> Result<Operand> {
        let op = match e {
            Expr::NamedNode(n) => Operand::Iri(n.clone()),
            Expr::Literal(l) => Operand::Lit(l.clone()),
            Expr::Bool(b) => Operand::Lit(Literal::new_typed_literal(
                if *b { "true" } else { "false" },
                xsd::BOOLEAN,
            )),
            Expr::Var(v) => match self.var_repr(v) {
                Some(state) => Operand::Bound { vref: state.repr.clone() },
                None => Operand::Error,
            },
            Expr::Str(inner) => match self.operand(inner)? {
                Operand::Lit(l) => Operand::Lit(Literal::new_simple_literal(l.value())),
                Operand::Iri(n) => Operand::Lit(Literal::new_simple_literal(n.as_str())),
                Operand::Bound { vref } => Operand::StrOf(vref),
                _ => Operand::Error,
            },
            Expr::Lang(inner) => match self.operand(inner)? {
                Operand::Lit(l) => {
                    Operand::Lit(Literal::new_simple_literal(l.language().unwrap_or("")))
                }
                Operand::Bound { vref } => Operand::LangOf(vref),
                _ => Operand::Error,
            },
            Expr::Datatype(inner) => match self.operand(inner)? {
                Operand::Lit(l) => Operand::Iri(l.datatype().into_owned()),
                Operand::Bound { vref } => Operand::DatatypeOf(vref),
                _ => Operand::Error,
            },
            other => {
                return Err(Error::UnsupportedFeature(format!(
                    "expression {other} is not usable as a comparison operand"
                )))
            }
        };
        Ok(op)
    }

    fn encode_iri(&self, n: &NamedNode) -> F {
        self.oracle
            .h2(F::from(TYPE_CODE_IRI), encode_string(self.oracle, n.as_str()))
    }

    fn encode_lit(&self, l: &Literal) -> Result<F> {
        encode_literal(self.oracle, self.config, l.as_ref())
    }

    /// The four literal-coordinate hiddens of a term reference (shared
    /// across filters over the same variable).
    fn literal_coords_of(&mut self, vref: &ValueRef) -> [HiddenId; 4] {
        let ids = self.coord_hiddens(vref, 0, |cx| {
            [
                LiteralCoordKind::Value,
                LiteralCoordKind::Special,
                LiteralCoordKind::Lang,
                LiteralCoordKind::Datatype,
            ]
            .into_iter()
            .map(|coord| {
                cx.alloc_hidden(HiddenDecl::LiteralCoord { source: vref.clone(), coord })
            })
            .collect()
        });
        [ids[0], ids[1], ids[2], ids[3]]
    }

    fn term_coords_of(&mut self, vref: &ValueRef) -> (HiddenId, HiddenId) {
        let ids = self.coord_hiddens(vref, 1, |cx| {
            vec![
                cx.alloc_hidden(HiddenDecl::TermCoord {
                    source: vref.clone(),
                    coord: TermCoordKind::TypeCode,
                }),
                cx.alloc_hidden(HiddenDecl::TermCoord {
                    source: vref.clone(),
                    coord: TermCoordKind::Value,
                }),
            ]
        });
        (ids[0], ids[1])
    }

    fn decomp_pred(&mut self, vref: &ValueRef) -> (Pred, [HiddenId; 4]) {
        let coords = self.literal_coords_of(vref);
        (Pred::LiteralDecomp { term: vref.clone(), coords }, coords)
    }

    fn class_encodings(&self, class: NumericClass) -> Vec<F> {
        match class {
            NumericClass::Integer => INTEGER_DATATYPE_IRIS
                .iter()
                .map(|iri| encode_string(self.oracle, iri))
                .collect(),
            NumericClass::DateTime => vec![encode_string(self.oracle, xsd::DATE_TIME.as_str())],
            NumericClass::Other => Vec::new(),
        }
    }

    fn comparable_class_encodings(&self) -> Vec<F> {
        let mut out = self.class_encodings(NumericClass::Integer);
        out.extend(self.class_encodings(NumericClass::DateTime));
        out
    }

    /// Datatype encodings of the recognized string class: `xsd:string`
    /// and `rdf:langString`.
    fn string_class_encodings(&self) -> Vec<F> {
        vec![
            encode_string(self.oracle, xsd::STRING.as_str()),
            encode_string(self.oracle, rdf::LANG_STRING.as_str()),
        ]
    }

    // -------------------------------- equality --------------------------------

    fn lower_eq(&mut self, a: Operand, b: Operand) -> Result<Pred> {
        let (a, b) = if a.rank() <= b.rank() { (a, b) } else { (b, a) };
        let pred = match (a, b) {
            (Operand::Error, _) | (_, Operand::Error) => Pred::Err,

            (Operand::Iri(x), Operand::Iri(y)) => Pred::Bool(x == y),
            // An IRI is never value-equal to a literal.
            (Operand::Iri(_), Operand::Lit(_)) => Pred::Bool(false),
            (Operand::Iri(n), Operand::Bound { vref }) => {
                Pred::Eq(vref, ValueRef::Const(self.encode_iri(&n)))
            }
            // str() yields a literal; comparing it to an IRI is false.
            (Operand::Iri(_), Operand::StrOf(_)) | (Operand::Iri(_), Operand::LangOf(_)) => {
                Pred::Bool(false)
            }
            (Operand::Iri(n), Operand::DatatypeOf(vref)) => {
                let (decomp, coords) = self.decomp_pred(&vref);
                let target = encode_string(self.oracle, n.as_str());
                Pred::And(
                    Box::new(decomp),
                    Box::new(Pred::Eq(ValueRef::Hidden(coords[3]), ValueRef::Const(target))),
                )
            }

            (Operand::Lit(x), Operand::Lit(y)) => self.static_literal_eq(&x, &y)?,
            (Operand::Lit(l), Operand::Bound { vref }) => self.literal_var_eq(&l, &vref)?,
            (Operand::Lit(l), Operand::StrOf(vref)) => {
                if l.datatype() != xsd::STRING {
                    Pred::Err
                } else {
                    let (decomp, coords) = self.decomp_pred(&vref);
                    let target = encode_string(self.oracle, l.value());
                    Pred::And(
                        Box::new(decomp),
                        Box::new(Pred::Eq(ValueRef::Hidden(coords[0]), ValueRef::Const(target))),
                    )
                }
            }
            (Operand::Lit(l), Operand::LangOf(vref)) => {
                if l.datatype() != xsd::STRING {
                    Pred::Err
                } else {
                    let (decomp, coords) = self.decomp_pred(&vref);
                    let tag = if self.config.fold_language_case {
                        l.value().to_ascii_lowercase()
                    } else {
                        l.value().to_string()
                    };
                    let target = encode_string(self.oracle, &tag);
                    Pred::And(
                        Box::new(decomp),
                        Box::new(Pred::Eq(ValueRef::Hidden(coords[2]), ValueRef::Const(target))),
                    )
                }
            }
            (Operand::Lit(_), Operand::DatatypeOf(_)) => Pred::Bool(false),

            (Operand::StrOf(a), Operand::StrOf(b)) => self.coord_pair_eq(&a, &b, 0),
            (Operand::LangOf(a), Operand::LangOf(b)) => self.coord_pair_eq(&a, &b, 2),
            (Operand::DatatypeOf(a), Operand::DatatypeOf(b)) => self.coord_pair_eq(&a, &b, 3),
            (Operand::StrOf(coord), Operand::Bound { .. })
            | (Operand::LangOf(coord), Operand::Bound { .. })
            | (Operand::DatatypeOf(coord), Operand::Bound { .. }) => {
                let _ = coord;
                return Err(Error::UnsupportedFeature(
                    "comparing a term coordinate against a whole term".into(),
                ));
            }
            (Operand::StrOf(_), Operand::LangOf(_))
            | (Operand::StrOf(_), Operand::DatatypeOf(_))
            | (Operand::LangOf(_), Operand::DatatypeOf(_)) => {
                return Err(Error::UnsupportedFeature(
                    "comparing term coordinates of different kinds".into(),
                ))
            }

            (Operand::Bound { vref: a }, Operand::Bound { vref: b }) => Pred::Eq(a, b),

            // The rank ordering above means any remaining pair is just
            // the mirrored form.
            (a, b) => return self.lower_eq(b, a),
        };
        Ok(pred)
    }

    fn coord_pair_eq(&mut self, a: &ValueRef, b: &ValueRef, idx: usize) -> Pred {
        let (da, ca) = self.decomp_pred(a);
        let (db, cb) = self.decomp_pred(b);
        Pred::And(
            Box::new(Pred::And(Box::new(da), Box::new(db))),
            Box::new(Pred::Eq(ValueRef::Hidden(ca[idx]), ValueRef::Hidden(cb[idx]))),
        )
    }

    /// Value equality between two constant literals.
    fn static_literal_eq(&self, x: &Literal, y: &Literal) -> Result<Pred> {
        if x == y {
            return Ok(Pred::Bool(true));
        }
        let sx = classify_special(self.config, x.as_ref());
        let sy = classify_special(self.config, y.as_ref());
        Ok(match (sx, sy) {
            (Ok(Special::Numeric(a)), Ok(Special::Numeric(b))) => Pred::Bool(a == b),
            (Ok(Special::DateTime(a)), Ok(Special::DateTime(b))) => Pred::Bool(a == b),
            (Ok(Special::Bool(a)), Ok(Special::Bool(b))) => Pred::Bool(a == b),
            (Ok(Special::Text), Ok(Special::Text)) => {
                let known = |l: &Literal| {
                    l.datatype() == xsd::STRING || l.language().is_some()
                };
                if known(x) && known(y) {
                    // Strings and language-tagged strings compare by
                    // (value, lang); anything unequal here is plain false.
                    Pred::Bool(false)
                } else {
                    // Distinct lexicals under unknown datatypes: type error.
                    Pred::Err
                }
            }
            // Mixed classes (e.g. a number against a string): type error.
            _ => Pred::Err,
        })
    }

    /// `=` between a constant literal and a variable.
    fn literal_var_eq(&mut self, l: &Literal, vref: &ValueRef) -> Result<Pred> {
        let special = classify_special(self.config, l.as_ref())?;
        let (class, target) = match special {
            Special::Numeric(v) => (NumericClass::Integer, signed_to_field(v)),
            Special::DateTime(v) => (NumericClass::DateTime, signed_to_field(v)),
            Special::Bool(b) => {
                // Booleans compare by value through `special` as well.
                let (decomp, coords) = self.decomp_pred(vref);
                let class = vec![encode_string(self.oracle, xsd::BOOLEAN.as_str())];
                return Ok(Pred::And(
                    Box::new(Pred::And(
                        Box::new(decomp),
                        Box::new(Pred::ClassOf {
                            coord: ValueRef::Hidden(coords[3]),
                            classes: class,
                        }),
                    )),
                    Box::new(Pred::Eq(
                        ValueRef::Hidden(coords[1]),
                        ValueRef::Const(F::from(b as u64)),
                    )),
                ));
            }
            Special::Text => {
                // Value equality starts from term identity, but the
                // mismatch side must follow the same typing rules as the
                // constant-constant case: a recognized string-class
                // literal compares plain false, anything else (an
                // unrecognized datatype in either operand) is a type
                // error the EBV context may absorb.
                let exact = Pred::Eq(vref.clone(), ValueRef::Const(self.encode_lit(l)?));
                let known = l.datatype() == xsd::STRING || l.language().is_some();
                let mismatch = if known {
                    let (decomp, coords) = self.decomp_pred(vref);
                    Pred::And(
                        Box::new(decomp),
                        Box::new(Pred::Not(Box::new(Pred::ClassOf {
                            coord: ValueRef::Hidden(coords[3]),
                            classes: self.string_class_encodings(),
                        }))),
                    )
                } else {
                    Pred::Err
                };
                return Ok(Pred::Or(Box::new(exact), Box::new(mismatch)));
            }
        };
        let (decomp, coords) = self.decomp_pred(vref);
        let classes = self.class_encodings(class);
        Ok(Pred::And(
            Box::new(Pred::And(
                Box::new(decomp),
                Box::new(Pred::ClassOf { coord: ValueRef::Hidden(coords[3]), classes }),
            )),
            Box::new(Pred::Eq(ValueRef::Hidden(coords[1]), ValueRef::Const(target))),
        ))
    }

    fn lower_same_term(&mut self, a: Operand, b: Operand) -> Result<Pred> {
        let (a, b) = if a.rank() <= b.rank() { (a, b) } else { (b, a) };
        Ok(match (a, b) {
            (Operand::Error, _) | (_, Operand::Error) => Pred::Err,
            (Operand::Iri(x), Operand::Iri(y)) => Pred::Bool(x == y),
            (Operand::Lit(x), Operand::Lit(y)) => Pred::Bool(x == y),
            (Operand::Iri(_), Operand::Lit(_)) => Pred::Bool(false),
            (Operand::Iri(n), Operand::Bound { vref }) => {
                Pred::Eq(vref, ValueRef::Const(self.encode_iri(&n)))
            }
            (Operand::Lit(l), Operand::Bound { vref }) => {
                Pred::Eq(vref, ValueRef::Const(self.encode_lit(&l)?))
            }
            (Operand::Bound { vref: a }, Operand::Bound { vref: b }) => Pred::Eq(a, b),
            (a, b) => return self.lower_eq(a, b),
        })
    }

    // ------------------------------- comparisons ------------------------------

    fn lower_cmp(&mut self, op: CmpOp, a: &Expr, b: &Expr) -> Result<Pred> {
        let a = self.operand(a)?;
        let b = self.operand(b)?;
        let na = self.numeric_operand(a)?;
        let nb = self.numeric_operand(b)?;
        let (NumOperand::Value { vref: va, class: ca, term: ta, side: sa },
             NumOperand::Value { vref: vb, class: cb, term: tb, side: sb }) = (na, nb)
        else {
            return Ok(Pred::Err);
        };

        let mut side = sa;
        side.extend(sb);

        // Datatype-class compatibility: a variable side must carry a
        // datatype from the other side's class, or (when both sides are
        // variables) from the comparable union.
        match (ca, cb) {
            (Some(x), Some(y)) if x != y => return Ok(Pred::Err),
            (Some(_), Some(_)) => {}
            (Some(known), None) => {
                if let Some(term) = &tb {
                    side.push(self.class_constraint(term, Some(known)));
                }
            }
            (None, Some(known)) => {
                if let Some(term) = &ta {
                    side.push(self.class_constraint(term, Some(known)));
                }
            }
            (None, None) => {
                if let Some(term) = &ta {
                    side.push(self.class_constraint(term, None));
                }
                if let Some(term) = &tb {
                    side.push(self.class_constraint(term, None));
                }
            }
        }

        let mut pred = Pred::Cmp { op, a: va, b: vb };
        for s in side.into_iter().rev() {
            pred = Pred::And(Box::new(s), Box::new(pred));
        }
        Ok(pred)
    }

    /// Constrain the datatype coordinate of the term at `term` to a class.
    fn class_constraint(&mut self, term: &ValueRef, class: Option<NumericClass>) -> Pred {
        let coords = self.literal_coords_of(term);
        let classes = match class {
            Some(c) => self.class_encodings(c),
            None => self.comparable_class_encodings(),
        };
        Pred::ClassOf { coord: ValueRef::Hidden(coords[3]), classes }
    }

    fn numeric_operand(&mut self, op: Operand) -> Result<NumOperand> {
        Ok(match op {
            Operand::Lit(l) => match classify_special(self.config, l.as_ref())? {
                Special::Numeric(v) => NumOperand::Value {
                    vref: ValueRef::Const(signed_to_field(v)),
                    class: Some(NumericClass::Integer),
                    term: None,
                    side: Vec::new(),
                },
                Special::DateTime(v) => NumOperand::Value {
                    vref: ValueRef::Const(signed_to_field(v)),
                    class: Some(NumericClass::DateTime),
                    term: None,
                    side: Vec::new(),
                },
                _ => NumOperand::Error,
            },
            Operand::Bound { vref } => {
                let (decomp, coords) = self.decomp_pred(&vref);
                NumOperand::Value {
                    vref: ValueRef::Hidden(coords[1]),
                    class: None,
                    term: Some(vref),
                    side: vec![decomp],
                }
            }
            _ => NumOperand::Error,
        })
    }
}

/// Integer-family datatype IRIs (xsd:integer and subtypes).
const INTEGER_DATATYPE_IRIS: &[&str] = &[
    "http://www.w3.org/2001/XMLSchema#integer",
    "http://www.w3.org/2001/XMLSchema#long",
    "http://www.w3.org/2001/XMLSchema#int",
    "http://www.w3.org/2001/XMLSchema#short",
    "http://www.w3.org/2001/XMLSchema#byte",
    "http://www.w3.org/2001/XMLSchema#nonNegativeInteger",
    "http://www.w3.org/2001/XMLSchema#positiveInteger",
    "http://www.w3.org/2001/XMLSchema#nonPositiveInteger",
    "http://www.w3.org/2001/XMLSchema#negativeInteger",
    "http://www.w3.org/2001/XMLSchema#unsignedLong",
    "http://www.w3.org/2001/XMLSchema#unsignedInt",
    "http://www.w3.org/2001/XMLSchema#unsignedShort",
    "http://www.w3.org/2001/XMLSchema#unsignedByte",
];

/// Effective boolean value of a constant literal.
fn literal_ebv(config: &crate::config::ProofConfig, l: &Literal) -> Pred {
    match classify_special(config, l.as_ref()) {
        Ok(Special::Bool(b)) => Pred::Bool(b),
        Ok(Special::Numeric(v)) => Pred::Bool(v != 0),
        Ok(Special::Text) if l.datatype() == xsd::STRING => Pred::Bool(!l.value().is_empty()),
        _ => Pred::Err,
    }
}

impl Lowering<'_> {
    fn lower_bound(&mut self, v: &Variable) -> Pred {
        match self.var_repr(v) {
            Some(state) if state.nullable => {
                let repr = state.repr.clone();
                Pred::Not(Box::new(Pred::Eq(repr, ValueRef::Unbound)))
            }
            Some(_) => Pred::Bool(true),
            None => Pred::Bool(false),
        }
    }

    fn lower_is_type(&mut self, inner: &Expr, code: u64) -> Result<Pred> {
        Ok(match self.operand(inner)? {
            Operand::Iri(_) => Pred::Bool(code == TYPE_CODE_IRI),
            Operand::Lit(_) => Pred::Bool(code == TYPE_CODE_LITERAL),
            Operand::StrOf(_) | Operand::LangOf(_) => Pred::Bool(code == TYPE_CODE_LITERAL),
            Operand::DatatypeOf(_) => Pred::Bool(code == TYPE_CODE_IRI),
            Operand::Error => Pred::Err,
            Operand::Bound { vref } => {
                let (type_code, value) = self.term_coords_of(&vref);
                Pred::And(
                    Box::new(Pred::TermDecomp { term: vref, type_code, value }),
                    Box::new(Pred::Eq(
                        ValueRef::Hidden(type_code),
                        ValueRef::Const(F::from(code)),
                    )),
                )
            }
        })
    }

    fn lower_lang_matches(&mut self, tag: &Expr, range: &Expr) -> Result<Pred> {
        let range = match self.operand(range)? {
            Operand::Lit(l) if l.datatype() == xsd::STRING => l.value().to_string(),
            _ => {
                return Err(Error::UnsupportedFeature(
                    "langMatches with a non-constant range".into(),
                ))
            }
        };
        match self.operand(tag)? {
            Operand::Lit(l) if l.datatype() == xsd::STRING => {
                let tag = l.value();
                Ok(Pred::Bool(if range == "*" {
                    !tag.is_empty()
                } else {
                    tag.eq_ignore_ascii_case(&range)
                }))
            }
            Operand::LangOf(vref) => {
                let (decomp, coords) = self.decomp_pred(&vref);
                let lang_coord = ValueRef::Hidden(coords[2]);
                let pred = if range == "*" {
                    Pred::Not(Box::new(Pred::Eq(
                        lang_coord,
                        ValueRef::Const(encode_string(self.oracle, "")),
                    )))
                } else {
                    let tag = if self.config.fold_language_case {
                        range.to_ascii_lowercase()
                    } else {
                        range
                    };
                    Pred::Eq(lang_coord, ValueRef::Const(encode_string(self.oracle, &tag)))
                };
                Ok(Pred::And(Box::new(decomp), Box::new(pred)))
            }
            Operand::Error => Ok(Pred::Err),
            _ => Err(Error::UnsupportedFeature(
                "langMatches over a non-language expression".into(),
            )),
        }
    }
}
