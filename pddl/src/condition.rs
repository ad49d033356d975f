use crate::*;
use smallvec::SmallVec;

/// Argument of a ground atom.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Index into the enclosing scope: action parameters are numbered
    /// `0..k-1`, parameters of inner `exists`/`forall` are appended in
    /// lexical order.
    Param(u32),
    /// A constant object, by name.
    Object(Sym),
}

impl Term {
    pub fn param(&self) -> Option<u32> {
        match self {
            Term::Param(i) => Some(*i),
            Term::Object(_) => None,
        }
    }
}

/// Builds the argument list `?0 ?1 ... ?(range.end-1)` starting at `range.start`.
pub fn params(range: std::ops::Range<u32>) -> SmallVec<[Term; 4]> {
    range.map(Term::Param).collect()
}

/// An instantiation of a lifted predicate.
///
/// The predicate is referenced both by name and by index: the index is `None`
/// while the ground waits for the declaration of a matching action (serial
/// multi-agent domains allow preconditions to reference actions declared
/// later).
#[derive(Debug, Clone, PartialEq)]
pub struct Ground {
    pub name: Sym,
    pub pred: Option<PredId>,
    pub args: SmallVec<[Term; 4]>,
}

impl Ground {
    pub fn new(name: impl Into<Sym>, pred: PredId, args: SmallVec<[Term; 4]>) -> Self {
        Ground {
            name: name.into(),
            pred: Some(pred),
            args,
        }
    }

    /// Deep copy re-bound against `target`'s predicate table.
    pub fn copied_into(&self, target: &Domain) -> Result<Ground, SymbolError> {
        let pred = target
            .preds
            .index_of(self.name.canonical_str())
            .ok_or_else(|| SymbolError::unknown(SymbolKind::Predicate, &self.name))?;
        Ok(Ground {
            name: self.name.clone(),
            pred: Some(pred),
            args: self.args.clone(),
        })
    }
}

/// Parameters introduced by an `exists` or `forall` wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantifier {
    pub params: Vec<TypeId>,
    pub body: Box<Condition>,
}

/// Right-hand side of an `increase` effect.
#[derive(Debug, Clone, PartialEq)]
pub enum IncreaseAmount {
    Int(i64),
    Real(f64),
    Func(GroundFunc),
}

/// A reference to a numeric function with bound arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundFunc {
    pub name: Sym,
    pub func: Option<FuncId>,
    pub args: SmallVec<[Term; 4]>,
}

/// `(increase (f args) amount)` effect, used for action costs.
#[derive(Debug, Clone, PartialEq)]
pub struct Increase {
    pub func: GroundFunc,
    pub amount: IncreaseAmount,
}

/// An immutable logical expression over ground atoms.
///
/// Conditions are owned by their enclosing action (or goal); copies are deep
/// and re-bind lifted references against the target environment.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Exists(Quantifier),
    Forall(Quantifier),
    When(Box<Condition>, Box<Condition>),
    Ground(Ground),
    Equals(Term, Term),
    Increase(Increase),
}

impl Condition {
    pub fn and() -> Condition {
        Condition::And(Vec::new())
    }

    pub fn not(c: Condition) -> Condition {
        Condition::Not(Box::new(c))
    }

    pub fn as_and(&self) -> Option<&[Condition]> {
        match self {
            Condition::And(cs) => Some(cs.as_slice()),
            _ => None,
        }
    }

    pub fn as_ground(&self) -> Option<&Ground> {
        match self {
            Condition::Ground(g) => Some(g),
            _ => None,
        }
    }

    /// Appends a conjunct; the receiver must be an `And`.
    pub fn add(&mut self, c: Condition) {
        match self {
            Condition::And(cs) => cs.push(c),
            _ => unreachable!("conjunction expected"),
        }
    }

    /// Deep copy re-bound against `target`: every ground's predicate (and
    /// every increase's function) is looked up by name in the target's
    /// tables. Fails if a name is absent from the target.
    pub fn copied_into(&self, target: &Domain) -> Result<Condition, SymbolError> {
        let copied = match self {
            Condition::And(cs) => {
                let mut copies = Vec::with_capacity(cs.len());
                for c in cs {
                    copies.push(c.copied_into(target)?);
                }
                Condition::And(copies)
            }
            Condition::Or(a, b) => Condition::Or(
                Box::new(a.copied_into(target)?),
                Box::new(b.copied_into(target)?),
            ),
            Condition::Not(c) => Condition::not(c.copied_into(target)?),
            Condition::Exists(q) => Condition::Exists(Quantifier {
                params: q.params.clone(),
                body: Box::new(q.body.copied_into(target)?),
            }),
            Condition::Forall(q) => Condition::Forall(Quantifier {
                params: q.params.clone(),
                body: Box::new(q.body.copied_into(target)?),
            }),
            Condition::When(pars, body) => Condition::When(
                Box::new(pars.copied_into(target)?),
                Box::new(body.copied_into(target)?),
            ),
            Condition::Ground(g) => Condition::Ground(g.copied_into(target)?),
            Condition::Equals(a, b) => Condition::Equals(a.clone(), b.clone()),
            Condition::Increase(inc) => {
                let func = target
                    .funcs
                    .index_of(inc.func.name.canonical_str())
                    .ok_or_else(|| SymbolError::unknown(SymbolKind::Function, &inc.func.name))?;
                Condition::Increase(Increase {
                    func: GroundFunc {
                        name: inc.func.name.clone(),
                        func: Some(func),
                        args: inc.func.args.clone(),
                    },
                    amount: inc.amount.clone(),
                })
            }
        };
        Ok(copied)
    }

    /// Pre-order mutable visit of every predicate ground in the tree
    /// (`increase` effects reference functions and are skipped).
    pub fn for_each_ground_mut(&mut self, f: &mut impl FnMut(&mut Ground)) {
        match self {
            Condition::And(cs) => {
                for c in cs {
                    c.for_each_ground_mut(f);
                }
            }
            Condition::Or(a, b) => {
                a.for_each_ground_mut(f);
                b.for_each_ground_mut(f);
            }
            Condition::Not(c) => c.for_each_ground_mut(f),
            Condition::Exists(q) | Condition::Forall(q) => q.body.for_each_ground_mut(f),
            Condition::When(pars, body) => {
                pars.for_each_ground_mut(f);
                body.for_each_ground_mut(f);
            }
            Condition::Ground(g) => f(g),
            Condition::Equals(_, _) | Condition::Increase(_) => {}
        }
    }

    /// Pre-order immutable visit of every predicate ground.
    pub fn for_each_ground(&self, f: &mut impl FnMut(&Ground)) {
        match self {
            Condition::And(cs) => {
                for c in cs {
                    c.for_each_ground(f);
                }
            }
            Condition::Or(a, b) => {
                a.for_each_ground(f);
                b.for_each_ground(f);
            }
            Condition::Not(c) => c.for_each_ground(f),
            Condition::Exists(q) | Condition::Forall(q) => q.body.for_each_ground(f),
            Condition::When(pars, body) => {
                pars.for_each_ground(f);
                body.for_each_ground(f);
            }
            Condition::Ground(g) => f(g),
            Condition::Equals(_, _) | Condition::Increase(_) => {}
        }
    }
}
