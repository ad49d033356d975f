//! Partitioning of an action's precondition into positive-concurrency,
//! negative-concurrency and normal buckets.
//!
//! Every ground atom is inspected exactly once. Atoms that only use action
//! parameters are stored verbatim; atoms that mention a parameter introduced
//! by an enclosing quantifier are re-emitted under a minimal rebuilt wrapper
//! chain (empty replicas for `forall`, whole copies for `exists`).
//!
//! Concurrency atoms are copied against the source environment (their
//! `ACTIVE-`/`REQ-NEG-` replacements only exist after synthesis); normal
//! atoms are copied against the target environment. The synthesiser always
//! rewrites copies of the stored conditions, never the stored conditions
//! themselves, so one bucket can feed several synthesised actions.

use mapddl::*;

/// Category of a ground atom: `1`/`-1` for a (negated) concurrency atom,
/// `2`/`-2` for a (negated) normal atom. `0` marks a wrapper with no ground
/// inside, which is dropped.
type GroundType = i8;

/// The classified precondition of one source action.
#[derive(Debug, Default)]
pub struct Classification {
    pub num_action_params: u32,
    /// Conditions free of concurrency constraints.
    pub normal: Vec<Condition>,
    /// Conditions with a dominant negative concurrency atom.
    pub neg_concurrency: Vec<Condition>,
    /// Conditions with a dominant positive concurrency atom.
    pub pos_concurrency: Vec<Condition>,
}

/// Sorts every ground atom of the action's precondition into one of the
/// three buckets. The classification is a pure function of its inputs:
/// re-running it yields identical vectors.
pub fn classify(source: &Domain, target: &Domain, action: &Action) -> Res<Classification> {
    let mut walker = Walker {
        source,
        target,
        num_action_params: action.params.len() as u32,
        frames: Vec::new(),
        checked: Default::default(),
        out: Classification {
            num_action_params: action.params.len() as u32,
            ..Default::default()
        },
    };
    if let Some(pre) = &action.pre {
        walker.visit(pre)?;
    }
    Ok(walker.out)
}

/// An enclosing quantifier and the parameter indices it introduces.
struct Frame<'a> {
    cond: &'a Condition,
    first: u32,
    count: u32,
}

struct Walker<'a> {
    source: &'a Domain,
    target: &'a Domain,
    num_action_params: u32,
    frames: Vec<Frame<'a>>,
    /// Quantifiers already copied wholesale; their atoms must not be
    /// re-emitted. Keyed by node address, stable while the tree is borrowed.
    checked: hashbrown::HashSet<usize>,
    out: Classification,
}

fn addr(cond: &Condition) -> usize {
    std::ptr::from_ref(cond) as usize
}

impl<'a> Walker<'a> {
    fn is_concurrency(&self, g: &Ground) -> bool {
        self.source.cpreds.contains(g.name.canonical_str())
    }

    fn next_param(&self) -> u32 {
        self.num_action_params + self.frames.iter().map(|f| f.count).sum::<u32>()
    }

    fn visit(&mut self, cond: &'a Condition) -> Res<()> {
        match cond {
            Condition::And(conjuncts) => {
                for c in conjuncts {
                    self.visit(c)?;
                }
            }
            Condition::Exists(q) | Condition::Forall(q) => {
                self.frames.push(Frame {
                    cond,
                    first: self.next_param(),
                    count: q.params.len() as u32,
                });
                self.visit(&q.body)?;
                self.frames.pop();
            }
            Condition::Ground(g) => {
                let category = if self.is_concurrency(g) { 1 } else { 2 };
                self.classify_ground(g, category)?;
            }
            Condition::Not(inner) => {
                if let Condition::Ground(g) = inner.as_ref() {
                    let category = if self.is_concurrency(g) { -1 } else { -2 };
                    self.classify_ground(g, category)?;
                } else {
                    self.visit(inner)?;
                }
            }
            // disjunctions, conditional effects and numeric constructs do not
            // take part in the concurrency encoding
            Condition::Or(_, _) | Condition::When(_, _) | Condition::Equals(_, _) | Condition::Increase(_) => {}
        }
        Ok(())
    }

    /// The quantifier introducing the given (non-action) parameter.
    fn frame_of(&self, param: u32) -> &Frame<'a> {
        self.frames
            .iter()
            .find(|f| param >= f.first && param < f.first + f.count)
            .unwrap_or_else(|| unreachable!("parameter {param} has no declaring quantifier"))
    }

    /// True when the atom lives inside a quantifier that was already copied
    /// wholesale into a bucket.
    fn is_ground_classified(&self, g: &Ground) -> bool {
        g.args.iter().filter_map(Term::param).any(|p| {
            p >= self.num_action_params && self.checked.contains(&addr(self.frame_of(p).cond))
        })
    }

    /// The quantifiers the atom depends on, outward-to-inward: sorting the
    /// atom's parameter ids numerically makes successive non-action ids pick
    /// out their declaring quantifiers in nesting order.
    fn nested_conditions(&self, g: &Ground) -> Vec<&'a Condition> {
        let sorted: std::collections::BTreeSet<u32> = g.args.iter().filter_map(Term::param).collect();
        let mut nested: Vec<&'a Condition> = Vec::new();
        for param in sorted {
            if param >= self.num_action_params {
                let cond = self.frame_of(param).cond;
                if nested.last().map(|&c| addr(c)) != Some(addr(cond)) {
                    nested.push(cond);
                }
            }
        }
        nested
    }

    fn classify_ground(&mut self, g: &Ground, category: GroundType) -> Res<()> {
        if self.is_ground_classified(g) {
            return Ok(());
        }
        let nested = self.nested_conditions(g);
        if nested.is_empty() {
            let cond = self.make_atom(g, category)?;
            self.bucket(category).push(cond);
        } else {
            let (cond, category) = self.build_chain(&nested, g, category)?;
            match category {
                -2 | 2 => self.out.normal.push(cond),
                -1 => self.out.neg_concurrency.push(cond),
                1 => self.out.pos_concurrency.push(cond),
                _ => {} // wrapper without any ground, nothing to require
            }
        }
        Ok(())
    }

    fn bucket(&mut self, category: GroundType) -> &mut Vec<Condition> {
        match category {
            -1 => &mut self.out.neg_concurrency,
            1 => &mut self.out.pos_concurrency,
            _ => &mut self.out.normal,
        }
    }

    /// The atom as stored in a bucket: negated normal atoms keep their
    /// negation, concurrency atoms are stored positively (the synthesiser
    /// adds the polarity during rewriting).
    fn make_atom(&self, g: &Ground, category: GroundType) -> Res<Condition> {
        let cond = match category {
            -2 => Condition::not(Condition::Ground(g.copied_into(self.target)?)),
            2 => Condition::Ground(g.copied_into(self.target)?),
            -1 | 1 => Condition::Ground(g.copied_into(self.source)?),
            _ => unreachable!("atoms always carry a category"),
        };
        Ok(cond)
    }

    /// Rebuilds the minimal wrapper chain around the atom.
    ///
    /// `forall` wrappers are replicated empty and nested in order; an
    /// `exists` wrapper is copied with its whole body (which may change the
    /// dominant category) and terminates the chain.
    fn build_chain(&mut self, chain: &[&'a Condition], g: &Ground, category: GroundType) -> Res<(Condition, GroundType)> {
        match chain[0] {
            Condition::Forall(q) => {
                let (inner, category) = if chain.len() > 1 {
                    self.build_chain(&chain[1..], g, category)?
                } else {
                    (self.make_atom(g, category)?, category)
                };
                let forall = Condition::Forall(Quantifier {
                    params: q.params.clone(),
                    body: Box::new(Condition::And(vec![inner])),
                });
                Ok((forall, category))
            }
            exists @ Condition::Exists(q) => {
                self.checked.insert(addr(exists));
                let copied = if matches!(q.body.as_ref(), Condition::And(_)) {
                    exists.copied_into(self.source).map_err(Message::from)?
                } else {
                    Condition::Exists(Quantifier {
                        params: q.params.clone(),
                        body: Box::new(Condition::And(vec![q.body.copied_into(self.source)?])),
                    })
                };
                // a concurrency atom anywhere inside the copied body can
                // promote the whole wrapper to a concurrency bucket
                let category = if category == -1 || category == 1 {
                    category
                } else {
                    dominant_ground_type(self.source, exists)
                };
                Ok((copied, category))
            }
            other => unreachable!("non-quantifier in a wrapper chain: {other:?}"),
        }
    }
}

/// The strongest category of any ground atom inside the condition, with
/// precedence `-1 > 1 > -2 > 2` (and `0` when no atom occurs).
fn dominant_ground_type(d: &Domain, cond: &Condition) -> GroundType {
    fn rank(t: GroundType) -> u8 {
        match t {
            -1 => 4,
            1 => 3,
            -2 => 2,
            2 => 1,
            _ => 0,
        }
    }
    fn go(d: &Domain, cond: &Condition, best: &mut GroundType) {
        if *best == -1 {
            return; // nothing outranks a negative concurrency atom
        }
        let mut consider = |t: GroundType, best: &mut GroundType| {
            if rank(t) > rank(*best) {
                *best = t;
            }
        };
        match cond {
            Condition::And(cs) => {
                for c in cs {
                    go(d, c, best);
                }
            }
            Condition::Exists(q) | Condition::Forall(q) => go(d, &q.body, best),
            Condition::Not(inner) => {
                if let Condition::Ground(g) = inner.as_ref() {
                    let t = if d.cpreds.contains(g.name.canonical_str()) { -1 } else { -2 };
                    consider(t, best);
                } else {
                    go(d, inner, best);
                }
            }
            Condition::Ground(g) => {
                let t = if d.cpreds.contains(g.name.canonical_str()) { 1 } else { 2 };
                consider(t, best);
            }
            Condition::Or(_, _) | Condition::When(_, _) | Condition::Equals(_, _) | Condition::Increase(_) => {}
        }
    }
    let mut best = 0;
    go(d, cond, &mut best);
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapddl::parser::parse_pddl_domain;

    fn load(src: &str) -> Domain {
        let parsed = parse_pddl_domain(Input::from_string(src)).unwrap();
        build_concurrency_domain(&parsed).unwrap()
    }

    /// A target environment carrying the source's non-concurrency predicates.
    fn target_for(d: &Domain) -> Domain {
        let mut target = Domain::new(d.name.clone());
        target.types = d.types.clone();
        for (id, pred) in d.preds.iter_with_id() {
            if d.cpreds.iter().all(|c| c != id) {
                target
                    .create_predicate(pred.name.clone(), &d.type_names(&pred.params))
                    .unwrap();
            }
        }
        target
    }

    fn quantified_fixture() -> Domain {
        load(
            "(define (domain t)
                (:requirements :strips :typing :multi-agent)
                (:types unit - object)
                (:predicates (normal ?y - unit ?a - unit))
                (:action conc
                    :agent ?a - unit
                    :parameters ()
                    :precondition ()
                    :effect (and (normal ?a ?a)))
                (:action conc2
                    :agent ?a - unit
                    :parameters (?b - unit)
                    :precondition ()
                    :effect (and (normal ?b ?a)))
                (:action test
                    :agent ?a - unit
                    :parameters ()
                    :precondition (and
                        (forall (?x - unit) (and (conc ?x) (not (conc2 ?x ?a))))
                        (exists (?y - unit) (and (normal ?y ?a))))
                    :effect (and (normal ?a ?a))))",
        )
    }

    #[test]
    fn quantified_preconditions_split_into_all_three_buckets() {
        let d = quantified_fixture();
        let target = target_for(&d);
        let action = d.actions.get(d.actions.index_of("TEST").unwrap()).clone();
        let classif = classify(&d, &target, &action).unwrap();

        assert_eq!(classif.pos_concurrency.len(), 1);
        assert_eq!(classif.neg_concurrency.len(), 1);
        assert_eq!(classif.normal.len(), 1);

        // positive bucket: an empty forall replica around `(conc ?x)`
        match &classif.pos_concurrency[0] {
            Condition::Forall(q) => match q.body.as_ref() {
                Condition::And(cs) => {
                    assert_eq!(cs.len(), 1);
                    let g = cs[0].as_ground().unwrap();
                    assert_eq!(g.name.canonical_str(), "CONC");
                    // the quantified parameter keeps index 1 (after the agent)
                    assert_eq!(g.args.as_slice(), &[Term::Param(1)]);
                }
                other => panic!("expected a conjunction, got {other:?}"),
            },
            other => panic!("expected a forall, got {other:?}"),
        }

        // negative bucket: the atom is stored positively, polarity is added
        // during synthesis
        match &classif.neg_concurrency[0] {
            Condition::Forall(q) => match q.body.as_ref() {
                Condition::And(cs) => {
                    let g = cs[0].as_ground().unwrap();
                    assert_eq!(g.name.canonical_str(), "CONC2");
                    assert_eq!(g.args.as_slice(), &[Term::Param(1), Term::Param(0)]);
                }
                other => panic!("expected a conjunction, got {other:?}"),
            },
            other => panic!("expected a forall, got {other:?}"),
        }

        // normal bucket: the exists is copied with its body intact
        match &classif.normal[0] {
            Condition::Exists(q) => match q.body.as_ref() {
                Condition::And(cs) => {
                    let g = cs[0].as_ground().unwrap();
                    assert_eq!(g.name.canonical_str(), "NORMAL");
                    assert_eq!(g.args.as_slice(), &[Term::Param(1), Term::Param(0)]);
                }
                other => panic!("expected a conjunction, got {other:?}"),
            },
            other => panic!("expected an exists, got {other:?}"),
        }
    }

    #[test]
    fn classification_is_idempotent() {
        let d = quantified_fixture();
        let target = target_for(&d);
        let action = d.actions.get(d.actions.index_of("TEST").unwrap()).clone();
        let first = classify(&d, &target, &action).unwrap();
        let second = classify(&d, &target, &action).unwrap();
        assert_eq!(first.normal, second.normal);
        assert_eq!(first.neg_concurrency, second.neg_concurrency);
        assert_eq!(first.pos_concurrency, second.pos_concurrency);
    }

    #[test]
    fn plain_atoms_are_stored_verbatim() {
        let d = load(
            "(define (domain t)
                (:requirements :strips :typing :multi-agent)
                (:types unit - object)
                (:predicates (p ?a - unit) (q ?a - unit))
                (:action act
                    :agent ?a - unit
                    :parameters ()
                    :precondition (and (p ?a) (not (q ?a)) (not (act2 ?a)))
                    :effect (and (not (p ?a))))
                (:action act2
                    :agent ?a - unit
                    :parameters ()
                    :precondition ()
                    :effect (and (q ?a))))",
        );
        let target = target_for(&d);
        let action = d.actions.get(d.actions.index_of("ACT").unwrap()).clone();
        let classif = classify(&d, &target, &action).unwrap();

        assert_eq!(classif.normal.len(), 2);
        assert!(matches!(&classif.normal[0], Condition::Ground(g) if g.name.canonical_str() == "P"));
        assert!(matches!(&classif.normal[1], Condition::Not(inner)
            if matches!(inner.as_ref(), Condition::Ground(g) if g.name.canonical_str() == "Q")));
        assert_eq!(classif.neg_concurrency.len(), 1);
        assert!(matches!(&classif.neg_concurrency[0], Condition::Ground(g) if g.name.canonical_str() == "ACT2"));
        assert!(classif.pos_concurrency.is_empty());
    }

    #[test]
    fn negative_atom_promotes_an_exists() {
        // the exists mixes a normal atom with a negated concurrency atom: the
        // whole wrapper must land in the negative-concurrency bucket
        let d = load(
            "(define (domain t)
                (:requirements :strips :typing :multi-agent)
                (:types unit - object)
                (:predicates (p ?a - unit))
                (:action act
                    :agent ?a - unit
                    :parameters ()
                    :precondition (exists (?x - unit) (and (p ?x) (not (act2 ?x))))
                    :effect (and (not (p ?a))))
                (:action act2
                    :agent ?a - unit
                    :parameters ()
                    :precondition ()
                    :effect (and (p ?a))))",
        );
        let target = target_for(&d);
        let action = d.actions.get(d.actions.index_of("ACT").unwrap()).clone();
        let classif = classify(&d, &target, &action).unwrap();

        assert!(classif.normal.is_empty());
        assert!(classif.pos_concurrency.is_empty());
        assert_eq!(classif.neg_concurrency.len(), 1);
        assert!(matches!(&classif.neg_concurrency[0], Condition::Exists(_)));
    }
}
