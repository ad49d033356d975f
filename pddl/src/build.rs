use crate::errors::*;
use crate::parser;
use crate::parser::PddlFeature;
use crate::sexpr::{SExpr, SList};
use crate::*;
use smallvec::SmallVec;

/// Which flavour of multi-agent domain is being loaded.
///
/// Serial-concurrency domains mirror every action with a concurrency
/// predicate and accept forward references to action names inside
/// preconditions; network domains instead carry the concurrency network
/// blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Concurrency,
    Network,
}

/// Loads a serial-concurrency multi-agent domain.
pub fn build_concurrency_domain(parsed: &parser::Domain) -> Res<Domain> {
    Builder::new(parsed, Variant::Concurrency)?.run()
}

/// Loads a network multi-agent domain.
pub fn build_network_domain(parsed: &parser::Domain) -> Res<Domain> {
    Builder::new(parsed, Variant::Network)?.run()
}

struct Builder<'a> {
    parsed: &'a parser::Domain,
    variant: Variant,
    domain: Domain,
    /// Names of grounds awaiting the declaration of a matching action.
    pending: hashbrown::HashSet<Sym>,
    /// All domain constants, for validating ground arguments.
    constants: hashbrown::HashSet<Sym>,
}

impl<'a> Builder<'a> {
    fn new(parsed: &'a parser::Domain, variant: Variant) -> Res<Builder<'a>> {
        let mut domain = Domain::new(parsed.name.clone());
        domain.requirements = requirements(parsed);
        Ok(Builder {
            parsed,
            variant,
            domain,
            pending: Default::default(),
            constants: Default::default(),
        })
    }

    fn run(mut self) -> Res<Domain> {
        self.build_types()?;
        self.build_constants()?;
        self.build_predicates()?;
        self.build_functions()?;
        self.build_actions()?;
        if self.variant == Variant::Network {
            self.build_network()?;
        }
        Ok(self.domain)
    }

    fn build_types(&mut self) -> Res<()> {
        // a type may first appear as the parent of another; such types are
        // provisionally attached to OBJECT and re-wired if declared later
        let mut provisional: hashbrown::HashSet<Sym> = Default::default();
        for decl in &self.parsed.types {
            let parent = match &decl.tpe {
                Some(parent) => match self.domain.types.index_of(parent.canonical_str()) {
                    Some(id) => id,
                    None => {
                        provisional.insert(parent.clone());
                        self.domain.types.create(parent, None)?
                    }
                },
                None => self.domain.types.object(),
            };
            if let Some(existing) = self.domain.types.index_of(decl.symbol.canonical_str()) {
                if provisional.remove(&decl.symbol) {
                    self.domain.types.disconnect_from_parent(existing);
                    self.domain.types.connect_types(parent, existing);
                } else {
                    return Err((&decl.symbol).invalid("type declared twice"));
                }
            } else {
                self.domain.types.create(&decl.symbol, Some(parent))?;
            }
        }
        Ok(())
    }

    fn build_constants(&mut self) -> Res<()> {
        for c in &self.parsed.constants {
            let tpe = self.resolve_opt_type(c.tpe.as_ref())?;
            self.domain.types.add_constant(tpe, &c.symbol);
            self.constants.insert(c.symbol.clone());
        }
        Ok(())
    }

    fn resolve_opt_type(&self, tpe: Option<&Sym>) -> Res<TypeId> {
        match tpe {
            Some(t) => self
                .domain
                .types
                .index_of(t.canonical_str())
                .ok_or_else(|| t.invalid("unknown type")),
            None => Ok(self.domain.types.object()),
        }
    }

    fn param_types(&self, params: &[parser::Param]) -> Res<Vec<TypeId>> {
        params.iter().map(|p| self.resolve_opt_type(p.tpe.as_ref())).collect()
    }

    fn build_predicates(&mut self) -> Res<()> {
        for pred in &self.parsed.predicates {
            let params = self.param_types(&pred.args)?;
            self.domain.preds.push(Predicate {
                name: pred.name.clone(),
                params,
            })?;
        }
        Ok(())
    }

    fn build_functions(&mut self) -> Res<()> {
        for func in &self.parsed.functions {
            let params = self.param_types(&func.args)?;
            self.domain.funcs.push(Function {
                name: func.name.clone(),
                params,
            })?;
        }
        Ok(())
    }

    fn build_actions(&mut self) -> Res<()> {
        for a in &self.parsed.actions {
            self.build_action(a).tag(&a.name, "when loading action", Some(&a.span))?;
        }
        // every pending ground must have found its action by now
        let mut unresolved = None;
        for action in self.domain.actions.iter() {
            for cond in action.pre.iter().chain(action.eff.iter()) {
                cond.for_each_ground(&mut |g| {
                    if g.pred.is_none() && unresolved.is_none() {
                        unresolved = Some(g.name.clone());
                    }
                });
            }
        }
        if let Some(name) = unresolved {
            return Err(SymbolError::unknown(SymbolKind::Predicate, name).into());
        }
        Ok(())
    }

    fn build_action(&mut self, a: &parser::Action) -> Res<()> {
        let multiagent = self.domain.requirements.multiagent;
        let factored = self.domain.requirements.fact;
        if multiagent && !factored && a.agent.is_none() {
            return Err((&a.name).invalid("multi-agent action without an :agent clause"));
        }

        // the agent parameter, when present, is parameter 0
        let mut scope: Vec<(Sym, TypeId)> = Vec::with_capacity(a.args.len() + 1);
        for p in a.agent.iter().chain(a.args.iter()) {
            let tpe = self.resolve_opt_type(p.tpe.as_ref())?;
            scope.push((p.symbol.clone(), tpe));
        }
        let params: Vec<TypeId> = scope.iter().map(|(_, t)| *t).collect();

        let pre = self.convert_clauses(&a.pre, &mut scope)?;
        let eff = self.convert_effect(&a.eff, &mut scope)?;

        let id = self.domain.actions.push(Action {
            name: a.name.clone(),
            params,
            pre,
            eff,
        })?;

        if self.variant == Variant::Concurrency {
            let cpred = self.domain.add_concurrency_predicate_from_action(id)?;
            self.resolve_pending(cpred)?;
        }
        Ok(())
    }

    /// Binds every ground waiting on the freshly declared concurrency
    /// predicate.
    fn resolve_pending(&mut self, cpred: PredId) -> Res<()> {
        let pred = self.domain.preds.get(cpred);
        let name = pred.name.clone();
        let arity = pred.params.len();
        if !self.pending.remove(&name) {
            return Ok(());
        }
        let mut bad_arity = false;
        for action in self.domain.actions.iter_mut() {
            for cond in action.pre.iter_mut().chain(action.eff.iter_mut()) {
                cond.for_each_ground_mut(&mut |g| {
                    if g.pred.is_none() && g.name == name {
                        if g.args.len() != arity {
                            bad_arity = true;
                        }
                        g.pred = Some(cpred);
                    }
                });
            }
        }
        if bad_arity {
            return Err(name
                .invalid("wrong number of arguments for the concurrency predicate of this action"));
        }
        Ok(())
    }

    /// One condition per `:precondition` clause; several clauses conjoin.
    fn convert_clauses(&mut self, clauses: &[SExpr], scope: &mut Vec<(Sym, TypeId)>) -> Res<Option<Condition>> {
        match clauses {
            [] => Ok(None),
            [single] => Ok(Some(self.convert_condition(single, scope)?)),
            several => {
                let mut conjuncts = Vec::with_capacity(several.len());
                for c in several {
                    conjuncts.push(self.convert_condition(c, scope)?);
                }
                Ok(Some(Condition::And(conjuncts)))
            }
        }
    }

    /// Effects are normalised to a conjunction.
    fn convert_effect(&mut self, clauses: &[SExpr], scope: &mut Vec<(Sym, TypeId)>) -> Res<Option<Condition>> {
        if clauses.is_empty() {
            return Ok(None);
        }
        let mut conjuncts = Vec::new();
        for clause in clauses {
            match self.convert_condition(clause, scope)? {
                Condition::And(cs) => conjuncts.extend(cs),
                other => conjuncts.push(other),
            }
        }
        Ok(Some(Condition::And(conjuncts)))
    }

    fn convert_condition(&mut self, e: &SExpr, scope: &mut Vec<(Sym, TypeId)>) -> Res<Condition> {
        let list = match e {
            SExpr::Atom(_) => return Err(e.invalid("expected a condition")),
            SExpr::List(l) => l,
        };
        if list.is_empty() {
            // `()` is the empty conjunction
            return Ok(Condition::and());
        }
        let head = list[0]
            .as_atom()
            .ok_or_else(|| list[0].invalid("expected a connective or predicate name"))?;
        let mut items = list.iter();
        items.pop_atom()?; // consume the head

        match head.canonical_str() {
            "AND" => {
                let mut conjuncts = Vec::with_capacity(items.len());
                for c in items {
                    conjuncts.push(self.convert_condition(c, scope)?);
                }
                Ok(Condition::And(conjuncts))
            }
            "OR" => {
                let mut disjuncts = Vec::with_capacity(items.len());
                for c in items {
                    disjuncts.push(self.convert_condition(c, scope)?);
                }
                // fold an n-ary input into the binary representation
                let mut result = disjuncts.pop().ok_or_else(|| e.invalid("empty disjunction"))?;
                while let Some(left) = disjuncts.pop() {
                    result = Condition::Or(Box::new(left), Box::new(result));
                }
                Ok(result)
            }
            "NOT" => {
                let inner = items.pop()?;
                let inner = self.convert_condition(inner, scope)?;
                if let Some(unexpected) = items.next() {
                    return Err(unexpected.invalid("expected end of negation"));
                }
                Ok(Condition::not(inner))
            }
            "EXISTS" | "FORALL" => {
                let vars = items.pop_list().title("expected a variable list")?;
                let vars = parser::consume_typed_symbols(&mut vars.iter())?;
                let body = items.pop()?;
                if let Some(unexpected) = items.next() {
                    return Err(unexpected.invalid("expected end of quantifier"));
                }

                let mut tpes = Vec::with_capacity(vars.len());
                for v in &vars {
                    let tpe = self.resolve_opt_type(v.tpe.as_ref())?;
                    scope.push((v.symbol.clone(), tpe));
                    tpes.push(tpe);
                }
                let body = self.convert_condition(body, scope)?;
                scope.truncate(scope.len() - vars.len());

                let q = Quantifier {
                    params: tpes,
                    body: Box::new(body),
                };
                if head.canonical_str() == "EXISTS" {
                    Ok(Condition::Exists(q))
                } else {
                    Ok(Condition::Forall(q))
                }
            }
            "WHEN" => {
                let pars = self.convert_condition(items.pop()?, scope)?;
                let cond = self.convert_condition(items.pop()?, scope)?;
                if let Some(unexpected) = items.next() {
                    return Err(unexpected.invalid("expected end of conditional effect"));
                }
                Ok(Condition::When(Box::new(pars), Box::new(cond)))
            }
            "INCREASE" => {
                let func = self.convert_ground_func(items.pop()?, scope)?;
                let amount = items.pop()?;
                if let Some(unexpected) = items.next() {
                    return Err(unexpected.invalid("expected end of increase effect"));
                }
                let amount = match amount {
                    SExpr::Atom(a) => {
                        let s = a.canonical_str();
                        if let Ok(i) = s.parse::<i64>() {
                            IncreaseAmount::Int(i)
                        } else if let Ok(r) = s.parse::<f64>() {
                            IncreaseAmount::Real(r)
                        } else {
                            return Err(a.invalid("expected a numeric amount"));
                        }
                    }
                    list @ SExpr::List(_) => IncreaseAmount::Func(self.convert_ground_func(list, scope)?),
                };
                Ok(Condition::Increase(Increase { func, amount }))
            }
            "=" => {
                let lhs = self.convert_term(items.pop_atom()?, scope)?;
                let rhs = self.convert_term(items.pop_atom()?, scope)?;
                if let Some(unexpected) = items.next() {
                    return Err(unexpected.invalid("expected end of equality"));
                }
                Ok(Condition::Equals(lhs, rhs))
            }
            _ => self.convert_ground(head, list, scope).map(Condition::Ground),
        }
    }

    fn convert_term(&self, atom: &Sym, scope: &[(Sym, TypeId)]) -> Res<Term> {
        if atom.canonical_str().starts_with('?') {
            let position = scope
                .iter()
                .rposition(|(name, _)| name == atom)
                .ok_or_else(|| atom.invalid("unknown parameter"))?;
            Ok(Term::Param(position as u32))
        } else if self.constants.contains(atom.canonical_str()) {
            Ok(Term::Object(atom.clone()))
        } else {
            Err(atom.invalid("unknown object"))
        }
    }

    fn convert_args(&self, mut items: crate::sexpr::ListIter, scope: &[(Sym, TypeId)]) -> Res<SmallVec<[Term; 4]>> {
        let mut args = SmallVec::new();
        while !items.is_empty() {
            let atom = items.pop_atom()?;
            args.push(self.convert_term(atom, scope)?);
        }
        Ok(args)
    }

    fn convert_ground(&mut self, head: &Sym, list: &SList, scope: &[(Sym, TypeId)]) -> Res<Ground> {
        let mut items = list.iter();
        items.pop_atom()?;
        let args = self.convert_args(items, scope)?;
        match self.domain.preds.index_of(head.canonical_str()) {
            Some(pred) => {
                if args.len() != self.domain.preds.get(pred).params.len() {
                    return Err(list.invalid("wrong number of arguments"));
                }
                Ok(Ground {
                    name: head.clone(),
                    pred: Some(pred),
                    args,
                })
            }
            // a reference to an action declared later: keep the ground
            // pending, to be bound when the action's concurrency predicate
            // materialises
            None if self.variant == Variant::Concurrency => {
                self.pending.insert(head.clone());
                Ok(Ground {
                    name: head.clone(),
                    pred: None,
                    args,
                })
            }
            None => Err(head.invalid("unknown predicate")),
        }
    }

    fn convert_ground_func(&self, e: &SExpr, scope: &[(Sym, TypeId)]) -> Res<GroundFunc> {
        let mut items = e
            .as_list_iter()
            .ok_or_else(|| e.invalid("expected a function application"))?;
        let head = items.pop_atom()?;
        let func = self
            .domain
            .funcs
            .index_of(head.canonical_str())
            .ok_or_else(|| head.invalid("unknown function"))?;
        let args = self.convert_args(items, scope)?;
        Ok(GroundFunc {
            name: head.clone(),
            func: Some(func),
            args,
        })
    }

    fn build_network(&mut self) -> Res<()> {
        for decl in &self.parsed.nodes {
            let node = self.build_node(decl).tag(&decl.name, "when loading concurrency constraint", Some(&decl.span))?;
            self.domain.add_node(node)?;
        }
        for (first, second) in &self.parsed.edges {
            let first = self.domain.nodes.resolve(first)?;
            let second = self.domain.nodes.resolve(second)?;
            self.domain.add_edge(first, second);
        }
        Ok(())
    }

    fn build_node(&self, decl: &parser::NodeDecl) -> Res<NetworkNode> {
        let params = self.param_types(&decl.args)?;
        let mut templates = Vec::with_capacity(decl.templates.len());
        for (name, mapping) in &decl.templates {
            let action = self.domain.actions.resolve(name)?;
            let arity = self.domain.actions.get(action).params.len() as u32;
            for &index in mapping {
                if index >= arity {
                    return Err(name.invalid("parameter mapping out of the action's range"));
                }
            }
            templates.push(Template {
                action,
                name: name.clone(),
                params: mapping.clone(),
            });
        }
        Ok(NetworkNode {
            name: decl.name.clone(),
            params,
            lower: decl.lower,
            upper: decl.upper,
            templates,
        })
    }
}

fn requirements(parsed: &parser::Domain) -> Requirements {
    let mut req = Requirements::default();
    for f in &parsed.features {
        match f {
            PddlFeature::Strips => req.strips = true,
            PddlFeature::Typing => req.typed = true,
            PddlFeature::Equality => req.equality = true,
            PddlFeature::NegativePreconditions => req.neg = true,
            PddlFeature::ConditionalEffects => req.condeffects = true,
            PddlFeature::Adl => req.adl = true,
            PddlFeature::ActionCosts => req.costs = true,
            PddlFeature::MultiAgent => req.multiagent = true,
            PddlFeature::UnfactoredPrivacy => req.unfact = true,
            PddlFeature::FactoredPrivacy => req.fact = true,
            PddlFeature::ConcurrencyNetwork => req.net = true,
            PddlFeature::UniversalPreconditions
            | PddlFeature::ExistentialPreconditions
            | PddlFeature::QuantifiedPreconditions => {}
        }
    }
    req
}

/// Loads a problem against its (already loaded) domain.
pub fn build_instance(parsed: &parser::Problem, domain: &Domain) -> Res<Instance> {
    let mut ins = Instance::new(parsed.problem_name.clone(), parsed.domain_name.clone());

    for obj in &parsed.objects {
        let tpe = match &obj.tpe {
            Some(t) => domain
                .types
                .index_of(t.canonical_str())
                .ok_or_else(|| t.invalid("unknown type"))?,
            None => domain.types.object(),
        };
        ins.add_object(&obj.symbol, tpe)?;
    }

    for fact in &parsed.init {
        // numeric assignment `(= (f args) v)`
        if let Some([func, value]) = fact.as_application("=") {
            let mut func = func
                .as_list_iter()
                .ok_or_else(|| func.invalid("expected a function application"))?;
            let name = func.pop_atom()?;
            if domain.funcs.index_of(name.canonical_str()).is_none() {
                return Err(name.invalid("unknown function"));
            }
            let args = object_args(func, domain, &ins)?;
            let value = value.as_atom().ok_or_else(|| value.invalid("expected a number"))?;
            let value = parse_number(value)?;
            ins.add_init_num(name, args, value);
            continue;
        }
        let (name, args) = ground_fact(fact, domain, &ins)?;
        ins.add_init(name, args);
    }

    for goal in &parsed.goal {
        // a goal is a conjunction of positive ground atoms
        let conjuncts: Vec<&SExpr> = match goal.as_application("AND") {
            Some(cs) => cs.iter().collect(),
            None => vec![goal],
        };
        for c in conjuncts {
            let (name, args) = ground_fact(c, domain, &ins)?;
            ins.add_goal(name, args);
        }
    }

    if let Some(metric) = &parsed.metric {
        let expr = match metric {
            parser::Metric::Minimize(e) | parser::Metric::Maximize(e) => e,
        };
        let mut items = expr
            .as_list_iter()
            .ok_or_else(|| expr.invalid("expected a function application"))?;
        let name = items.pop_atom()?;
        if domain.funcs.index_of(name.canonical_str()).is_none() {
            return Err(name.invalid("unknown function"));
        }
        let args = object_args(items, domain, &ins)?;
        let fact = Fact::new(name, args);
        ins.metric = Some(match metric {
            parser::Metric::Minimize(_) => Metric::Minimize(fact),
            parser::Metric::Maximize(_) => Metric::Maximize(fact),
        });
    }

    Ok(ins)
}

fn ground_fact(e: &SExpr, domain: &Domain, ins: &Instance) -> Res<(Sym, Vec<Sym>)> {
    let mut items = e.as_list_iter().ok_or_else(|| e.invalid("expected a ground atom"))?;
    let name = items.pop_atom()?;
    if domain.preds.index_of(name.canonical_str()).is_none() {
        return Err(name.invalid("unknown predicate"));
    }
    let args = object_args(items, domain, ins)?;
    Ok((name.clone(), args))
}

fn object_args(items: crate::sexpr::ListIter, domain: &Domain, ins: &Instance) -> Res<Vec<Sym>> {
    let mut args = Vec::with_capacity(items.len());
    for arg in items {
        let arg = arg.as_atom().ok_or_else(|| arg.invalid("expected an object name"))?;
        let known = ins.type_of(arg.canonical_str()).is_some()
            || domain
                .types
                .iter()
                .any(|t| domain.types.get(t).constants().iter().any(|c| c == arg));
        if !known {
            return Err(arg.invalid("unknown object"));
        }
        args.push(arg.clone());
    }
    Ok(args)
}

fn parse_number(atom: &Sym) -> Res<Number> {
    let s = atom.canonical_str();
    if let Ok(i) = s.parse::<i64>() {
        Ok(Number::Int(i))
    } else if let Ok(r) = s.parse::<f64>() {
        Ok(Number::Real(r))
    } else {
        Err(atom.invalid("expected a number"))
    }
}
