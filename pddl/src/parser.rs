use crate::errors::*;
use crate::input::Input;
use crate::sexpr::*;
use crate::sym::Sym;
use crate::utils::disp_iter;

use std::fmt::{Display, Error, Formatter};
use std::str::FromStr;

/// Upper bound encoding of an `INF` arity in a concurrency constraint.
pub const INFINITE_BOUND: u32 = 1_000_000;

pub fn parse_pddl_domain(input: Input) -> Res<Domain> {
    let expr = crate::sexpr::parse(&input)?;
    read_domain(expr).title("Invalid domain: Syntax error")
}
pub fn parse_pddl_problem(input: Input) -> Res<Problem> {
    let expr = crate::sexpr::parse(&input)?;
    read_problem(expr).title("Invalid problem: Syntax error")
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PddlFeature {
    Strips,
    Typing,
    Equality,
    NegativePreconditions,
    UniversalPreconditions,
    ExistentialPreconditions,
    QuantifiedPreconditions,
    ConditionalEffects,
    Adl,
    ActionCosts,
    MultiAgent,
    UnfactoredPrivacy,
    FactoredPrivacy,
    ConcurrencyNetwork,
}
impl FromStr for PddlFeature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ":STRIPS" => Ok(PddlFeature::Strips),
            ":TYPING" => Ok(PddlFeature::Typing),
            ":EQUALITY" => Ok(PddlFeature::Equality),
            ":NEGATIVE-PRECONDITIONS" => Ok(PddlFeature::NegativePreconditions),
            ":UNIVERSAL-PRECONDITIONS" => Ok(PddlFeature::UniversalPreconditions),
            ":EXISTENTIAL-PRECONDITIONS" => Ok(PddlFeature::ExistentialPreconditions),
            ":QUANTIFIED-PRECONDITIONS" => Ok(PddlFeature::QuantifiedPreconditions),
            ":CONDITIONAL-EFFECTS" => Ok(PddlFeature::ConditionalEffects),
            ":ADL" => Ok(PddlFeature::Adl),
            ":ACTION-COSTS" => Ok(PddlFeature::ActionCosts),
            ":MULTI-AGENT" => Ok(PddlFeature::MultiAgent),
            ":UNFACTORED-PRIVACY" => Ok(PddlFeature::UnfactoredPrivacy),
            ":FACTORED-PRIVACY" => Ok(PddlFeature::FactoredPrivacy),
            ":CONCURRENCY-NETWORK" => Ok(PddlFeature::ConcurrencyNetwork),
            _ => Err(format!("Unknown feature `{s}`")),
        }
    }
}
impl Display for PddlFeature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let formatted = match self {
            PddlFeature::Strips => ":STRIPS",
            PddlFeature::Typing => ":TYPING",
            PddlFeature::Equality => ":EQUALITY",
            PddlFeature::NegativePreconditions => ":NEGATIVE-PRECONDITIONS",
            PddlFeature::UniversalPreconditions => ":UNIVERSAL-PRECONDITIONS",
            PddlFeature::ExistentialPreconditions => ":EXISTENTIAL-PRECONDITIONS",
            PddlFeature::QuantifiedPreconditions => ":QUANTIFIED-PRECONDITIONS",
            PddlFeature::ConditionalEffects => ":CONDITIONAL-EFFECTS",
            PddlFeature::Adl => ":ADL",
            PddlFeature::ActionCosts => ":ACTION-COSTS",
            PddlFeature::MultiAgent => ":MULTI-AGENT",
            PddlFeature::UnfactoredPrivacy => ":UNFACTORED-PRIVACY",
            PddlFeature::FactoredPrivacy => ":FACTORED-PRIVACY",
            PddlFeature::ConcurrencyNetwork => ":CONCURRENCY-NETWORK",
        };
        write!(f, "{formatted}")
    }
}

#[derive(Debug, Clone)]
pub struct Domain {
    pub name: Sym,
    pub features: Vec<PddlFeature>,
    pub types: Vec<TypedSymbol>,
    pub constants: Vec<TypedSymbol>,
    pub predicates: Vec<Predicate>,
    pub functions: Vec<Function>,
    pub actions: Vec<Action>,
    pub nodes: Vec<NodeDecl>,
    pub edges: Vec<(Sym, Sym)>,
}

impl Domain {
    pub fn has_feature(&self, feature: PddlFeature) -> bool {
        self.features.contains(&feature)
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "# Domain : {}", self.name)?;
        write!(f, "\n# Types \n  ")?;
        disp_iter(f, &self.types, "\n  ")?;
        write!(f, "\n# Predicates \n  ")?;
        disp_iter(f, &self.predicates, "\n  ")?;
        write!(f, "\n# Actions \n  ")?;
        disp_iter(f, &self.actions, "\n  ")?;
        Result::Ok(())
    }
}

pub type TypedSymbol = Param;

/// Parameter to a predicate, function or action
#[derive(Debug, Clone)]
pub struct Param {
    /// name of the parameter
    pub symbol: Sym,
    /// Type of the parameter (the top `OBJECT` type if absent)
    pub tpe: Option<Sym>,
}
impl Param {
    pub fn new(symbol: impl Into<Sym>, tpe: impl Into<Sym>) -> Self {
        Self {
            symbol: symbol.into(),
            tpe: Some(tpe.into()),
        }
    }

    pub fn untyped(symbol: impl Into<Sym>) -> Self {
        Self {
            symbol: symbol.into(),
            tpe: None,
        }
    }
}

impl Display for Param {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match &self.tpe {
            Some(tpe) => write!(f, "{}: {}", self.symbol, tpe),
            None => write!(f, "{}", self.symbol),
        }
    }
}

/// A PDDL predicate, i.e., state function whose codomain is the set of booleans.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub name: Sym,
    pub args: Vec<Param>,
    pub source: Option<Span>,
}
impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}(", self.name)?;
        disp_iter(f, &self.args, ", ")?;
        write!(f, ")")
    }
}

/// A PDDL function, i.e., state function whose codomain is the set of reals.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Sym,
    pub args: Vec<Param>,
    pub tpe: Option<Sym>,
    pub source: Option<Span>,
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        disp_iter(f, &self.args, ", ")?;
        write!(f, ")")
    }
}

#[derive(Clone, Debug)]
pub struct Action {
    pub name: Sym,
    /// The `:AGENT` parameter of a multi-agent action, folded in front of `args`
    /// by the model builder. Absent under `:FACTORED-PRIVACY` and in
    /// single-agent domains.
    pub agent: Option<Param>,
    pub args: Vec<Param>,
    pub pre: Vec<SExpr>,
    pub eff: Vec<SExpr>,
    /// Span covering the entire action definition
    pub span: Span,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}(", self.name)?;
        disp_iter(f, &self.args, ", ")?;
        write!(f, ")")
    }
}

/// A `(:CONCURRENCY-CONSTRAINT ...)` block: a node of the concurrency network.
#[derive(Clone, Debug)]
pub struct NodeDecl {
    pub name: Sym,
    pub args: Vec<Param>,
    pub lower: u32,
    /// `INF` encodes as [`INFINITE_BOUND`]
    pub upper: u32,
    /// Action templates `(name i0 i1 ...)` where the k-th integer gives the
    /// action parameter bound to the node's k-th parameter.
    pub templates: Vec<(Sym, Vec<u32>)>,
    pub span: Span,
}

/// Consume a typed list of symbols
///  - (a - loc b - loc c - loc) : symbols a, b and c of type loc
///  - (a b c - loc)  : symbols a, b and c of type loc
///  - (a b c) : symbols a b and c of type object
pub fn consume_typed_symbols(input: &mut ListIter) -> Res<Vec<TypedSymbol>> {
    let mut args = Vec::with_capacity(input.len() / 3);
    let mut untyped: Vec<Sym> = Vec::new();
    while !input.is_empty() {
        let next = input.pop_atom()?;
        if next.canonical_str() == "-" {
            let tpe = input.pop()?;
            let tpe = tpe.as_atom().ok_or_else(|| tpe.invalid("expected a type name"))?;
            untyped
                .drain(..)
                .map(|name| TypedSymbol::new(name, tpe))
                .for_each(|a| args.push(a));
        } else {
            untyped.push(next.into());
        }
    }
    // no type given, everything is an object
    untyped
        .drain(..)
        .map(TypedSymbol::untyped)
        .for_each(|a| args.push(a));
    Result::Ok(args)
}

fn read_domain(dom: SExpr) -> Res<Domain> {
    let dom = &mut dom.as_list_iter().ok_or_else(|| dom.invalid("Expected a list"))?;

    dom.pop_known_atom("DEFINE")?;

    // extract the name of the domain, of the form `(domain XXX)`
    let mut domain_name_decl = dom.pop_list()?.iter();
    domain_name_decl.pop_known_atom("DOMAIN")?;
    let name = domain_name_decl.pop_atom().title("missing name of domain")?.clone();

    let mut res = Domain {
        name,
        features: vec![],
        types: vec![],
        constants: vec![],
        predicates: vec![],
        functions: vec![],
        actions: vec![],
        nodes: vec![],
        edges: vec![],
    };

    for current in dom {
        // a property associates a key (e.g. `:predicates`) to a value or a sequence of values
        let mut property = current
            .as_list_iter()
            .ok_or_else(|| current.invalid("expected a property list"))?;

        match property.pop_atom()?.canonical_str() {
            ":REQUIREMENTS" => {
                for feature in property {
                    let feature = feature
                        .as_atom()
                        .ok_or_else(|| feature.invalid("Expected feature name but got list"))?;
                    let f = PddlFeature::from_str(feature.canonical_str()).map_err(|e| feature.invalid(e))?;
                    res.features.push(f);
                }
            }
            ":PREDICATES" => {
                for pred in property {
                    let mut pred = pred.as_list_iter().ok_or_else(|| pred.invalid("Expected a list"))?;
                    let name = pred.pop_atom()?.clone();
                    let args = consume_typed_symbols(&mut pred)?;
                    res.predicates.push(Predicate {
                        name,
                        args,
                        source: Some(pred.loc()),
                    });
                }
            }
            ":TYPES" => {
                if !res.types.is_empty() {
                    return Err(current.invalid("More than one ':types' section definition"));
                }
                res.types = consume_typed_symbols(&mut property)?;
            }
            ":CONSTANTS" => {
                if !res.constants.is_empty() {
                    return Err(current.invalid("More than one ':constants' section definition"));
                }
                res.constants = consume_typed_symbols(&mut property)?;
            }
            ":FUNCTIONS" => {
                while let Ok(func) = property.pop() {
                    // element is necessarily a function name and parameters, e.g., (battery ?r)
                    let mut func = func.as_list_iter().ok_or_else(|| func.invalid("Expected a list"))?;
                    let name = func.pop_atom()?.clone();
                    let args = consume_typed_symbols(&mut func)?;

                    // from PDDL 3.1, it can have a type annotation, e.g., (battery ?r) - number
                    let tpe = if property.peek().is_some_and(|a| a.is_atom("-")) {
                        property.pop_known_atom("-")?;
                        Some(property.pop_atom().title("expected a type")?.clone())
                    } else {
                        None
                    };
                    res.functions.push(Function {
                        name,
                        args,
                        tpe,
                        source: Some(func.loc()),
                    });
                }
            }
            ":ACTION" => {
                let action = read_action(&mut property, current.loc())?;
                res.actions.push(action);
            }
            ":CONCURRENCY-CONSTRAINT" => {
                let node = read_node(&mut property, current.loc())?;
                res.nodes.push(node);
            }
            ":POSITIVE-DEPENDENCE" => {
                let first = property.pop_atom()?.clone();
                let second = property.pop_atom()?.clone();
                if let Some(unexpected) = property.next() {
                    return Err(unexpected.invalid("Expected end of list"));
                }
                res.edges.push((first, second));
            }
            _ => return Err(current.invalid("unsupported block")),
        }
    }
    Ok(res)
}

fn read_action(property: &mut ListIter, span: Span) -> Res<Action> {
    let name = property.pop_atom()?.clone();
    let mut agent = None;
    let mut args = Vec::new();
    let mut pre = Vec::new();
    let mut eff = Vec::new();
    while !property.is_empty() {
        let key_expr = property.pop_atom()?;
        match key_expr.canonical_str() {
            ":AGENT" => {
                // of the form `:agent ?a - type` (the type annotation is optional)
                if agent.is_some() {
                    return Err(key_expr.invalid("Duplicated ':agent' tag is not allowed"));
                }
                let symbol = property.pop_atom().title("expected an agent parameter")?.clone();
                let tpe = if property.peek().is_some_and(|a| a.is_atom("-")) {
                    property.pop_known_atom("-")?;
                    Some(property.pop_atom().title("expected a type")?.clone())
                } else {
                    None
                };
                agent = Some(Param { symbol, tpe });
            }
            ":PARAMETERS" => {
                if !args.is_empty() {
                    return Err(key_expr.invalid("Duplicated ':parameters' tag is not allowed"));
                }
                let value = property.pop().tag(key_expr, "No value associated to arg", None)?;
                let mut value = value
                    .as_list_iter()
                    .ok_or_else(|| value.invalid("Expected a parameter list"))?;
                for a in consume_typed_symbols(&mut value)? {
                    args.push(a);
                }
            }
            ":PRECONDITION" => {
                let value = property.pop().tag(key_expr, "No value associated to arg", None)?;
                pre.push(value.clone());
            }
            ":EFFECT" => {
                let value = property.pop().tag(key_expr, "No value associated to arg", None)?;
                eff.push(value.clone());
            }
            _ => return Err(key_expr.invalid("unsupported key in action")),
        }
    }
    Ok(Action {
        name,
        agent,
        args,
        pre,
        eff,
        span,
    })
}

fn read_node(property: &mut ListIter, span: Span) -> Res<NodeDecl> {
    let name = property.pop_atom()?.clone();

    property.pop_known_atom(":PARAMETERS")?;
    let params = property.pop_list().title("Expected a parameter list")?;
    let args = consume_typed_symbols(&mut params.iter())?;

    property.pop_known_atom(":BOUNDS")?;
    let mut bounds = property.pop_list().title("Expected arity bounds `(lo hi)`")?.iter();
    let lo = bounds.pop_atom()?;
    let lower: u32 = lo
        .canonical_str()
        .parse()
        .map_err(|_| lo.invalid("expected a lower arity bound"))?;
    let hi = bounds.pop_atom()?;
    let upper: u32 = if hi.canonical_str() == "INF" {
        INFINITE_BOUND
    } else {
        hi.canonical_str()
            .parse()
            .map_err(|_| hi.invalid("expected an upper arity bound or `INF`"))?
    };
    if let Some(unexpected) = bounds.next() {
        return Err(unexpected.invalid("Expected end of bounds"));
    }
    if lower > upper {
        return Err(hi.invalid("upper arity bound is below the lower bound"));
    }

    property.pop_known_atom(":ACTIONS")?;
    let templates_list = property.pop_list().title("Expected a list of action templates")?;
    let mut templates = Vec::with_capacity(templates_list.len());
    for template in templates_list.iter() {
        let mut template = template
            .as_list_iter()
            .ok_or_else(|| template.invalid("Expected an action template `(name i0 i1 ...)`"))?;
        let action = template.pop_atom()?.clone();
        let mut mapping = Vec::with_capacity(args.len());
        for _ in 0..args.len() {
            let index = template.pop_atom().title("missing parameter mapping in template")?;
            let index: u32 = index
                .canonical_str()
                .parse()
                .map_err(|_| index.invalid("expected an action parameter index"))?;
            mapping.push(index);
        }
        if let Some(unexpected) = template.next() {
            return Err(unexpected.invalid("Expected end of template"));
        }
        templates.push((action, mapping));
    }

    if let Some(unexpected) = property.next() {
        return Err(unexpected.invalid("unsupported key in concurrency constraint"));
    }

    Ok(NodeDecl {
        name,
        args,
        lower,
        upper,
        templates,
        span,
    })
}

#[derive(Clone, Debug)]
pub struct Problem {
    pub problem_name: Sym,
    pub domain_name: Sym,
    pub objects: Vec<TypedSymbol>,
    pub init: Vec<SExpr>,
    pub goal: Vec<SExpr>,
    pub metric: Option<Metric>,
}

#[derive(Clone, Debug)]
pub enum Metric {
    Minimize(SExpr),
    Maximize(SExpr),
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "# Problem {} (domain: {})", &self.problem_name, &self.domain_name)?;
        write!(f, "\n# Objects \n  ")?;
        disp_iter(f, &self.objects, "\n  ")?;
        write!(f, "\n# Init \n  ")?;
        disp_iter(f, &self.init, "\n  ")?;
        write!(f, "\n# Goal \n  ")?;
        disp_iter(f, &self.goal, "\n  ")?;
        Result::Ok(())
    }
}

fn read_problem(problem: SExpr) -> Res<Problem> {
    let mut problem = problem
        .as_list_iter()
        .ok_or_else(|| problem.invalid("Expected a list"))?;
    problem.pop_known_atom("DEFINE")?;

    let mut problem_name = problem
        .pop_list()
        .title("Expected problem name definition of the form '(problem XXXXXX)'")?
        .iter();
    problem_name.pop_known_atom("PROBLEM")?;
    let problem_name = problem_name.pop_atom()?.clone();

    let mut domain_name_def = problem.pop_list()?.iter();
    domain_name_def.pop_known_atom(":DOMAIN")?;
    let domain_name = domain_name_def.pop_atom()?.clone();

    let mut res = Problem {
        problem_name,
        domain_name,
        objects: vec![],
        init: vec![],
        goal: vec![],
        metric: None,
    };

    for current in problem {
        // a property associates a key (e.g. `:objects`) to a value or a sequence of values
        let mut property = current
            .as_list_iter()
            .ok_or_else(|| current.invalid("Expected a list"))?;
        match property.pop_atom()?.canonical_str() {
            ":REQUIREMENTS" => {} // HACK: ignore requirements in problem (umtranslog, IPC 2002)
            ":OBJECTS" => {
                let objects = consume_typed_symbols(&mut property)?;
                for o in objects {
                    res.objects.push(o);
                }
            }
            ":INIT" => {
                for fact in property {
                    res.init.push(fact.clone());
                }
            }
            ":GOAL" => {
                for goal in property {
                    res.goal.push(goal.clone());
                }
            }
            ":METRIC" => {
                let qualifier = property.pop_atom()?;
                match qualifier.canonical_str() {
                    "MINIMIZE" => res.metric = Some(Metric::Minimize(property.pop()?.clone())),
                    "MAXIMIZE" => res.metric = Some(Metric::Maximize(property.pop()?.clone())),
                    _ => return Err(qualifier.invalid("expected `maximize` or `minimize`")),
                }
            }
            _ => return Err(current.invalid("unsupported block")),
        }
    }

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    static DOMAIN: &str = "(define (domain shift)
        (:requirements :strips :typing :multi-agent :unfactored-privacy)
        (:types worker station - object)
        (:predicates (manned ?s - station) (rested ?w - worker))
        (:action man
            :agent ?w - worker
            :parameters (?s - station)
            :precondition (and (rested ?w))
            :effect (and (manned ?s) (not (rested ?w)))))";

    #[test]
    fn parses_multiagent_action() -> Res<()> {
        let dom = parse_pddl_domain(Input::from_string(DOMAIN))?;
        assert_eq!(dom.name.canonical_str(), "SHIFT");
        assert!(dom.has_feature(PddlFeature::MultiAgent));
        assert_eq!(dom.actions.len(), 1);
        let action = &dom.actions[0];
        let agent = action.agent.as_ref().unwrap();
        assert_eq!(agent.symbol.canonical_str(), "?W");
        assert_eq!(agent.tpe.as_ref().unwrap().canonical_str(), "WORKER");
        assert_eq!(action.args.len(), 1);
        Ok(())
    }

    #[test]
    fn parses_concurrency_constraint() -> Res<()> {
        let dom = "(define (domain lifting)
            (:requirements :typing :multi-agent :concurrency-network)
            (:types agent table - object)
            (:predicates (lifted ?t - table))
            (:action lift
                :agent ?a - agent
                :parameters (?t - table)
                :precondition ()
                :effect (and (lifted ?t)))
            (:concurrency-constraint c0
                :parameters (?t - table)
                :bounds (2 inf)
                :actions ((lift 1))))";
        let dom = parse_pddl_domain(Input::from_string(dom))?;
        assert_eq!(dom.nodes.len(), 1);
        let node = &dom.nodes[0];
        assert_eq!(node.lower, 2);
        assert_eq!(node.upper, INFINITE_BOUND);
        assert_eq!(node.templates.len(), 1);
        assert_eq!(node.templates[0].0.canonical_str(), "LIFT");
        assert_eq!(node.templates[0].1, vec![1]);
        Ok(())
    }
}
