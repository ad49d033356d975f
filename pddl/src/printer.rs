//! Canonical PDDL rendering of domains and instances.
//!
//! The output is deterministic: tables are printed in insertion order and
//! parameters are named `?<TYPE><position>` from their absolute position in
//! the enclosing scope (action parameters first, then quantifier parameters).

use crate::parser::INFINITE_BOUND;
use crate::*;
use std::fmt::{Display, Formatter, Result as FmtResult, Write};

impl Display for Domain {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(f, "( DEFINE ( DOMAIN {} )", self.name)?;
        write_requirements(f, &self.requirements)?;

        if self.requirements.typed {
            writeln!(f, "( :TYPES")?;
            for t in self.types.iter().skip(1) {
                let entry = self.types.get(t);
                let parent = entry.parent().unwrap_or_else(|| self.types.object());
                writeln!(f, "\t{} - {}", entry.name(), self.types.name(parent))?;
            }
            writeln!(f, ")")?;
        }

        let has_constants = self.types.iter().any(|t| !self.types.get(t).constants().is_empty());
        if has_constants {
            writeln!(f, "( :CONSTANTS")?;
            for t in self.types.iter() {
                let entry = self.types.get(t);
                if !entry.constants().is_empty() {
                    write!(f, "\t")?;
                    for c in entry.constants() {
                        write!(f, "{c} ")?;
                    }
                    if self.requirements.typed {
                        write!(f, "- {}", entry.name())?;
                    }
                    writeln!(f)?;
                }
            }
            writeln!(f, ")")?;
        }

        writeln!(f, "( :PREDICATES")?;
        for (id, pred) in self.preds.iter_with_id() {
            if self.cpreds.iter().any(|c| c == id) {
                continue; // concurrency predicates are implementation detail
            }
            write!(f, "\t( {}", pred.name)?;
            write_typed_params(f, self, &pred.params)?;
            writeln!(f, " )")?;
        }
        writeln!(f, ")")?;

        if !self.funcs.is_empty() {
            writeln!(f, "( :FUNCTIONS")?;
            for func in self.funcs.iter() {
                write!(f, "\t( {}", func.name)?;
                write_typed_params(f, self, &func.params)?;
                writeln!(f, " )")?;
            }
            writeln!(f, ")")?;
        }

        for action in self.actions.iter() {
            write_action(f, self, action)?;
        }

        for node in self.nodes.iter() {
            write_node(f, self, node)?;
        }
        for &(first, second) in &self.edges {
            writeln!(
                f,
                "( :POSITIVE-DEPENDENCE {} {} )",
                self.nodes.get(first).name,
                self.nodes.get(second).name
            )?;
        }

        writeln!(f, ")")
    }
}

fn write_requirements(f: &mut Formatter<'_>, req: &Requirements) -> FmtResult {
    write!(f, "( :REQUIREMENTS")?;
    if req.equality {
        write!(f, " :EQUALITY")?;
    }
    if req.strips {
        write!(f, " :STRIPS")?;
    }
    if req.costs {
        write!(f, " :ACTION-COSTS")?;
    }
    if req.adl {
        write!(f, " :ADL")?;
    }
    if req.neg {
        write!(f, " :NEGATIVE-PRECONDITIONS")?;
    }
    if req.condeffects {
        write!(f, " :CONDITIONAL-EFFECTS")?;
    }
    if req.typed {
        write!(f, " :TYPING")?;
    }
    if req.multiagent {
        write!(f, " :MULTI-AGENT")?;
    }
    if req.unfact {
        write!(f, " :UNFACTORED-PRIVACY")?;
    }
    if req.fact {
        write!(f, " :FACTORED-PRIVACY")?;
    }
    if req.net {
        write!(f, " :CONCURRENCY-NETWORK")?;
    }
    writeln!(f, " )")
}

fn param_name(domain: &Domain, tpe: TypeId, position: usize) -> String {
    format!("?{}{}", domain.types.name(tpe), position)
}

/// Writes ` ?T0 - T ?U1 - U` (types omitted in untyped domains).
fn write_typed_params(f: &mut impl Write, domain: &Domain, params: &[TypeId]) -> FmtResult {
    for (i, &tpe) in params.iter().enumerate() {
        write!(f, " {}", param_name(domain, tpe, i))?;
        if domain.requirements.typed {
            write!(f, " - {}", domain.types.name(tpe))?;
        }
    }
    Ok(())
}

fn write_action(f: &mut Formatter<'_>, domain: &Domain, action: &Action) -> FmtResult {
    writeln!(f, "( :ACTION {}", action.name)?;

    let mut names: Vec<String> = action
        .params
        .iter()
        .enumerate()
        .map(|(i, &t)| param_name(domain, t, i))
        .collect();

    // in a (non-factored) multi-agent domain the first parameter is the agent
    let with_agent_clause =
        domain.requirements.multiagent && !domain.requirements.fact && !action.params.is_empty();
    let first_positional = if with_agent_clause {
        write!(f, "  :AGENT {}", names[0])?;
        if domain.requirements.typed {
            write!(f, " - {}", domain.types.name(action.params[0]))?;
        }
        writeln!(f)?;
        1
    } else {
        0
    };

    write!(f, "  :PARAMETERS (")?;
    for (i, &tpe) in action.params.iter().enumerate().skip(first_positional) {
        write!(f, " {}", names[i])?;
        if domain.requirements.typed {
            write!(f, " - {}", domain.types.name(tpe))?;
        }
    }
    writeln!(f, " )")?;

    writeln!(f, "  :PRECONDITION")?;
    write_condition_block(f, domain, action.pre.as_ref(), &mut names)?;
    writeln!(f, "  :EFFECT")?;
    write_condition_block(f, domain, action.eff.as_ref(), &mut names)?;
    writeln!(f, ")")
}

/// A precondition/effect body: conjunctions get one conjunct per line, other
/// conditions are rendered inline.
fn write_condition_block(
    f: &mut Formatter<'_>,
    domain: &Domain,
    cond: Option<&Condition>,
    names: &mut Vec<String>,
) -> FmtResult {
    match cond {
        None => writeln!(f, "\t()"),
        Some(Condition::And(conjuncts)) => {
            writeln!(f, "\t( AND")?;
            for c in conjuncts {
                write!(f, "\t\t")?;
                write_inline(f, domain, c, names)?;
                writeln!(f)?;
            }
            writeln!(f, "\t)")
        }
        Some(other) => {
            write!(f, "\t")?;
            write_inline(f, domain, other, names)?;
            writeln!(f)
        }
    }
}

fn write_term(f: &mut Formatter<'_>, term: &Term, names: &[String]) -> FmtResult {
    match term {
        Term::Param(i) => write!(f, "{}", names[*i as usize]),
        Term::Object(o) => write!(f, "{o}"),
    }
}

fn write_ground_args(f: &mut Formatter<'_>, args: &[Term], names: &[String]) -> FmtResult {
    for arg in args {
        write!(f, " ")?;
        write_term(f, arg, names)?;
    }
    Ok(())
}

fn write_inline(f: &mut Formatter<'_>, domain: &Domain, cond: &Condition, names: &mut Vec<String>) -> FmtResult {
    match cond {
        Condition::And(conjuncts) => {
            write!(f, "( AND")?;
            for c in conjuncts {
                write!(f, " ")?;
                write_inline(f, domain, c, names)?;
            }
            write!(f, " )")
        }
        Condition::Or(a, b) => {
            write!(f, "( OR ")?;
            write_inline(f, domain, a, names)?;
            write!(f, " ")?;
            write_inline(f, domain, b, names)?;
            write!(f, " )")
        }
        Condition::Not(c) => {
            write!(f, "( NOT ")?;
            write_inline(f, domain, c, names)?;
            write!(f, " )")
        }
        Condition::Exists(q) => write_quantifier(f, domain, "EXISTS", q, names),
        Condition::Forall(q) => write_quantifier(f, domain, "FORALL", q, names),
        Condition::When(pars, body) => {
            write!(f, "( WHEN ")?;
            write_inline(f, domain, pars, names)?;
            write!(f, " ")?;
            write_inline(f, domain, body, names)?;
            write!(f, " )")
        }
        Condition::Ground(g) => {
            write!(f, "( {}", g.name)?;
            write_ground_args(f, &g.args, names)?;
            write!(f, " )")
        }
        Condition::Equals(a, b) => {
            write!(f, "( = ")?;
            write_term(f, a, names)?;
            write!(f, " ")?;
            write_term(f, b, names)?;
            write!(f, " )")
        }
        Condition::Increase(inc) => {
            write!(f, "( INCREASE ( {}", inc.func.name)?;
            write_ground_args(f, &inc.func.args, names)?;
            write!(f, " ) ")?;
            match &inc.amount {
                IncreaseAmount::Int(i) => write!(f, "{i}")?,
                IncreaseAmount::Real(r) => write!(f, "{r}")?,
                IncreaseAmount::Func(func) => {
                    write!(f, "( {}", func.name)?;
                    write_ground_args(f, &func.args, names)?;
                    write!(f, " )")?;
                }
            }
            write!(f, " )")
        }
    }
}

fn write_quantifier(
    f: &mut Formatter<'_>,
    domain: &Domain,
    keyword: &str,
    q: &Quantifier,
    names: &mut Vec<String>,
) -> FmtResult {
    write!(f, "( {keyword} (")?;
    for &tpe in &q.params {
        let name = param_name(domain, tpe, names.len());
        write!(f, " {name}")?;
        if domain.requirements.typed {
            write!(f, " - {}", domain.types.name(tpe))?;
        }
        names.push(name);
    }
    write!(f, " ) ")?;
    write_inline(f, domain, &q.body, names)?;
    names.truncate(names.len() - q.params.len());
    write!(f, " )")
}

fn write_node(f: &mut Formatter<'_>, domain: &Domain, node: &NetworkNode) -> FmtResult {
    writeln!(f, "( :CONCURRENCY-CONSTRAINT {}", node.name)?;
    write!(f, "  :PARAMETERS (")?;
    write_typed_params(f, domain, &node.params)?;
    writeln!(f, " )")?;
    write!(f, "  :BOUNDS ( {} ", node.lower)?;
    if node.upper < INFINITE_BOUND {
        write!(f, "{}", node.upper)?;
    } else {
        write!(f, "INF")?;
    }
    writeln!(f, " )")?;
    write!(f, "  :ACTIONS (")?;
    for template in &node.templates {
        write!(f, " ( {}", template.name)?;
        for p in &template.params {
            write!(f, " {p}")?;
        }
        write!(f, " )")?;
    }
    writeln!(f, " )")?;
    writeln!(f, ")")
}

/// Renders the instance against its domain (needed for type names).
pub struct PddlInstance<'a> {
    pub domain: &'a Domain,
    pub instance: &'a Instance,
}

impl Instance {
    pub fn pddl<'a>(&'a self, domain: &'a Domain) -> PddlInstance<'a> {
        PddlInstance {
            domain,
            instance: self,
        }
    }
}

impl Display for PddlInstance<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let ins = self.instance;
        let domain = self.domain;
        writeln!(f, "( DEFINE ( PROBLEM {} )", ins.name)?;
        writeln!(f, "( :DOMAIN {} )", ins.domain_name)?;

        writeln!(f, "( :OBJECTS")?;
        for t in domain.types.iter() {
            let of_type: Vec<&Sym> = ins
                .objects()
                .iter()
                .filter(|(_, tpe)| *tpe == t)
                .map(|(name, _)| name)
                .collect();
            if !of_type.is_empty() {
                write!(f, "\t")?;
                for o in of_type {
                    write!(f, "{o} ")?;
                }
                if domain.requirements.typed {
                    write!(f, "- {}", domain.types.name(t))?;
                }
                writeln!(f)?;
            }
        }
        writeln!(f, ")")?;

        writeln!(f, "( :INIT")?;
        for fact in &ins.init {
            match fact {
                InitFact::Atom(atom) => {
                    write!(f, "\t( {}", atom.name)?;
                    for arg in &atom.args {
                        write!(f, " {arg}")?;
                    }
                    writeln!(f, " )")?;
                }
                InitFact::Num(func, value) => {
                    write!(f, "\t( = ( {}", func.name)?;
                    for arg in &func.args {
                        write!(f, " {arg}")?;
                    }
                    writeln!(f, " ) {value} )")?;
                }
            }
        }
        writeln!(f, ")")?;

        writeln!(f, "( :GOAL")?;
        writeln!(f, "\t( AND")?;
        for goal in &ins.goal {
            write!(f, "\t\t( {}", goal.name)?;
            for arg in &goal.args {
                write!(f, " {arg}")?;
            }
            writeln!(f, " )")?;
        }
        writeln!(f, "\t)")?;
        writeln!(f, ")")?;

        if let Some(metric) = &ins.metric {
            let (direction, func) = match metric {
                Metric::Minimize(func) => ("MINIMIZE", func),
                Metric::Maximize(func) => ("MAXIMIZE", func),
            };
            write!(f, "( :METRIC {direction} ( {}", func.name)?;
            for arg in &func.args {
                write!(f, " {arg}")?;
            }
            writeln!(f, " ) )")?;
        }

        writeln!(f, ")")
    }
}
