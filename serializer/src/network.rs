//! Network-concurrency compilation: each connected component of the
//! concurrency network unrolls into `START`/`SKIP`/`DO`/`END`/`FINISH`
//! actions, with `POS-`/`NEG-` bookkeeping deferring the effects on fluents
//! that co-executing agents both read and delete.

use crate::infer::AGENT_TYPE;
use mapddl::*;
use smallvec::{SmallVec, smallvec};
use std::collections::{BTreeMap, BTreeSet};

const COUNT_TYPE: &str = "AGENT-COUNT";
const ZERO_COUNT: &str = "ACOUNT-0";

/// What the synthesiser precomputes over the source network.
pub struct NetworkAnalysis {
    /// Problematic fluents: read by one template and deleted by another in
    /// the same node, in both cases without touching the agent parameter.
    pub problematic: BTreeSet<PredId>,
    /// Connected components by ascending union-find root, nodes in insertion
    /// order.
    pub components: BTreeMap<u32, Vec<NodeId>>,
}

pub fn analyse(d: &Domain) -> NetworkAnalysis {
    let mut problematic = BTreeSet::new();
    for node in d.nodes.iter() {
        if node.upper <= 1 {
            continue;
        }
        for (position, template) in node.templates.iter().enumerate() {
            let action = d.actions.get(template.action);
            for deleted in delete_effects(action) {
                if !mentions_agent(deleted) && read_by_other_template(d, node, position, deleted) {
                    if let Some(pred) = deleted.pred {
                        problematic.insert(pred);
                    }
                }
            }
        }
    }
    NetworkAnalysis {
        problematic,
        components: d.components(),
    }
}

fn mentions_agent(g: &Ground) -> bool {
    g.args.iter().any(|t| matches!(t, Term::Param(0)))
}

/// Every negated ground atom of the action's effect.
fn delete_effects(action: &Action) -> Vec<&Ground> {
    let mut dels = Vec::new();
    fn collect<'a>(cond: &'a Condition, dels: &mut Vec<&'a Ground>) {
        match cond {
            Condition::And(cs) => {
                for c in cs {
                    collect(c, dels);
                }
            }
            Condition::Forall(q) | Condition::Exists(q) => collect(&q.body, dels),
            Condition::When(_, body) => collect(body, dels),
            Condition::Not(inner) => {
                if let Condition::Ground(g) = inner.as_ref() {
                    dels.push(g);
                }
            }
            _ => {}
        }
    }
    if let Some(eff) = &action.eff {
        collect(eff, &mut dels);
    }
    dels
}

/// True if some other template of the node has `deleted`'s predicate among
/// its top-level precondition atoms, again away from the agent parameter.
fn read_by_other_template(d: &Domain, node: &NetworkNode, position: usize, deleted: &Ground) -> bool {
    for (i, template) in node.templates.iter().enumerate() {
        if i == position {
            continue;
        }
        let action = d.actions.get(template.action);
        let conjuncts = match action.pre.as_ref() {
            Some(pre) => match pre.as_and() {
                Some(cs) => cs,
                None => std::slice::from_ref(pre),
            },
            None => continue,
        };
        for c in conjuncts {
            if let Condition::Ground(g) = c {
                if g.name == deleted.name && !mentions_agent(g) {
                    return true;
                }
            }
        }
    }
    false
}

/// Compiles the network multi-agent model into a classical domain/instance
/// pair.
pub fn compile_network(d: &Domain, ins: &Instance) -> Res<(Domain, Instance)> {
    let analysis = analyse(d);
    let cd = compile_network_domain(d, &analysis)?;
    let cins = compile_network_instance(d, &cd, ins, &analysis)?;
    Ok((cd, cins))
}

pub fn compile_network_domain(d: &Domain, analysis: &NetworkAnalysis) -> Res<Domain> {
    let mut cd = Domain::new(d.name.clone());
    cd.requirements = Requirements {
        condeffects: true,
        typed: true,
        ..Default::default()
    };

    cd.types = d.types.clone();
    cd.create_type(COUNT_TYPE, None)?;
    cd.create_constant(ZERO_COUNT, COUNT_TYPE)?;

    add_network_predicates(d, &mut cd, analysis)?;
    add_component_actions(d, &mut cd, analysis)?;
    add_commit_actions(d, &mut cd, analysis)?;

    Ok(cd)
}

/// Size of the component a node belongs to.
fn component_len(analysis: &NetworkAnalysis, node: NodeId) -> usize {
    analysis
        .components
        .values()
        .find(|nodes| nodes.contains(&node))
        .map(|nodes| nodes.len())
        .unwrap_or(1)
}

fn add_network_predicates(d: &Domain, cd: &mut Domain, analysis: &NetworkAnalysis) -> Res<()> {
    for (id, pred) in d.preds.iter_with_id() {
        let param_types = d.type_names(&pred.params);
        cd.create_predicate(pred.name.clone(), &param_types)?;
        if analysis.problematic.contains(&id) {
            cd.create_predicate(format!("POS-{}", pred.name), &param_types)?;
            cd.create_predicate(format!("NEG-{}", pred.name), &param_types)?;
        }
    }
    cd.create_predicate("AFREE", &[])?;
    cd.create_predicate("ATEMP", &[])?;
    if cd.types.index_of(AGENT_TYPE).is_none() {
        return Err(SymbolError::unknown(SymbolKind::Type, AGENT_TYPE).into());
    }
    cd.create_predicate("TAKEN", &[Sym::from(AGENT_TYPE)])?;
    cd.create_predicate("CONSEC", &[Sym::from(COUNT_TYPE), Sym::from(COUNT_TYPE)])?;

    for (id, node) in d.nodes.iter_with_id() {
        let cc_len = component_len(analysis, id);
        if cc_len > 1 || node.upper > 1 {
            cd.create_predicate(format!("ACTIVE-{}", node.name), &d.type_names(&node.params))?;
            cd.create_predicate(format!("COUNT-{}", node.name), &[Sym::from(COUNT_TYPE)])?;
            cd.create_predicate(format!("SAT-{}", node.name), &[Sym::from(COUNT_TYPE)])?;
        }
        if cc_len > 1 {
            cd.create_predicate(format!("USED-{}", node.name), &[])?;
            cd.create_predicate(format!("DONE-{}", node.name), &[])?;
            cd.create_predicate(format!("SKIPPED-{}", node.name), &[])?;
        }
    }
    Ok(())
}

fn add_component_actions(d: &Domain, cd: &mut Domain, analysis: &NetworkAnalysis) -> Res<()> {
    for component in analysis.components.values() {
        let cc_len = component.len();
        let mut visited: hashbrown::HashSet<NodeId> = Default::default();

        for (j, &x) in component.iter().enumerate() {
            visited.insert(x);
            let node = d.nodes.get(x).clone();
            let size = node.params.len() as u32;
            let grouped = cc_len > 1 || node.upper > 1;

            if grouped {
                add_start_action(d, cd, component, &visited, j, &node, x, cc_len)?;
            }
            if cc_len > 1 {
                add_skip_action(d, cd, component, &visited, j, &node, x)?;
            }

            let mut concurrent_effects = false;
            for template in &node.templates {
                concurrent_effects |= add_do_action(d, cd, analysis, &node, template, grouped)?;
            }

            if grouped {
                add_end_action(cd, &node, cc_len, concurrent_effects)?;
            }
            if cc_len > 1 && j + 1 == cc_len {
                add_finish_action(d, cd, component, &node, size)?;
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn add_start_action(
    d: &Domain,
    cd: &mut Domain,
    component: &[NodeId],
    visited: &hashbrown::HashSet<NodeId>,
    j: usize,
    node: &NetworkNode,
    x: NodeId,
    cc_len: usize,
) -> Res<()> {
    let name = format!("START-{}", node.name);
    let size = node.params.len() as u32;
    cd.create_action(name.as_str(), &d.type_names(&node.params))?;

    if j > 0 {
        // positive dependence: visited predecessors must have run
        for &(from, to) in &d.edges {
            if to == x && visited.contains(&from) && from != x {
                cd.add_pre(false, &name, &format!("DONE-{}", d.nodes.get(from).name), smallvec![])?;
            }
        }
        let prev = d.nodes.get(component[j - 1]);
        cd.add_or_pre(
            &name,
            &format!("DONE-{}", prev.name),
            &format!("SKIPPED-{}", prev.name),
        )?;
        cd.add_pre(false, &name, &format!("ACTIVE-{}", prev.name), params(0..size))?;
        cd.add_pre(true, &name, &format!("USED-{}", node.name), smallvec![])?;
    } else {
        cd.add_pre(false, &name, "AFREE", smallvec![])?;
    }

    if j < 1 {
        cd.add_eff(true, &name, "AFREE", smallvec![])?;
    }
    cd.add_eff(false, &name, &format!("ACTIVE-{}", node.name), params(0..size))?;
    cd.add_eff(
        false,
        &name,
        &format!("COUNT-{}", node.name),
        smallvec![Term::Object(Sym::from(ZERO_COUNT))],
    )?;
    if cc_len > 1 {
        cd.add_eff(false, &name, &format!("USED-{}", node.name), smallvec![])?;
    }
    Ok(())
}

fn add_skip_action(
    d: &Domain,
    cd: &mut Domain,
    component: &[NodeId],
    visited: &hashbrown::HashSet<NodeId>,
    j: usize,
    node: &NetworkNode,
    x: NodeId,
) -> Res<()> {
    let name = format!("SKIP-{}", node.name);
    let size = node.params.len() as u32;
    cd.create_action(name.as_str(), &d.type_names(&node.params))?;

    if j > 0 {
        // skipping a node forces its visited successors to be skipped too
        for &(from, to) in &d.edges {
            if from == x && visited.contains(&to) && to != x {
                cd.add_pre(false, &name, &format!("SKIPPED-{}", d.nodes.get(to).name), smallvec![])?;
            }
        }
        let prev = d.nodes.get(component[j - 1]);
        cd.add_or_pre(
            &name,
            &format!("DONE-{}", prev.name),
            &format!("SKIPPED-{}", prev.name),
        )?;
        cd.add_pre(false, &name, &format!("ACTIVE-{}", prev.name), params(0..size))?;
        cd.add_pre(true, &name, &format!("USED-{}", node.name), smallvec![])?;
    } else {
        cd.add_pre(false, &name, "AFREE", smallvec![])?;
    }

    if j == 0 {
        cd.add_eff(true, &name, "AFREE", smallvec![])?;
    }
    cd.add_eff(false, &name, &format!("ACTIVE-{}", node.name), params(0..size))?;
    cd.add_eff(false, &name, &format!("SKIPPED-{}", node.name), smallvec![])?;
    cd.add_eff(false, &name, &format!("USED-{}", node.name), smallvec![])?;
    Ok(())
}

/// Emits `DO-A` for one template; returns true when some effect was deferred
/// to `POS-`/`NEG-` bookkeeping.
fn add_do_action(
    d: &Domain,
    cd: &mut Domain,
    analysis: &NetworkAnalysis,
    node: &NetworkNode,
    template: &Template,
    grouped: bool,
) -> Res<bool> {
    let action = d.actions.get(template.action);
    let name = format!("DO-{}", action.name);
    let size = action.params.len() as u32;
    let id = cd.create_action(name.as_str(), &d.type_names(&action.params))?;

    // the original precondition survives verbatim
    let copied_pre = match action.pre.as_ref() {
        Some(Condition::And(cs)) => {
            let mut copies = Vec::with_capacity(cs.len());
            for c in cs {
                copies.push(c.copied_into(cd)?);
            }
            Condition::And(copies)
        }
        Some(other) => Condition::And(vec![other.copied_into(cd)?]),
        None => Condition::and(),
    };
    cd.actions.get_mut(id).pre = Some(copied_pre);

    // effects: writes to problematic fluents are deferred
    let mut concurrent_effects = false;
    if let Some(eff) = &action.eff {
        let conjuncts = match eff.as_and() {
            Some(cs) => cs,
            None => std::slice::from_ref(eff),
        };
        for c in conjuncts {
            concurrent_effects |= add_deferred_eff(cd, analysis, &name, c)?;
        }
    }

    if grouped {
        cd.add_params(&name, &[Sym::from(COUNT_TYPE), Sym::from(COUNT_TYPE)])?;
        let mapped: SmallVec<[Term; 4]> = template.params.iter().map(|&p| Term::Param(p)).collect();
        cd.add_pre(false, &name, &format!("ACTIVE-{}", node.name), mapped)?;
        cd.add_pre(true, &name, "TAKEN", params(0..1))?;
        cd.add_pre(false, &name, &format!("COUNT-{}", node.name), params(size..size + 1))?;
        cd.add_pre(false, &name, "CONSEC", params(size..size + 2))?;

        cd.add_eff(false, &name, "TAKEN", params(0..1))?;
        cd.add_eff(true, &name, &format!("COUNT-{}", node.name), params(size..size + 1))?;
        cd.add_eff(false, &name, &format!("COUNT-{}", node.name), params(size + 1..size + 2))?;
    } else {
        cd.add_pre(false, &name, "AFREE", smallvec![])?;
    }
    Ok(concurrent_effects)
}

/// Adds one effect conjunct, redirecting problematic writes to the
/// bookkeeping predicates. Returns true if a redirection happened.
fn add_deferred_eff(cd: &mut Domain, analysis: &NetworkAnalysis, action: &str, c: &Condition) -> Res<bool> {
    match c {
        Condition::Not(inner) => {
            if let Condition::Ground(g) = inner.as_ref() {
                if g.pred.is_some_and(|p| analysis.problematic.contains(&p)) {
                    cd.add_eff(false, action, &format!("NEG-{}", g.name), g.args.clone())?;
                    return Ok(true);
                }
                cd.add_eff(true, action, g.name.canonical_str(), g.args.clone())?;
                return Ok(false);
            }
            cd.add_eff_cond(action, c.copied_into(cd)?)?;
            Ok(false)
        }
        Condition::Ground(g) => {
            if g.pred.is_some_and(|p| analysis.problematic.contains(&p)) {
                cd.add_eff(false, action, &format!("POS-{}", g.name), g.args.clone())?;
                return Ok(true);
            }
            cd.add_eff(false, action, g.name.canonical_str(), g.args.clone())?;
            Ok(false)
        }
        other => {
            cd.add_eff_cond(action, other.copied_into(cd)?)?;
            Ok(false)
        }
    }
}

fn add_end_action(cd: &mut Domain, node: &NetworkNode, cc_len: usize, concurrent_effects: bool) -> Res<()> {
    let name = format!("END-{}", node.name);
    let size = node.params.len() as u32;
    let mut param_types = cd.type_names(&node.params);
    param_types.push(Sym::from(COUNT_TYPE));
    cd.create_action(name.as_str(), &param_types)?;

    cd.add_pre(false, &name, &format!("COUNT-{}", node.name), params(size..size + 1))?;
    cd.add_pre(false, &name, &format!("SAT-{}", node.name), params(size..size + 1))?;
    cd.add_pre(false, &name, &format!("ACTIVE-{}", node.name), params(0..size))?;

    cd.add_eff(true, &name, &format!("COUNT-{}", node.name), params(size..size + 1))?;
    if cc_len > 1 {
        cd.add_eff(false, &name, &format!("DONE-{}", node.name), smallvec![])?;
    } else {
        cd.add_eff(
            false,
            &name,
            if concurrent_effects { "ATEMP" } else { "AFREE" },
            smallvec![],
        )?;
        cd.add_eff(true, &name, &format!("ACTIVE-{}", node.name), params(0..size))?;
        add_release_all_agents(cd, &name, size + 1)?;
    }
    Ok(())
}

fn add_finish_action(d: &Domain, cd: &mut Domain, component: &[NodeId], node: &NetworkNode, size: u32) -> Res<()> {
    let name = format!("FINISH-{}", node.name);
    cd.create_action(name.as_str(), &d.type_names(&node.params))?;

    cd.add_or_pre(
        &name,
        &format!("DONE-{}", node.name),
        &format!("SKIPPED-{}", node.name),
    )?;
    cd.add_pre(false, &name, &format!("ACTIVE-{}", node.name), params(0..size))?;

    cd.add_eff(false, &name, "ATEMP", smallvec![])?;
    for &k in component {
        let other = d.nodes.get(k);
        cd.add_eff(true, &name, &format!("DONE-{}", other.name), smallvec![])?;
        cd.add_eff(true, &name, &format!("SKIPPED-{}", other.name), smallvec![])?;
        cd.add_eff(true, &name, &format!("USED-{}", other.name), smallvec![])?;
        cd.add_eff(true, &name, &format!("ACTIVE-{}", other.name), params(0..size))?;
    }
    add_release_all_agents(cd, &name, size)
}

/// `forall (?a - AGENT) (not (TAKEN ?a))` as an effect.
fn add_release_all_agents(cd: &mut Domain, action: &str, agent_param: u32) -> Res<()> {
    let agent = cd
        .types
        .index_of(AGENT_TYPE)
        .ok_or_else(|| SymbolError::unknown(SymbolKind::Type, AGENT_TYPE))?;
    let taken = cd.preds.resolve(&Sym::from("TAKEN"))?;
    let release = Condition::Forall(Quantifier {
        params: vec![agent],
        body: Box::new(Condition::not(Condition::Ground(Ground::new(
            "TAKEN",
            taken,
            params(agent_param..agent_param + 1),
        )))),
    });
    Ok(cd.add_eff_cond(action, release)?)
}

/// `ADD-p` / `DELETE-p` commit the deferred bookkeeping, and `FREE` closes
/// the commit window.
fn add_commit_actions(d: &Domain, cd: &mut Domain, analysis: &NetworkAnalysis) -> Res<()> {
    for &pred in &analysis.problematic {
        let p = d.preds.get(pred);
        let size = p.params.len() as u32;
        let types = d.type_names(&p.params);

        let name = format!("ADD-{}", p.name);
        cd.create_action(name.as_str(), &types)?;
        cd.add_pre(false, &name, "ATEMP", smallvec![])?;
        cd.add_pre(false, &name, &format!("POS-{}", p.name), params(0..size))?;
        cd.add_pre(true, &name, &format!("NEG-{}", p.name), params(0..size))?;
        cd.add_eff(false, &name, p.name.canonical_str(), params(0..size))?;
        cd.add_eff(true, &name, &format!("POS-{}", p.name), params(0..size))?;

        let name = format!("DELETE-{}", p.name);
        cd.create_action(name.as_str(), &types)?;
        cd.add_pre(false, &name, "ATEMP", smallvec![])?;
        cd.add_pre(true, &name, &format!("POS-{}", p.name), params(0..size))?;
        cd.add_pre(false, &name, &format!("NEG-{}", p.name), params(0..size))?;
        cd.add_eff(true, &name, p.name.canonical_str(), params(0..size))?;
        cd.add_eff(true, &name, &format!("NEG-{}", p.name), params(0..size))?;
    }

    cd.create_action("FREE", &[])?;
    cd.add_pre(false, "FREE", "ATEMP", smallvec![])?;
    for &pred in &analysis.problematic {
        let p = d.preds.get(pred);
        let size = p.params.len() as u32;
        let pos = cd.preds.resolve(&Sym::from(format!("POS-{}", p.name)))?;
        let neg = cd.preds.resolve(&Sym::from(format!("NEG-{}", p.name)))?;
        let none_left = Condition::Forall(Quantifier {
            params: cd.convert_types(&d.type_names(&p.params))?,
            body: Box::new(Condition::And(vec![
                Condition::not(Condition::Ground(Ground::new(
                    format!("POS-{}", p.name),
                    pos,
                    params(0..size),
                ))),
                Condition::not(Condition::Ground(Ground::new(
                    format!("NEG-{}", p.name),
                    neg,
                    params(0..size),
                ))),
            ])),
        });
        cd.add_pre_cond("FREE", none_left)?;
    }
    cd.add_eff(false, "FREE", "AFREE", smallvec![])?;
    cd.add_eff(true, "FREE", "ATEMP", smallvec![])?;
    Ok(())
}

pub fn compile_network_instance(
    d: &Domain,
    cd: &Domain,
    ins: &Instance,
    analysis: &NetworkAnalysis,
) -> Res<Instance> {
    let mut cins = Instance::new(ins.name.clone(), cd.name.clone());

    for (name, tpe) in ins.objects() {
        cins.add_object(name.clone(), *tpe)?;
    }

    let agent = d
        .types
        .index_of(AGENT_TYPE)
        .ok_or_else(|| SymbolError::unknown(SymbolKind::Type, AGENT_TYPE))?;
    let nagents = ins.objects_of(d, agent).len();

    // counters ACOUNT-0 ... ACOUNT-n; ACOUNT-0 is a domain constant
    let count_type = cd
        .types
        .index_of(COUNT_TYPE)
        .ok_or_else(|| SymbolError::unknown(SymbolKind::Type, COUNT_TYPE))?;
    let mut counts: Vec<Sym> = vec![Sym::from(ZERO_COUNT)];
    for i in 1..=nagents {
        let name = Sym::from(format!("ACOUNT-{i}"));
        counts.push(name.clone());
        cins.add_object(name, count_type)?;
    }

    for fact in &ins.init {
        if let InitFact::Atom(atom) = fact {
            if d.preds.index_of(atom.name.canonical_str()).is_some() {
                cins.add_init(atom.name.clone(), atom.args.clone());
            }
        }
    }
    cins.add_init("AFREE", vec![]);
    for i in 1..=nagents {
        cins.add_init("CONSEC", vec![counts[i - 1].clone(), counts[i].clone()]);
    }
    for (id, node) in d.nodes.iter_with_id() {
        let cc_len = component_len(analysis, id);
        if cc_len > 1 || node.upper > 1 {
            let mut j = node.lower;
            while j <= node.upper && (j as usize) <= nagents {
                cins.add_init(format!("SAT-{}", node.name), vec![counts[j as usize].clone()]);
                j += 1;
            }
        }
    }

    for goal in &ins.goal {
        cins.add_goal(goal.name.clone(), goal.args.clone());
    }
    cins.add_goal("AFREE", vec![]);

    Ok(cins)
}
