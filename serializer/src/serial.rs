//! Serial-concurrency compilation: every source action becomes a
//! `SELECT`/`DO`/`END` micro-sequence gated by the four-state phase machine
//! `FREE-BLOCK -> SELECTING -> APPLYING -> RESETTING`.

use crate::classify::{Classification, classify};
use crate::infer::AGENT_TYPE;
use mapddl::*;
use smallvec::smallvec;

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOptions {
    /// Agents act in a fixed round-robin order (`-o`).
    pub agent_order: bool,
    /// Maximum number of atomic actions per joint action (`-j`).
    pub max_joint_action_size: Option<u32>,
}

const ORDER_COUNT_TYPE: &str = "AGENT-ORDER-COUNT";
const ATOMIC_COUNT_TYPE: &str = "ATOMIC-ACTION-COUNT";

/// Inserts the `NOOP` action letting an agent pass its turn under the
/// agent-order option. The action joins the source domain before
/// classification and therefore gets the full `SELECT`/`DO`/`END` family.
pub fn add_noop_action(d: &mut Domain) -> Res<()> {
    let agent = d
        .types
        .index_of(AGENT_TYPE)
        .ok_or_else(|| SymbolError::unknown(SymbolKind::Type, AGENT_TYPE))?;
    let id = d.actions.push(Action {
        name: "NOOP".into(),
        params: vec![agent],
        pre: Some(Condition::and()),
        eff: Some(Condition::and()),
    })?;
    d.add_concurrency_predicate_from_action(id)?;
    Ok(())
}

/// Compiles the multi-agent domain into an equivalent classical one.
pub fn compile_serial(d: &Domain, opts: &SerialOptions) -> Res<Domain> {
    let mut cd = Domain::new(d.name.clone());
    cd.requirements = Requirements {
        equality: true,
        strips: true,
        costs: d.requirements.costs,
        adl: true,
        neg: true,
        condeffects: true,
        typed: true,
        ..Default::default()
    };

    add_types(d, &mut cd, opts)?;
    add_functions(d, &mut cd)?;
    add_predicates(d, &mut cd, opts)?;
    add_actions(d, &mut cd, opts)?;

    Ok(cd)
}

fn add_types(d: &Domain, cd: &mut Domain, opts: &SerialOptions) -> Res<()> {
    // the clone preserves type indices, keeping source parameter lists valid
    cd.types = d.types.clone();
    if opts.agent_order {
        cd.create_type(ORDER_COUNT_TYPE, None)?;
    }
    if opts.max_joint_action_size.is_some() {
        cd.create_type(ATOMIC_COUNT_TYPE, None)?;
    }
    Ok(())
}

fn add_functions(d: &Domain, cd: &mut Domain) -> Res<()> {
    for func in d.funcs.iter() {
        cd.create_function(func.name.clone(), &d.type_names(&func.params))?;
    }
    Ok(())
}

fn add_predicates(d: &Domain, cd: &mut Domain, opts: &SerialOptions) -> Res<()> {
    // phase machine and per-agent bookkeeping
    cd.create_predicate("FREE-BLOCK", &[])?;
    cd.create_predicate("SELECTING", &[])?;
    cd.create_predicate("APPLYING", &[])?;
    cd.create_predicate("RESETTING", &[])?;
    if cd.types.index_of(AGENT_TYPE).is_none() {
        return Err(SymbolError::unknown(SymbolKind::Type, AGENT_TYPE).into());
    }
    let agent = [Sym::from(AGENT_TYPE)];
    cd.create_predicate("FREE-AGENT", &agent)?;
    cd.create_predicate("BUSY-AGENT", &agent)?;
    cd.create_predicate("DONE-AGENT", &agent)?;

    // original predicates; each concurrency predicate is replaced by its
    // ACTIVE-/REQ-NEG- pair
    for (id, pred) in d.preds.iter_with_id() {
        let param_types = d.type_names(&pred.params);
        if d.cpreds.iter().any(|c| c == id) {
            cd.create_predicate(format!("ACTIVE-{}", pred.name), &param_types)?;
            cd.create_predicate(format!("REQ-NEG-{}", pred.name), &param_types)?;
        } else {
            cd.create_predicate(pred.name.clone(), &param_types)?;
        }
    }

    if opts.agent_order {
        let order = Sym::from(ORDER_COUNT_TYPE);
        cd.create_predicate("AGENT-ORDER", &[Sym::from(AGENT_TYPE), order.clone()])?;
        cd.create_predicate("PREV-AGENT-ORDER-COUNT", &[order.clone(), order.clone()])?;
        cd.create_predicate("NEXT-AGENT-ORDER-COUNT", &[order.clone(), order.clone()])?;
        cd.create_predicate("CURRENT-AGENT-ORDER-COUNT", &[order])?;
    }
    if opts.max_joint_action_size.is_some() {
        let atomic = Sym::from(ATOMIC_COUNT_TYPE);
        cd.create_predicate("PREV-ATOMIC-ACTION-COUNT", &[atomic.clone(), atomic.clone()])?;
        cd.create_predicate("NEXT-ATOMIC-ACTION-COUNT", &[atomic.clone(), atomic.clone()])?;
        cd.create_predicate("CURRENT-ATOMIC-ACTION-COUNT", &[atomic])?;
    }
    Ok(())
}

fn add_actions(d: &Domain, cd: &mut Domain, opts: &SerialOptions) -> Res<()> {
    add_phase_actions(cd)?;

    for action in d.actions.iter() {
        let classif = classify(d, cd, action)?;
        add_select_action(d, cd, action, opts, &classif)?;
        add_do_action(d, cd, action, &classif)?;
        add_end_action(d, cd, action, opts, &classif)?;
    }
    Ok(())
}

fn add_phase_actions(cd: &mut Domain) -> Res<()> {
    cd.create_action("START", &[])?;
    cd.add_pre(false, "START", "FREE-BLOCK", smallvec![])?;
    cd.add_eff(true, "START", "FREE-BLOCK", smallvec![])?;
    cd.add_eff(false, "START", "SELECTING", smallvec![])?;

    cd.create_action("APPLY", &[])?;
    cd.add_pre(false, "APPLY", "SELECTING", smallvec![])?;
    cd.add_eff(true, "APPLY", "SELECTING", smallvec![])?;
    cd.add_eff(false, "APPLY", "APPLYING", smallvec![])?;

    cd.create_action("RESET", &[])?;
    cd.add_pre(false, "RESET", "APPLYING", smallvec![])?;
    cd.add_eff(true, "RESET", "APPLYING", smallvec![])?;
    cd.add_eff(false, "RESET", "RESETTING", smallvec![])?;

    // the block only closes once every agent has been released
    cd.create_action("FINISH", &[])?;
    cd.add_pre(false, "FINISH", "RESETTING", smallvec![])?;
    cd.add_eff(true, "FINISH", "RESETTING", smallvec![])?;
    cd.add_eff(false, "FINISH", "FREE-BLOCK", smallvec![])?;
    let agent = cd
        .types
        .index_of(AGENT_TYPE)
        .ok_or_else(|| SymbolError::unknown(SymbolKind::Type, AGENT_TYPE))?;
    let free = cd.preds.resolve(&Sym::from("FREE-AGENT"))?;
    let all_free = Condition::Forall(Quantifier {
        params: vec![agent],
        body: Box::new(Condition::Ground(Ground::new("FREE-AGENT", free, params(0..1)))),
    });
    cd.add_pre_cond("FINISH", all_free)?;
    Ok(())
}

/// Rewrites every concurrency-predicate ground to its `prefix`-ed replacement
/// (wrapped in `Not` when `negate` holds) and re-binds all other references
/// against the target environment. Wrappers are traversed; `increase` effects
/// are re-bound untouched.
fn replace_concurrency_predicates(
    d: &Domain,
    cd: &Domain,
    cond: Condition,
    prefix: &str,
    negate: bool,
) -> Res<Condition> {
    let replaced = match cond {
        Condition::And(cs) => Condition::And(
            cs.into_iter()
                .map(|c| replace_concurrency_predicates(d, cd, c, prefix, negate))
                .collect::<Res<Vec<_>>>()?,
        ),
        Condition::Exists(q) => Condition::Exists(Quantifier {
            params: q.params,
            body: Box::new(replace_concurrency_predicates(d, cd, *q.body, prefix, negate)?),
        }),
        Condition::Forall(q) => Condition::Forall(Quantifier {
            params: q.params,
            body: Box::new(replace_concurrency_predicates(d, cd, *q.body, prefix, negate)?),
        }),
        inc @ Condition::Increase(_) => inc.copied_into(cd)?,
        Condition::Not(inner) => {
            Condition::not(replace_concurrency_predicates(d, cd, *inner, prefix, negate)?)
        }
        Condition::Ground(g) => {
            if d.cpreds.contains(g.name.canonical_str()) {
                let name = format!("{prefix}{}", g.name);
                let pred = cd
                    .preds
                    .index_of(&name)
                    .ok_or_else(|| SymbolError::unknown(SymbolKind::Predicate, name.as_str()))?;
                let rewritten = Condition::Ground(Ground::new(name, pred, g.args));
                if negate {
                    Condition::not(rewritten)
                } else {
                    rewritten
                }
            } else {
                Condition::Ground(g.copied_into(cd)?)
            }
        }
        Condition::Or(a, b) => Condition::Or(
            Box::new(replace_concurrency_predicates(d, cd, *a, prefix, negate)?),
            Box::new(replace_concurrency_predicates(d, cd, *b, prefix, negate)?),
        ),
        Condition::When(pars, body) => Condition::When(
            Box::new(replace_concurrency_predicates(d, cd, *pars, prefix, negate)?),
            Box::new(replace_concurrency_predicates(d, cd, *body, prefix, negate)?),
        ),
        eq @ Condition::Equals(_, _) => eq,
    };
    Ok(replaced)
}

/// Appends the agent-order / joint-size counter plumbing shared by `SELECT`
/// and `END`; `relation` is `NEXT-` when selecting, `PREV-` when ending.
fn add_counter_params(
    cd: &mut Domain,
    name: &str,
    opts: &SerialOptions,
    num_action_params: u32,
    relation: &str,
) -> Res<()> {
    let mut n = num_action_params;
    if opts.agent_order {
        let order = Sym::from(ORDER_COUNT_TYPE);
        cd.add_params(name, &[order.clone(), order])?;
        if relation == "NEXT-" {
            cd.add_pre(false, name, "AGENT-ORDER", smallvec![Term::Param(0), Term::Param(n)])?;
        }
        cd.add_pre(false, name, &format!("{relation}AGENT-ORDER-COUNT"), params(n..n + 2))?;
        cd.add_pre(false, name, "CURRENT-AGENT-ORDER-COUNT", params(n..n + 1))?;
        cd.add_eff(true, name, "CURRENT-AGENT-ORDER-COUNT", params(n..n + 1))?;
        cd.add_eff(false, name, "CURRENT-AGENT-ORDER-COUNT", params(n + 1..n + 2))?;
        n += 2;
    }
    if opts.max_joint_action_size.is_some() {
        let atomic = Sym::from(ATOMIC_COUNT_TYPE);
        cd.add_params(name, &[atomic.clone(), atomic])?;
        cd.add_pre(false, name, &format!("{relation}ATOMIC-ACTION-COUNT"), params(n..n + 2))?;
        cd.add_pre(false, name, "CURRENT-ATOMIC-ACTION-COUNT", params(n..n + 1))?;
        cd.add_eff(true, name, "CURRENT-ATOMIC-ACTION-COUNT", params(n..n + 1))?;
        cd.add_eff(false, name, "CURRENT-ATOMIC-ACTION-COUNT", params(n + 1..n + 2))?;
    }
    Ok(())
}

fn add_select_action(
    d: &Domain,
    cd: &mut Domain,
    original: &Action,
    opts: &SerialOptions,
    classif: &Classification,
) -> Res<()> {
    let name = format!("SELECT-{}", original.name);
    let k = original.params.len() as u32;
    cd.create_action(name.as_str(), &d.type_names(&original.params))?;

    cd.add_pre(false, &name, "SELECTING", smallvec![])?;
    cd.add_pre(false, &name, "FREE-AGENT", params(0..1))?;
    cd.add_pre(true, &name, &format!("REQ-NEG-{}", original.name), params(0..k))?;
    for cond in &classif.normal {
        cd.add_pre_cond(&name, cond.clone())?;
    }
    // an agent may not select an action whose negated co-actions are running
    for cond in &classif.neg_concurrency {
        let replaced = replace_concurrency_predicates(d, cd, cond.clone(), "ACTIVE-", true)?;
        cd.add_pre_cond(&name, replaced)?;
    }

    cd.add_eff(true, &name, "FREE-AGENT", params(0..1))?;
    cd.add_eff(false, &name, "BUSY-AGENT", params(0..1))?;
    cd.add_eff(false, &name, &format!("ACTIVE-{}", original.name), params(0..k))?;
    // publish the negated co-actions so that later selections are blocked
    for cond in &classif.neg_concurrency {
        let replaced = replace_concurrency_predicates(d, cd, cond.clone(), "REQ-NEG-", false)?;
        cd.add_eff_cond(&name, replaced)?;
    }

    add_counter_params(cd, &name, opts, k, "NEXT-")
}

fn add_do_action(d: &Domain, cd: &mut Domain, original: &Action, classif: &Classification) -> Res<()> {
    let name = format!("DO-{}", original.name);
    let k = original.params.len() as u32;
    cd.create_action(name.as_str(), &d.type_names(&original.params))?;

    cd.add_pre(false, &name, "APPLYING", smallvec![])?;
    cd.add_pre(false, &name, "BUSY-AGENT", params(0..1))?;
    cd.add_pre(false, &name, &format!("ACTIVE-{}", original.name), params(0..k))?;
    for cond in &classif.pos_concurrency {
        let replaced = replace_concurrency_predicates(d, cd, cond.clone(), "ACTIVE-", false)?;
        cd.add_pre_cond(&name, replaced)?;
    }

    cd.add_eff(true, &name, "BUSY-AGENT", params(0..1))?;
    cd.add_eff(false, &name, "DONE-AGENT", params(0..1))?;

    // the original effect fires exactly once, here
    match original.eff.as_ref() {
        Some(eff) => match eff.as_and() {
            Some(conjuncts) => {
                for c in conjuncts {
                    cd.add_eff_cond(&name, c.copied_into(d)?)?;
                }
            }
            None => cd.add_eff_cond(&name, eff.copied_into(d)?)?,
        },
        None => {}
    }
    let id = cd.actions.resolve(&Sym::from(name.as_str()))?;
    let eff = cd
        .actions
        .get_mut(id)
        .eff
        .take()
        .unwrap_or_else(Condition::and);
    let eff = replace_concurrency_predicates(d, cd, eff, "ACTIVE-", false)?;
    cd.actions.get_mut(id).eff = Some(eff);
    Ok(())
}

fn add_end_action(
    d: &Domain,
    cd: &mut Domain,
    original: &Action,
    opts: &SerialOptions,
    classif: &Classification,
) -> Res<()> {
    let name = format!("END-{}", original.name);
    let k = original.params.len() as u32;
    cd.create_action(name.as_str(), &d.type_names(&original.params))?;

    cd.add_pre(false, &name, "RESETTING", smallvec![])?;
    cd.add_pre(false, &name, "DONE-AGENT", params(0..1))?;
    cd.add_pre(false, &name, &format!("ACTIVE-{}", original.name), params(0..k))?;

    cd.add_eff(true, &name, "DONE-AGENT", params(0..1))?;
    cd.add_eff(false, &name, "FREE-AGENT", params(0..1))?;
    cd.add_eff(true, &name, &format!("ACTIVE-{}", original.name), params(0..k))?;
    // withdraw the negative-concurrency claims taken by SELECT
    for cond in &classif.neg_concurrency {
        let replaced = replace_concurrency_predicates(d, cd, cond.clone(), "REQ-NEG-", true)?;
        cd.add_eff_cond(&name, replaced)?;
    }

    add_counter_params(cd, &name, opts, k, "PREV-")
}

/// Rewrites the instance against the compiled domain: phase seeding, one
/// `FREE-AGENT` per agent object, counter objects and their chains.
pub fn compile_serial_instance(
    d: &Domain,
    cd: &Domain,
    ins: &Instance,
    opts: &SerialOptions,
) -> Res<Instance> {
    let mut cins = Instance::new(ins.name.clone(), cd.name.clone());
    cins.metric = ins.metric.clone();

    for (name, tpe) in ins.objects() {
        cins.add_object(name.clone(), *tpe)?;
    }

    let agent = cd
        .types
        .index_of(AGENT_TYPE)
        .ok_or_else(|| SymbolError::unknown(SymbolKind::Type, AGENT_TYPE))?;
    let agents = cins.objects_of(cd, agent);

    cins.add_init("FREE-BLOCK", vec![]);
    for a in &agents {
        cins.add_init("FREE-AGENT", vec![a.clone()]);
    }
    for fact in &ins.init {
        match fact {
            InitFact::Atom(atom) => {
                if cd.preds.index_of(atom.name.canonical_str()).is_some() {
                    cins.add_init(atom.name.clone(), atom.args.clone());
                }
            }
            InitFact::Num(func, value) => {
                cins.add_init_num(func.name.clone(), func.args.clone(), *value);
            }
        }
    }

    cins.add_goal("FREE-BLOCK", vec![]);
    for goal in &ins.goal {
        cins.add_goal(goal.name.clone(), goal.args.clone());
    }

    if opts.agent_order {
        let order = cd
            .types
            .index_of(ORDER_COUNT_TYPE)
            .ok_or_else(|| SymbolError::unknown(SymbolKind::Type, ORDER_COUNT_TYPE))?;
        for i in 1..=agents.len() + 1 {
            cins.add_object(format!("AGENT-COUNT{i}"), order)?;
        }
        if !agents.is_empty() {
            cins.add_init("CURRENT-AGENT-ORDER-COUNT", vec!["AGENT-COUNT1".into()]);
        }
        for i in 1..=agents.len() {
            let current = Sym::from(format!("AGENT-COUNT{i}"));
            let next = Sym::from(format!("AGENT-COUNT{}", i + 1));
            cins.add_init("AGENT-ORDER", vec![agents[i - 1].clone(), current.clone()]);
            cins.add_init("NEXT-AGENT-ORDER-COUNT", vec![current.clone(), next.clone()]);
            cins.add_init("PREV-AGENT-ORDER-COUNT", vec![next, current]);
        }
    }

    if let Some(max) = opts.max_joint_action_size {
        let atomic = cd
            .types
            .index_of(ATOMIC_COUNT_TYPE)
            .ok_or_else(|| SymbolError::unknown(SymbolKind::Type, ATOMIC_COUNT_TYPE))?;
        for i in 0..=max {
            cins.add_object(format!("ATOMIC-COUNT{i}"), atomic)?;
        }
        cins.add_init("CURRENT-ATOMIC-ACTION-COUNT", vec!["ATOMIC-COUNT0".into()]);
        for i in 0..max {
            let current = Sym::from(format!("ATOMIC-COUNT{i}"));
            let next = Sym::from(format!("ATOMIC-COUNT{}", i + 1));
            cins.add_init("NEXT-ATOMIC-ACTION-COUNT", vec![current.clone(), next.clone()]);
            cins.add_init("PREV-ATOMIC-ACTION-COUNT", vec![next, current]);
        }
    }

    Ok(cins)
}
