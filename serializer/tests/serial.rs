use std::path::Path;

use mapddl::parser::{parse_pddl_domain, parse_pddl_problem};
use mapddl::*;
use serializer::*;

fn load_domain(path: &str) -> Domain {
    let input = Input::from_file(Path::new(path)).unwrap();
    let parsed = parse_pddl_domain(input).unwrap();
    let mut d = build_concurrency_domain(&parsed).unwrap();
    infer_agent_type(&mut d);
    d
}

fn load_problem(path: &str, d: &Domain) -> Instance {
    let input = Input::from_file(Path::new(path)).unwrap();
    let parsed = parse_pddl_problem(input).unwrap();
    build_instance(&parsed, d).unwrap()
}

fn maze() -> (Domain, Instance) {
    let d = load_domain("../problems/maze/maze_dom_cal.pddl");
    let ins = load_problem("../problems/maze/maze2_2.pddl", &d);
    (d, ins)
}

fn action<'a>(d: &'a Domain, name: &str) -> &'a Action {
    d.actions.get(d.actions.index_of(name).unwrap())
}

fn conjuncts(cond: Option<&Condition>) -> &[Condition] {
    cond.unwrap().as_and().unwrap()
}

fn ground_named<'a>(cond: &'a Condition, name: &str) -> Option<&'a Ground> {
    cond.as_ground().filter(|g| g.name.canonical_str() == name)
}

#[test]
fn source_domain_mirrors_each_action_with_a_concurrency_predicate() {
    let (d, _) = maze();
    assert!(d.cpreds.contains("MOVE"));
    assert!(d.cpreds.contains("PUSH"));
    // the concurrency predicates are part of the global predicate table
    let push = d.cpreds.index_of("PUSH").unwrap();
    assert_eq!(d.preds.get(push).params.len(), 4);
    // forward references were all bound to their action
    for a in d.actions.iter() {
        for cond in a.pre.iter().chain(a.eff.iter()) {
            cond.for_each_ground(&mut |g| assert!(g.pred.is_some(), "unresolved ground {}", g.name));
        }
    }
}

#[test]
fn compiles_exactly_three_actions_per_source_action() {
    let (d, _) = maze();
    let cd = compile_serial(&d, &SerialOptions::default()).unwrap();
    let names: Vec<&str> = cd.actions.iter().map(|a| a.name.canonical_str()).collect();
    assert_eq!(
        names,
        vec![
            "START",
            "APPLY",
            "RESET",
            "FINISH",
            "SELECT-MOVE",
            "DO-MOVE",
            "END-MOVE",
            "SELECT-PUSH",
            "DO-PUSH",
            "END-PUSH",
        ]
    );
}

#[test]
fn concurrency_predicates_leave_only_prefixed_replacements() {
    let (d, _) = maze();
    let cd = compile_serial(&d, &SerialOptions::default()).unwrap();
    for name in ["MOVE", "PUSH"] {
        assert!(cd.preds.index_of(name).is_none(), "unprefixed {name} survived");
        assert!(cd.preds.index_of(&format!("ACTIVE-{name}")).is_some());
        assert!(cd.preds.index_of(&format!("REQ-NEG-{name}")).is_some());
    }
    for name in ["FREE-BLOCK", "SELECTING", "APPLYING", "RESETTING", "FREE-AGENT", "BUSY-AGENT", "DONE-AGENT"] {
        assert!(cd.preds.index_of(name).is_some(), "missing {name}");
    }
    for name in ["AT", "CONNECTED", "DOOR-AT", "OPEN"] {
        assert!(cd.preds.index_of(name).is_some(), "missing original {name}");
    }
}

#[test]
fn select_precondition_is_the_documented_union() {
    let (d, _) = maze();
    let cd = compile_serial(&d, &SerialOptions::default()).unwrap();
    let select = action(&cd, "SELECT-MOVE");
    let pre = conjuncts(select.pre.as_ref());
    assert_eq!(pre.len(), 6);

    assert!(ground_named(&pre[0], "SELECTING").is_some());
    let free = ground_named(&pre[1], "FREE-AGENT").unwrap();
    assert_eq!(free.args.as_slice(), &[Term::Param(0)]);
    match &pre[2] {
        Condition::Not(inner) => {
            let g = ground_named(inner, "REQ-NEG-MOVE").unwrap();
            assert_eq!(g.args.as_slice(), &[Term::Param(0), Term::Param(1), Term::Param(2)]);
        }
        other => panic!("expected the REQ-NEG guard, got {other:?}"),
    }
    assert!(ground_named(&pre[3], "AT").is_some());
    assert!(ground_named(&pre[4], "CONNECTED").is_some());
    // the negative-concurrency forall, rewritten to the ACTIVE- replacement
    match &pre[5] {
        Condition::Forall(q) => match q.body.as_ref() {
            Condition::And(cs) => match &cs[0] {
                Condition::Not(inner) => {
                    let g = ground_named(inner, "ACTIVE-PUSH").unwrap();
                    assert_eq!(
                        g.args.as_slice(),
                        &[Term::Param(0), Term::Param(3), Term::Param(1), Term::Param(2)]
                    );
                }
                other => panic!("expected a negated ACTIVE-PUSH, got {other:?}"),
            },
            other => panic!("expected a conjunction, got {other:?}"),
        },
        other => panic!("expected a forall, got {other:?}"),
    }
}

#[test]
fn select_publishes_and_end_withdraws_the_negative_claims() {
    let (d, _) = maze();
    let cd = compile_serial(&d, &SerialOptions::default()).unwrap();

    let select_eff = conjuncts(action(&cd, "SELECT-MOVE").eff.as_ref());
    assert_eq!(select_eff.len(), 4);
    assert!(matches!(&select_eff[0], Condition::Not(inner) if ground_named(inner, "FREE-AGENT").is_some()));
    assert!(ground_named(&select_eff[1], "BUSY-AGENT").is_some());
    assert!(ground_named(&select_eff[2], "ACTIVE-MOVE").is_some());
    match &select_eff[3] {
        Condition::Forall(q) => {
            let body = q.body.as_and().unwrap();
            assert!(ground_named(&body[0], "REQ-NEG-PUSH").is_some());
        }
        other => panic!("expected the REQ-NEG forall, got {other:?}"),
    }

    let end_eff = conjuncts(action(&cd, "END-MOVE").eff.as_ref());
    assert!(matches!(&end_eff[0], Condition::Not(inner) if ground_named(inner, "DONE-AGENT").is_some()));
    assert!(ground_named(&end_eff[1], "FREE-AGENT").is_some());
    assert!(matches!(&end_eff[2], Condition::Not(inner) if ground_named(inner, "ACTIVE-MOVE").is_some()));
    match &end_eff[3] {
        Condition::Forall(q) => {
            let body = q.body.as_and().unwrap();
            assert!(matches!(&body[0], Condition::Not(inner) if ground_named(inner, "REQ-NEG-PUSH").is_some()));
        }
        other => panic!("expected the REQ-NEG withdrawal, got {other:?}"),
    }
}

#[test]
fn do_carries_the_original_effect_exactly_once() {
    let (d, _) = maze();
    let cd = compile_serial(&d, &SerialOptions::default()).unwrap();

    let eff = conjuncts(action(&cd, "DO-MOVE").eff.as_ref());
    assert_eq!(eff.len(), 4);
    assert!(matches!(&eff[0], Condition::Not(inner) if ground_named(inner, "BUSY-AGENT").is_some()));
    assert!(ground_named(&eff[1], "DONE-AGENT").is_some());
    assert!(matches!(&eff[2], Condition::Not(inner) if ground_named(inner, "AT").is_some()));
    assert!(ground_named(&eff[3], "AT").is_some());

    // no other member of the family writes the original fluents
    for name in ["SELECT-MOVE", "END-MOVE"] {
        for c in conjuncts(action(&cd, name).eff.as_ref()) {
            c.for_each_ground(&mut |g| assert_ne!(g.name.canonical_str(), "AT"));
        }
    }
}

#[test]
fn do_requires_the_positive_co_actions() {
    let (d, _) = maze();
    let cd = compile_serial(&d, &SerialOptions::default()).unwrap();
    let pre = conjuncts(action(&cd, "DO-PUSH").pre.as_ref());
    assert!(ground_named(&pre[0], "APPLYING").is_some());
    assert!(ground_named(&pre[1], "BUSY-AGENT").is_some());
    assert!(ground_named(&pre[2], "ACTIVE-PUSH").is_some());
    match &pre[3] {
        Condition::Exists(q) => {
            let body = q.body.as_and().unwrap();
            let g = ground_named(&body[0], "ACTIVE-PUSH").unwrap();
            assert_eq!(
                g.args.as_slice(),
                &[Term::Param(4), Term::Param(1), Term::Param(3), Term::Param(2)]
            );
        }
        other => panic!("expected the positive-concurrency exists, got {other:?}"),
    }
}

#[test]
fn finish_waits_for_every_agent() {
    let (d, _) = maze();
    let cd = compile_serial(&d, &SerialOptions::default()).unwrap();
    let pre = conjuncts(action(&cd, "FINISH").pre.as_ref());
    assert!(ground_named(&pre[0], "RESETTING").is_some());
    match &pre[1] {
        Condition::Forall(q) => {
            assert_eq!(q.params, vec![cd.types.index_of("AGENT").unwrap()]);
            assert!(ground_named(&q.body, "FREE-AGENT").is_some());
        }
        other => panic!("expected a forall over agents, got {other:?}"),
    }
}

#[test]
fn instance_seeds_the_phase_machine_and_the_agents() {
    let (d, ins) = maze();
    let opts = SerialOptions::default();
    let cd = compile_serial(&d, &opts).unwrap();
    let cins = compile_serial_instance(&d, &cd, &ins, &opts).unwrap();

    match &cins.init[0] {
        InitFact::Atom(a) => assert_eq!(a.name.canonical_str(), "FREE-BLOCK"),
        other => panic!("expected FREE-BLOCK first, got {other:?}"),
    }
    let free_agents: Vec<String> = cins
        .init
        .iter()
        .filter_map(|f| match f {
            InitFact::Atom(a) if a.name.canonical_str() == "FREE-AGENT" => {
                Some(a.args[0].canonical_string())
            }
            _ => None,
        })
        .collect();
    assert_eq!(free_agents, vec!["R1".to_string(), "R2".to_string()]);

    // original facts survive
    assert!(cins.init.iter().any(|f| matches!(f,
        InitFact::Atom(a) if a.name.canonical_str() == "AT" && a.args[0].canonical_str() == "R1")));

    assert_eq!(cins.goal[0].name.canonical_str(), "FREE-BLOCK");
    assert_eq!(cins.goal[1].name.canonical_str(), "OPEN");
}

#[test]
fn action_costs_flow_through_the_compilation() {
    let d = load_domain("../problems/workshop/workshop_dom_cal.pddl");
    let ins = load_problem("../problems/workshop/workshop2_2.pddl", &d);
    let opts = SerialOptions::default();
    let cd = compile_serial(&d, &opts).unwrap();

    assert!(cd.requirements.costs);
    assert!(cd.funcs.index_of("TOTAL-COST").is_some());
    let eff = conjuncts(action(&cd, "DO-FLIP").eff.as_ref());
    assert!(eff.iter().any(|c| matches!(c, Condition::Increase(inc)
        if inc.func.name.canonical_str() == "TOTAL-COST" && inc.amount == IncreaseAmount::Int(1))));

    let cins = compile_serial_instance(&d, &cd, &ins, &opts).unwrap();
    assert!(cins.init.iter().any(|f| matches!(f,
        InitFact::Num(func, Number::Int(0)) if func.name.canonical_str() == "TOTAL-COST")));
    assert!(matches!(&cins.metric, Some(Metric::Minimize(func))
        if func.name.canonical_str() == "TOTAL-COST"));
}

#[test]
fn agent_order_and_joint_size_add_the_counter_plumbing() {
    let (mut d, ins) = maze();
    add_noop_action(&mut d).unwrap();
    let opts = SerialOptions {
        agent_order: true,
        max_joint_action_size: Some(2),
    };
    let cd = compile_serial(&d, &opts).unwrap();

    // the NOOP family exists so that agents can pass their turn
    assert!(cd.actions.index_of("SELECT-NOOP").is_some());
    assert!(cd.actions.index_of("DO-NOOP").is_some());
    assert!(cd.actions.index_of("END-NOOP").is_some());

    let select = action(&cd, "SELECT-MOVE");
    // 3 original parameters + 2 order counters + 2 atomic counters
    assert_eq!(select.params.len(), 7);
    let pre = conjuncts(select.pre.as_ref());
    for needed in [
        "AGENT-ORDER",
        "NEXT-AGENT-ORDER-COUNT",
        "CURRENT-AGENT-ORDER-COUNT",
        "NEXT-ATOMIC-ACTION-COUNT",
        "CURRENT-ATOMIC-ACTION-COUNT",
    ] {
        assert!(
            pre.iter().any(|c| ground_named(c, needed).is_some()),
            "SELECT-MOVE misses {needed}"
        );
    }
    let end = action(&cd, "END-MOVE");
    let pre = conjuncts(end.pre.as_ref());
    assert!(pre.iter().any(|c| ground_named(c, "PREV-AGENT-ORDER-COUNT").is_some()));
    assert!(pre.iter().any(|c| ground_named(c, "PREV-ATOMIC-ACTION-COUNT").is_some()));

    let cins = compile_serial_instance(&d, &cd, &ins, &opts).unwrap();
    let object_names: Vec<String> = cins
        .objects()
        .iter()
        .map(|(n, _)| n.canonical_string())
        .collect();
    for needed in ["AGENT-COUNT1", "AGENT-COUNT2", "AGENT-COUNT3", "ATOMIC-COUNT0", "ATOMIC-COUNT2"] {
        assert!(object_names.iter().any(|n| n == needed), "missing object {needed}");
    }
    assert!(cins.init.iter().any(|f| matches!(f, InitFact::Atom(a)
        if a.name.canonical_str() == "CURRENT-AGENT-ORDER-COUNT" && a.args[0].canonical_str() == "AGENT-COUNT1")));
    assert!(cins.init.iter().any(|f| matches!(f, InitFact::Atom(a)
        if a.name.canonical_str() == "AGENT-ORDER"
            && a.args[0].canonical_str() == "R1"
            && a.args[1].canonical_str() == "AGENT-COUNT1")));
    assert!(cins.init.iter().any(|f| matches!(f, InitFact::Atom(a)
        if a.name.canonical_str() == "CURRENT-ATOMIC-ACTION-COUNT" && a.args[0].canonical_str() == "ATOMIC-COUNT0")));
}

#[test]
fn compiled_domain_round_trips_through_the_printer() {
    let (d, _) = maze();
    let cd = compile_serial(&d, &SerialOptions::default()).unwrap();

    let printed1 = cd.to_string();
    let once = build_network_domain(&parse_pddl_domain(Input::from_string(&printed1)).unwrap()).unwrap();
    let printed2 = once.to_string();
    let twice = build_network_domain(&parse_pddl_domain(Input::from_string(&printed2)).unwrap()).unwrap();
    assert_eq!(printed2, twice.to_string());
}

#[test]
fn compiled_instance_round_trips_through_the_printer() {
    let (d, ins) = maze();
    let opts = SerialOptions::default();
    let cd = compile_serial(&d, &opts).unwrap();
    let cins = compile_serial_instance(&d, &cd, &ins, &opts).unwrap();

    let printed1 = cins.pddl(&cd).to_string();
    let reparsed = build_instance(&parse_pddl_problem(Input::from_string(&printed1)).unwrap(), &cd).unwrap();
    assert_eq!(printed1, reparsed.pddl(&cd).to_string());
}

#[test]
fn source_domain_round_trips_with_its_multiagent_blocks() {
    let (d, _) = maze();
    let printed1 = d.to_string();
    let once = build_concurrency_domain(&parse_pddl_domain(Input::from_string(&printed1)).unwrap()).unwrap();
    let printed2 = once.to_string();
    let twice = build_concurrency_domain(&parse_pddl_domain(Input::from_string(&printed2)).unwrap()).unwrap();
    assert_eq!(printed2, twice.to_string());
    // the concurrency predicates never surface in the printed output
    assert!(!printed1.contains("( MOVE ?"));
}
