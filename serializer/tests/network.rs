use std::path::Path;

use mapddl::parser::{parse_pddl_domain, parse_pddl_problem};
use mapddl::*;
use serializer::network::{analyse, compile_network};

fn tablemover() -> (Domain, Instance) {
    let input = Input::from_file(Path::new("../problems/tablemover/table_dom_cn.pddl")).unwrap();
    let d = build_network_domain(&parse_pddl_domain(input).unwrap()).unwrap();
    let input = Input::from_file(Path::new("../problems/tablemover/table2_1.pddl")).unwrap();
    let ins = build_instance(&parse_pddl_problem(input).unwrap(), &d).unwrap();
    (d, ins)
}

fn action<'a>(d: &'a Domain, name: &str) -> &'a Action {
    d.actions.get(d.actions.index_of(name).unwrap())
}

fn conjuncts(cond: Option<&Condition>) -> &[Condition] {
    cond.unwrap().as_and().unwrap()
}

fn has_ground(conds: &[Condition], name: &str) -> bool {
    conds.iter().any(|c| matches!(c, Condition::Ground(g) if g.name.canonical_str() == name))
}

fn has_deleted(conds: &[Condition], name: &str) -> bool {
    conds.iter().any(|c| matches!(c, Condition::Not(inner)
        if matches!(inner.as_ref(), Condition::Ground(g) if g.name.canonical_str() == name)))
}

#[test]
fn loads_the_network_blocks() {
    let (d, _) = tablemover();
    assert_eq!(d.nodes.len(), 2);
    let raise = d.nodes.get(d.nodes.index_of("RAISE").unwrap());
    assert_eq!(raise.lower, 2);
    assert_eq!(raise.upper, mapddl::parser::INFINITE_BOUND);
    assert_eq!(raise.templates.len(), 2);
    // the node parameter ?t maps onto the action's second parameter
    assert_eq!(raise.templates[0].params, vec![1]);
    assert_eq!(d.edges.len(), 1);
}

#[test]
fn detects_the_problematic_fluent() {
    let (d, _) = tablemover();
    let analysis = analyse(&d);
    let names: Vec<&str> = analysis
        .problematic
        .iter()
        .map(|&p| d.preds.get(p).name.canonical_str())
        .collect();
    // ONFLOOR is deleted by LIFT and read by STEADY within the same node;
    // TABLE-AT is deleted by CARRY but no co-template reads it
    assert_eq!(names, vec!["ONFLOOR"]);
    // both nodes are joined by the positive-dependence edge
    assert_eq!(analysis.components.len(), 1);
    let component = analysis.components.values().next().unwrap();
    assert_eq!(component.len(), 2);
}

#[test]
fn emits_the_per_node_action_families() {
    let (d, ins) = tablemover();
    let (cd, _) = compile_network(&d, &ins).unwrap();
    let names: Vec<&str> = cd.actions.iter().map(|a| a.name.canonical_str()).collect();
    assert_eq!(
        names,
        vec![
            "START-RAISE",
            "SKIP-RAISE",
            "DO-LIFT",
            "DO-STEADY",
            "END-RAISE",
            "START-HAUL",
            "SKIP-HAUL",
            "DO-CARRY",
            "END-HAUL",
            "FINISH-HAUL",
            "ADD-ONFLOOR",
            "DELETE-ONFLOOR",
            "FREE",
        ]
    );
}

#[test]
fn problematic_fluents_get_bookkeeping_predicates() {
    let (d, ins) = tablemover();
    let (cd, _) = compile_network(&d, &ins).unwrap();
    let pos = cd.preds.get(cd.preds.index_of("POS-ONFLOOR").unwrap());
    let neg = cd.preds.get(cd.preds.index_of("NEG-ONFLOOR").unwrap());
    assert_eq!(pos.params.len(), 1);
    assert_eq!(neg.params.len(), 1);
    assert!(cd.preds.index_of("POS-TABLE-AT").is_none());
}

#[test]
fn do_defers_writes_to_problematic_fluents() {
    let (d, ins) = tablemover();
    let (cd, _) = compile_network(&d, &ins).unwrap();

    let eff = conjuncts(action(&cd, "DO-LIFT").eff.as_ref());
    assert!(has_ground(eff, "LIFTED"));
    assert!(has_ground(eff, "NEG-ONFLOOR"));
    // the direct delete is gone, every touch goes through the bookkeeping
    for c in eff {
        c.for_each_ground(&mut |g| assert_ne!(g.name.canonical_str(), "ONFLOOR"));
    }
    // joining the node claims the agent and advances the count
    assert!(has_ground(eff, "TAKEN"));
    assert!(has_deleted(eff, "COUNT-RAISE"));
    assert!(has_ground(eff, "COUNT-RAISE"));

    // non-problematic deletes stay in place
    let eff = conjuncts(action(&cd, "DO-CARRY").eff.as_ref());
    assert!(has_deleted(eff, "TABLE-AT"));
    assert!(has_ground(eff, "TABLE-AT"));
}

#[test]
fn commit_actions_consume_the_bookkeeping() {
    let (d, ins) = tablemover();
    let (cd, _) = compile_network(&d, &ins).unwrap();

    let add = action(&cd, "ADD-ONFLOOR");
    let pre = conjuncts(add.pre.as_ref());
    assert!(has_ground(pre, "ATEMP"));
    assert!(has_ground(pre, "POS-ONFLOOR"));
    assert!(has_deleted(conjuncts(add.eff.as_ref()), "POS-ONFLOOR"));
    assert!(has_ground(conjuncts(add.eff.as_ref()), "ONFLOOR"));

    let delete = action(&cd, "DELETE-ONFLOOR");
    assert!(has_deleted(conjuncts(delete.eff.as_ref()), "ONFLOOR"));
    assert!(has_deleted(conjuncts(delete.eff.as_ref()), "NEG-ONFLOOR"));

    // FREE only fires once the bookkeeping is drained
    let free = conjuncts(action(&cd, "FREE").pre.as_ref());
    assert!(has_ground(free, "ATEMP"));
    assert!(free.iter().any(|c| matches!(c, Condition::Forall(_))));
}

#[test]
fn dependence_edges_order_the_component() {
    let (d, ins) = tablemover();
    let (cd, _) = compile_network(&d, &ins).unwrap();

    let start_haul = conjuncts(action(&cd, "START-HAUL").pre.as_ref());
    assert!(has_ground(start_haul, "DONE-RAISE"));
    assert!(start_haul.iter().any(|c| matches!(c, Condition::Or(_, _))));
    assert!(has_ground(start_haul, "ACTIVE-RAISE"));
    assert!(has_deleted(start_haul, "USED-HAUL"));

    let start_raise = conjuncts(action(&cd, "START-RAISE").pre.as_ref());
    assert!(has_ground(start_raise, "AFREE"));

    // the last node of the component cleans everything up
    let finish = conjuncts(action(&cd, "FINISH-HAUL").eff.as_ref());
    assert!(has_ground(finish, "ATEMP"));
    for name in ["DONE-RAISE", "SKIPPED-RAISE", "USED-RAISE", "ACTIVE-RAISE", "DONE-HAUL", "ACTIVE-HAUL"] {
        assert!(has_deleted(finish, name), "FINISH-HAUL must clear {name}");
    }
    assert!(finish.iter().any(|c| matches!(c, Condition::Forall(_))));
}

#[test]
fn instance_seeds_counters_and_arity_witnesses() {
    let (d, ins) = tablemover();
    let (cd, cins) = compile_network(&d, &ins).unwrap();

    let object_names: Vec<String> = cins
        .objects()
        .iter()
        .map(|(n, _)| n.canonical_string())
        .collect();
    // ACOUNT-0 is a domain constant, only the successors become objects
    assert!(object_names.iter().any(|n| n == "ACOUNT-1"));
    assert!(object_names.iter().any(|n| n == "ACOUNT-2"));
    assert!(!object_names.iter().any(|n| n == "ACOUNT-0"));
    assert!(
        cd.types
            .constants_of(cd.types.index_of("AGENT-COUNT").unwrap())
            .iter()
            .any(|c| c.canonical_str() == "ACOUNT-0")
    );

    let atom = |name: &str, args: &[&str]| {
        cins.init.iter().any(|f| matches!(f, InitFact::Atom(a)
            if a.name.canonical_str() == name
                && a.args.iter().map(|s| s.canonical_str()).collect::<Vec<_>>() == args))
    };
    assert!(atom("AFREE", &[]));
    assert!(atom("CONSEC", &["ACOUNT-0", "ACOUNT-1"]));
    assert!(atom("CONSEC", &["ACOUNT-1", "ACOUNT-2"]));
    // two agents: only arity 2 is reachable for both nodes
    assert!(atom("SAT-RAISE", &["ACOUNT-2"]));
    assert!(!atom("SAT-RAISE", &["ACOUNT-1"]));
    assert!(atom("SAT-HAUL", &["ACOUNT-2"]));

    assert_eq!(cins.goal.last().unwrap().name.canonical_str(), "AFREE");
    assert!(cins.metric.is_none());
}

#[test]
fn compiled_network_domain_round_trips_through_the_printer() {
    let (d, ins) = tablemover();
    let (cd, cins) = compile_network(&d, &ins).unwrap();

    let printed1 = cd.to_string();
    let once = build_network_domain(&parse_pddl_domain(Input::from_string(&printed1)).unwrap()).unwrap();
    let printed2 = once.to_string();
    let twice = build_network_domain(&parse_pddl_domain(Input::from_string(&printed2)).unwrap()).unwrap();
    assert_eq!(printed2, twice.to_string());

    let printed_ins = cins.pddl(&cd).to_string();
    let reparsed = build_instance(&parse_pddl_problem(Input::from_string(&printed_ins)).unwrap(), &cd).unwrap();
    assert_eq!(printed_ins, reparsed.pddl(&cd).to_string());
}

#[test]
fn source_network_domain_round_trips_with_its_blocks() {
    let (d, _) = tablemover();
    let printed1 = d.to_string();
    assert!(printed1.contains(":CONCURRENCY-CONSTRAINT"));
    assert!(printed1.contains("( :POSITIVE-DEPENDENCE RAISE HAUL )"));
    let once = build_network_domain(&parse_pddl_domain(Input::from_string(&printed1)).unwrap()).unwrap();
    let printed2 = once.to_string();
    let twice = build_network_domain(&parse_pddl_domain(Input::from_string(&printed2)).unwrap()).unwrap();
    assert_eq!(printed2, twice.to_string());
}
