//! Derivation of the `AGENT` type for domains that do not declare one.

use mapddl::*;

pub const AGENT_TYPE: &str = "AGENT";

/// Outcome of the inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inference {
    /// The domain already declares `AGENT`.
    AlreadyDeclared,
    /// A fresh `AGENT` type was spliced between the agent super-types and
    /// their common parent.
    Inserted,
    /// The candidate types do not share a parent (or there are no candidate
    /// types at all); the domain is left unchanged. Not fatal: compilation
    /// aborts later with an unknown-type error if no `AGENT` exists.
    NoCommonParent,
}

/// If the domain omits the `AGENT` type, derive it from the types appearing
/// as the first parameter of actions.
///
/// All set iterations follow declaration order, keeping the resulting sibling
/// order deterministic.
pub fn infer_agent_type(d: &mut Domain) -> Inference {
    if d.types.index_of(AGENT_TYPE).is_some() {
        return Inference::AlreadyDeclared;
    }

    // types of agents: first parameter of each action
    let mut agent_types: Vec<TypeId> = Vec::new();
    for action in d.actions.iter() {
        if let Some(&first) = action.params.first() {
            if !agent_types.contains(&first) {
                agent_types.push(first);
            }
        }
    }

    // keep super-types only: drop any type with an ancestor in the set
    let agent_supertypes: Vec<TypeId> = agent_types
        .iter()
        .copied()
        .filter(|&t| {
            let mut current = d.types.get(t).parent();
            while let Some(p) = current {
                if agent_types.contains(&p) {
                    return false;
                }
                current = d.types.get(p).parent();
            }
            true
        })
        .collect();

    // types have a single parent, so the splice is only possible when all
    // super-types hang under the same one
    let Some((&first, rest)) = agent_supertypes.split_first() else {
        return Inference::NoCommonParent;
    };
    let parent = d.types.get(first).parent();
    if rest.iter().any(|&t| d.types.get(t).parent() != parent) {
        return Inference::NoCommonParent;
    }
    let Some(parent) = parent else {
        // the only parent-less type is the root itself
        return Inference::NoCommonParent;
    };

    let Ok(agent) = d.types.create(AGENT_TYPE, Some(parent)) else {
        unreachable!("AGENT was checked absent above");
    };
    for &supertype in &agent_supertypes {
        d.types.disconnect_from_parent(supertype);
        d.types.connect_types(agent, supertype);
    }
    Inference::Inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapddl::parser::parse_pddl_domain;

    fn load(src: &str) -> Domain {
        let parsed = parse_pddl_domain(Input::from_string(src)).unwrap();
        build_concurrency_domain(&parsed).unwrap()
    }

    #[test]
    fn splices_agent_between_parent_and_subtypes() {
        let mut d = load(
            "(define (domain d)
                (:requirements :strips :typing :multi-agent)
                (:types robot drone box - object)
                (:predicates (p ?x - box))
                (:action go :agent ?r - robot :parameters (?b - box) :precondition (p ?b) :effect (and (not (p ?b))))
                (:action fly :agent ?d - drone :parameters (?b - box) :precondition (p ?b) :effect (and (not (p ?b)))))",
        );
        assert_eq!(infer_agent_type(&mut d), Inference::Inserted);
        let agent = d.types.index_of("AGENT").unwrap();
        let robot = d.types.index_of("ROBOT").unwrap();
        let drone = d.types.index_of("DRONE").unwrap();
        let bx = d.types.index_of("BOX").unwrap();
        assert_eq!(d.types.get(agent).parent(), Some(d.types.object()));
        assert_eq!(d.types.get(agent).children(), &[robot, drone]);
        assert!(d.types.is_subtype_of(robot, agent));
        assert!(!d.types.is_subtype_of(bx, agent));
    }

    #[test]
    fn keeps_declared_agent_type() {
        let mut d = load(
            "(define (domain d)
                (:requirements :strips :typing :multi-agent)
                (:types agent box - object)
                (:predicates (p ?x - box))
                (:action go :agent ?r - agent :parameters (?b - box) :precondition (p ?b) :effect (and (not (p ?b)))))",
        );
        assert_eq!(infer_agent_type(&mut d), Inference::AlreadyDeclared);
    }

    #[test]
    fn bails_out_on_differing_parents() {
        let mut d = load(
            "(define (domain d)
                (:requirements :strips :typing :multi-agent)
                (:types ground air - object rover - ground plane - air box - object)
                (:predicates (p ?x - box))
                (:action go :agent ?r - rover :parameters (?b - box) :precondition (p ?b) :effect (and (not (p ?b))))
                (:action fly :agent ?p - plane :parameters (?b - box) :precondition (p ?b) :effect (and (not (p ?b)))))",
        );
        assert_eq!(infer_agent_type(&mut d), Inference::NoCommonParent);
        assert!(d.types.index_of("AGENT").is_none());
    }

    #[test]
    fn subtypes_are_covered_by_their_supertype() {
        // ROVER is subsumed by GROUND, which is itself an agent type
        let mut d = load(
            "(define (domain d)
                (:requirements :strips :typing :multi-agent)
                (:types ground - object rover - ground box - object)
                (:predicates (p ?x - box))
                (:action go :agent ?r - rover :parameters (?b - box) :precondition (p ?b) :effect (and (not (p ?b))))
                (:action steer :agent ?g - ground :parameters (?b - box) :precondition (p ?b) :effect (and (not (p ?b)))))",
        );
        assert_eq!(infer_agent_type(&mut d), Inference::Inserted);
        let agent = d.types.index_of("AGENT").unwrap();
        let ground = d.types.index_of("GROUND").unwrap();
        let rover = d.types.index_of("ROVER").unwrap();
        assert_eq!(d.types.get(agent).children(), &[ground]);
        assert_eq!(d.types.get(ground).parent(), Some(agent));
        assert!(d.types.is_subtype_of(rover, agent));
    }
}
