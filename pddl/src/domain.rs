use crate::*;
use smallvec::SmallVec;
use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Type,
    Predicate,
    Function,
    Action,
    Object,
    Node,
}

impl Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SymbolKind::Type => "type",
            SymbolKind::Predicate => "predicate",
            SymbolKind::Function => "function",
            SymbolKind::Action => "action",
            SymbolKind::Object => "object",
            SymbolKind::Node => "concurrency constraint",
        };
        write!(f, "{s}")
    }
}

#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("unknown {0} `{1}`")]
    Unknown(SymbolKind, Sym),
    #[error("duplicate {0} `{1}`")]
    Duplicate(SymbolKind, Sym),
}

impl SymbolError {
    pub fn unknown(kind: SymbolKind, name: impl Into<Sym>) -> Self {
        SymbolError::Unknown(kind, name.into())
    }
    pub fn duplicate(kind: SymbolKind, name: impl Into<Sym>) -> Self {
        SymbolError::Duplicate(kind, name.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// A lifted predicate: a name and ordered parameter types.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub name: Sym,
    pub params: Vec<TypeId>,
}

/// Insertion-ordered predicate table with unique names.
#[derive(Default)]
pub struct Predicates {
    items: Vec<Predicate>,
    index: hashbrown::HashMap<Sym, PredId>,
}

impl Predicates {
    pub fn index_of(&self, name: &str) -> Option<PredId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: PredId) -> &Predicate {
        &self.items[id.0 as usize]
    }

    pub fn resolve(&self, name: &Sym) -> Result<PredId, SymbolError> {
        self.index_of(name.canonical_str())
            .ok_or_else(|| SymbolError::unknown(SymbolKind::Predicate, name))
    }

    pub fn push(&mut self, pred: Predicate) -> Result<PredId, SymbolError> {
        if self.index.contains_key(&pred.name) {
            return Err(SymbolError::duplicate(SymbolKind::Predicate, &pred.name));
        }
        let id = PredId(self.items.len() as u32);
        self.index.insert(pred.name.clone(), id);
        self.items.push(pred);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Predicate> + '_ {
        self.items.iter()
    }

    pub fn iter_with_id(&self) -> impl Iterator<Item = (PredId, &Predicate)> + '_ {
        self.items.iter().enumerate().map(|(i, p)| (PredId(i as u32), p))
    }
}

/// A numeric state function (e.g. `TOTAL-COST`).
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Sym,
    pub params: Vec<TypeId>,
}

#[derive(Default)]
pub struct Functions {
    items: Vec<Function>,
    index: hashbrown::HashMap<Sym, FuncId>,
}

impl Functions {
    pub fn index_of(&self, name: &str) -> Option<FuncId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: FuncId) -> &Function {
        &self.items[id.0 as usize]
    }

    pub fn push(&mut self, func: Function) -> Result<FuncId, SymbolError> {
        if self.index.contains_key(&func.name) {
            return Err(SymbolError::duplicate(SymbolKind::Function, &func.name));
        }
        let id = FuncId(self.items.len() as u32);
        self.index.insert(func.name.clone(), id);
        self.items.push(func);
        Ok(id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Function> + '_ {
        self.items.iter()
    }
}

/// An action schema. The effect, when present, is structurally an `And`
/// (the model builder normalises it).
#[derive(Debug, Clone)]
pub struct Action {
    pub name: Sym,
    pub params: Vec<TypeId>,
    pub pre: Option<Condition>,
    pub eff: Option<Condition>,
}

#[derive(Default)]
pub struct Actions {
    items: Vec<Action>,
    index: hashbrown::HashMap<Sym, ActionId>,
}

impl Actions {
    pub fn index_of(&self, name: &str) -> Option<ActionId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: ActionId) -> &Action {
        &self.items[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ActionId) -> &mut Action {
        &mut self.items[id.0 as usize]
    }

    pub fn resolve(&self, name: &Sym) -> Result<ActionId, SymbolError> {
        self.index_of(name.canonical_str())
            .ok_or_else(|| SymbolError::unknown(SymbolKind::Action, name))
    }

    pub fn push(&mut self, action: Action) -> Result<ActionId, SymbolError> {
        if self.index.contains_key(&action.name) {
            return Err(SymbolError::duplicate(SymbolKind::Action, &action.name));
        }
        let id = ActionId(self.items.len() as u32);
        self.index.insert(action.name.clone(), id);
        self.items.push(action);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> + '_ {
        self.items.iter()
    }

    pub fn iter_with_id(&self) -> impl Iterator<Item = (ActionId, &Action)> + '_ {
        self.items.iter().enumerate().map(|(i, a)| (ActionId(i as u32), a))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Action> + '_ {
        self.items.iter_mut()
    }
}

/// The concurrency-predicate sub-table: a marker subset of the predicate
/// table, one entry per action of a serial multi-agent domain.
#[derive(Default)]
pub struct ConcurrencyPredicates {
    ids: Vec<PredId>,
    index: hashbrown::HashMap<Sym, PredId>,
}

impl ConcurrencyPredicates {
    pub fn index_of(&self, name: &str) -> Option<PredId> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn insert(&mut self, name: Sym, id: PredId) {
        self.index.insert(name, id);
        self.ids.push(id);
    }

    pub fn iter(&self) -> impl Iterator<Item = PredId> + '_ {
        self.ids.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// An action template of a network node: which action the node runs, and how
/// the node's parameters map onto the action's parameters.
#[derive(Debug, Clone)]
pub struct Template {
    pub action: ActionId,
    pub name: Sym,
    /// `params[i]` is the action parameter bound to the node's i-th parameter.
    pub params: Vec<u32>,
}

/// A node of the concurrency network: an arity-bounded group of action
/// templates that execute jointly.
#[derive(Debug, Clone)]
pub struct NetworkNode {
    pub name: Sym,
    pub params: Vec<TypeId>,
    pub lower: u32,
    pub upper: u32,
    pub templates: Vec<Template>,
}

#[derive(Default)]
pub struct Nodes {
    items: Vec<NetworkNode>,
    index: hashbrown::HashMap<Sym, NodeId>,
}

impl Nodes {
    pub fn index_of(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: NodeId) -> &NetworkNode {
        &self.items[id.0 as usize]
    }

    pub fn resolve(&self, name: &Sym) -> Result<NodeId, SymbolError> {
        self.index_of(name.canonical_str())
            .ok_or_else(|| SymbolError::unknown(SymbolKind::Node, name))
    }

    pub fn push(&mut self, node: NetworkNode) -> Result<NodeId, SymbolError> {
        if self.index.contains_key(&node.name) {
            return Err(SymbolError::duplicate(SymbolKind::Node, &node.name));
        }
        let id = NodeId(self.items.len() as u32);
        self.index.insert(node.name.clone(), id);
        self.items.push(node);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkNode> + '_ {
        self.items.iter()
    }

    pub fn iter_with_id(&self) -> impl Iterator<Item = (NodeId, &NetworkNode)> + '_ {
        self.items.iter().enumerate().map(|(i, n)| (NodeId(i as u32), n))
    }
}

/// Requirement flags of a domain, in the fixed order they are printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Requirements {
    pub equality: bool,
    pub strips: bool,
    pub costs: bool,
    pub adl: bool,
    pub neg: bool,
    pub condeffects: bool,
    pub typed: bool,
    pub multiagent: bool,
    pub unfact: bool,
    pub fact: bool,
    pub net: bool,
}

/// The symbol environment of a domain: type hierarchy, predicate table with
/// its concurrency sub-table, function and action tables, and (for network
/// domains) the concurrency network itself.
///
/// All indices are stable for the lifetime of the environment; tables are
/// insertion-ordered and names are unique within a kind.
pub struct Domain {
    pub name: Sym,
    pub requirements: Requirements,
    pub types: Types,
    pub preds: Predicates,
    pub cpreds: ConcurrencyPredicates,
    pub funcs: Functions,
    pub actions: Actions,
    pub nodes: Nodes,
    pub edges: Vec<(NodeId, NodeId)>,
    /// Union-find over node indices, tracking connected components.
    mf: Vec<u32>,
}

impl Domain {
    pub fn new(name: impl Into<Sym>) -> Self {
        Domain {
            name: name.into(),
            requirements: Requirements::default(),
            types: Types::new(),
            preds: Predicates::default(),
            cpreds: ConcurrencyPredicates::default(),
            funcs: Functions::default(),
            actions: Actions::default(),
            nodes: Nodes::default(),
            edges: Vec::new(),
            mf: Vec::new(),
        }
    }

    pub fn create_type(&mut self, name: impl Into<Sym>, parent: Option<&str>) -> Result<TypeId, SymbolError> {
        let parent = match parent {
            Some(p) => Some(
                self.types
                    .index_of(p)
                    .ok_or_else(|| SymbolError::unknown(SymbolKind::Type, p))?,
            ),
            None => None,
        };
        self.types.create(name, parent)
    }

    /// Resolves a list of type names to their indices (the C1 counterpart of
    /// going from a printed parameter list back to the arena).
    pub fn convert_types(&self, names: &[Sym]) -> Result<Vec<TypeId>, SymbolError> {
        names.iter().map(|n| self.types.resolve(n)).collect()
    }

    /// The type names of a parameter list, for re-declaration in another
    /// environment.
    pub fn type_names(&self, params: &[TypeId]) -> Vec<Sym> {
        params.iter().map(|&t| self.types.name(t).clone()).collect()
    }

    pub fn create_predicate(&mut self, name: impl Into<Sym>, param_types: &[Sym]) -> Result<PredId, SymbolError> {
        let params = self.convert_types(param_types)?;
        self.preds.push(Predicate { name: name.into(), params })
    }

    pub fn create_function(&mut self, name: impl Into<Sym>, param_types: &[Sym]) -> Result<FuncId, SymbolError> {
        let params = self.convert_types(param_types)?;
        self.funcs.push(Function { name: name.into(), params })
    }

    pub fn create_constant(&mut self, name: impl Into<Sym>, tpe: &str) -> Result<(), SymbolError> {
        let tpe = self
            .types
            .index_of(tpe)
            .ok_or_else(|| SymbolError::unknown(SymbolKind::Type, tpe))?;
        self.types.add_constant(tpe, name);
        Ok(())
    }

    /// Creates an action with the given parameter types and empty
    /// precondition/effect conjunctions, ready for `add_pre`/`add_eff`.
    pub fn create_action(&mut self, name: impl Into<Sym>, param_types: &[Sym]) -> Result<ActionId, SymbolError> {
        let params = self.convert_types(param_types)?;
        self.actions.push(Action {
            name: name.into(),
            params,
            pre: Some(Condition::and()),
            eff: Some(Condition::and()),
        })
    }

    /// Appends extra parameters to an existing action.
    pub fn add_params(&mut self, action: &str, param_types: &[Sym]) -> Result<(), SymbolError> {
        let extra = self.convert_types(param_types)?;
        let id = self
            .actions
            .index_of(action)
            .ok_or_else(|| SymbolError::unknown(SymbolKind::Action, action))?;
        self.actions.get_mut(id).params.extend(extra);
        Ok(())
    }

    fn ground(&self, pred: &str, args: SmallVec<[Term; 4]>) -> Result<Ground, SymbolError> {
        let id = self
            .preds
            .index_of(pred)
            .ok_or_else(|| SymbolError::unknown(SymbolKind::Predicate, pred))?;
        Ok(Ground {
            name: self.preds.get(id).name.clone(),
            pred: Some(id),
            args,
        })
    }

    fn action_mut(&mut self, action: &str) -> Result<&mut Action, SymbolError> {
        let id = self
            .actions
            .index_of(action)
            .ok_or_else(|| SymbolError::unknown(SymbolKind::Action, action))?;
        Ok(self.actions.get_mut(id))
    }

    /// Appends `pred(args)` (or its negation) to the action's precondition.
    pub fn add_pre(
        &mut self,
        negated: bool,
        action: &str,
        pred: &str,
        args: SmallVec<[Term; 4]>,
    ) -> Result<(), SymbolError> {
        let ground = Condition::Ground(self.ground(pred, args)?);
        let cond = if negated { Condition::not(ground) } else { ground };
        let target = self.action_mut(action)?;
        target.pre.get_or_insert_with(Condition::and).add(cond);
        Ok(())
    }

    /// Appends a disjunction of the two (0-ary) predicates to the action's
    /// precondition.
    pub fn add_or_pre(&mut self, action: &str, pred_a: &str, pred_b: &str) -> Result<(), SymbolError> {
        let a = Condition::Ground(self.ground(pred_a, SmallVec::new())?);
        let b = Condition::Ground(self.ground(pred_b, SmallVec::new())?);
        let target = self.action_mut(action)?;
        target
            .pre
            .get_or_insert_with(Condition::and)
            .add(Condition::Or(Box::new(a), Box::new(b)));
        Ok(())
    }

    /// Appends an arbitrary condition to the action's precondition.
    pub fn add_pre_cond(&mut self, action: &str, cond: Condition) -> Result<(), SymbolError> {
        let target = self.action_mut(action)?;
        target.pre.get_or_insert_with(Condition::and).add(cond);
        Ok(())
    }

    /// Appends an arbitrary condition to the action's effect.
    pub fn add_eff_cond(&mut self, action: &str, cond: Condition) -> Result<(), SymbolError> {
        let target = self.action_mut(action)?;
        target.eff.get_or_insert_with(Condition::and).add(cond);
        Ok(())
    }

    /// Appends `pred(args)` (or its negation) to the action's effect.
    pub fn add_eff(
        &mut self,
        negated: bool,
        action: &str,
        pred: &str,
        args: SmallVec<[Term; 4]>,
    ) -> Result<(), SymbolError> {
        let ground = Condition::Ground(self.ground(pred, args)?);
        let cond = if negated { Condition::not(ground) } else { ground };
        let target = self.action_mut(action)?;
        target.eff.get_or_insert_with(Condition::and).add(cond);
        Ok(())
    }

    /// Registers the concurrency predicate mirroring `action`: same name, same
    /// parameter list. The predicate joins both the global table and the
    /// concurrency sub-table.
    pub fn add_concurrency_predicate_from_action(&mut self, action: ActionId) -> Result<PredId, SymbolError> {
        let (name, params) = {
            let a = self.actions.get(action);
            (a.name.clone(), a.params.clone())
        };
        let id = self.preds.push(Predicate { name: name.clone(), params })?;
        self.cpreds.insert(name, id);
        Ok(id)
    }

    pub fn add_node(&mut self, node: NetworkNode) -> Result<NodeId, SymbolError> {
        let id = self.nodes.push(node)?;
        self.mf.push(id.0);
        Ok(id)
    }

    pub fn add_edge(&mut self, first: NodeId, second: NodeId) {
        self.edges.push((first, second));
        let a = self.find(first.0);
        let b = self.find(second.0);
        if a != b {
            self.mf[a.min(b) as usize] = a.max(b);
        }
    }

    fn find(&mut self, n: u32) -> u32 {
        if self.mf[n as usize] == n {
            n
        } else {
            let root = self.find(self.mf[n as usize]);
            self.mf[n as usize] = root;
            root
        }
    }

    fn root_of(&self, n: u32) -> u32 {
        let mut n = n;
        while self.mf[n as usize] != n {
            n = self.mf[n as usize];
        }
        n
    }

    /// Connected components of the network, keyed by ascending union-find
    /// root; each component lists its nodes in insertion order.
    pub fn components(&self) -> std::collections::BTreeMap<u32, Vec<NodeId>> {
        let mut ccs: std::collections::BTreeMap<u32, Vec<NodeId>> = Default::default();
        for i in 0..self.nodes.len() as u32 {
            ccs.entry(self.root_of(i)).or_default().push(NodeId(i));
        }
        ccs
    }
}
