use crate::*;

/// A fully instantiated atom: a predicate (or function) name applied to
/// object names.
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub name: Sym,
    pub args: Vec<Sym>,
}

impl Fact {
    pub fn new(name: impl Into<Sym>, args: Vec<Sym>) -> Self {
        Fact { name: name.into(), args }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Real(f64),
}

impl std::fmt::Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Real(r) => write!(f, "{r}"),
        }
    }
}

/// An element of the initial state.
#[derive(Debug, Clone, PartialEq)]
pub enum InitFact {
    /// A true atom.
    Atom(Fact),
    /// A numeric ground function assignment `(= (f args) v)`.
    Num(Fact, Number),
}

/// Objective of the planning problem.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Minimize(Fact),
    Maximize(Fact),
}

/// A planning instance over some domain: typed objects, initial state and
/// goal, plus an optional metric.
pub struct Instance {
    pub name: Sym,
    pub domain_name: Sym,
    objects: Vec<(Sym, TypeId)>,
    index: hashbrown::HashMap<Sym, TypeId>,
    pub init: Vec<InitFact>,
    pub goal: Vec<Fact>,
    pub metric: Option<Metric>,
}

impl Instance {
    pub fn new(name: impl Into<Sym>, domain_name: impl Into<Sym>) -> Self {
        Instance {
            name: name.into(),
            domain_name: domain_name.into(),
            objects: Vec::new(),
            index: hashbrown::HashMap::new(),
            init: Vec::new(),
            goal: Vec::new(),
            metric: None,
        }
    }

    pub fn add_object(&mut self, name: impl Into<Sym>, tpe: TypeId) -> Result<(), SymbolError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(SymbolError::duplicate(SymbolKind::Object, &name));
        }
        self.index.insert(name.clone(), tpe);
        self.objects.push((name, tpe));
        Ok(())
    }

    pub fn type_of(&self, name: &str) -> Option<TypeId> {
        self.index.get(name).copied()
    }

    pub fn objects(&self) -> &[(Sym, TypeId)] {
        &self.objects
    }

    /// The objects visible from `tpe`, grouped by type in pre-order of the
    /// type subtree; within a type, domain constants come before instance
    /// objects, each in declaration order.
    pub fn objects_of(&self, domain: &Domain, tpe: TypeId) -> Vec<Sym> {
        let mut result = Vec::new();
        for t in domain.types.subtree(tpe) {
            result.extend(domain.types.get(t).constants().iter().cloned());
            result.extend(
                self.objects
                    .iter()
                    .filter(|(_, ot)| *ot == t)
                    .map(|(name, _)| name.clone()),
            );
        }
        result
    }

    pub fn add_init(&mut self, name: impl Into<Sym>, args: Vec<Sym>) {
        self.init.push(InitFact::Atom(Fact::new(name, args)));
    }

    pub fn add_init_num(&mut self, name: impl Into<Sym>, args: Vec<Sym>, value: Number) {
        self.init.push(InitFact::Num(Fact::new(name, args), value));
    }

    pub fn add_goal(&mut self, name: impl Into<Sym>, args: Vec<Sym>) {
        self.goal.push(Fact::new(name, args));
    }
}
