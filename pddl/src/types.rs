use crate::*;

/// Stable index of a type in the [`Types`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Name of the implicit top type that roots the forest.
pub const OBJECT_TYPE: &str = "OBJECT";

#[derive(Clone)]
pub struct TypeEntry {
    name: Sym,
    parent: Option<TypeId>,
    children: Vec<TypeId>,
    /// Constants declared at the domain level for this type, in declaration order.
    constants: Vec<Sym>,
}

impl TypeEntry {
    pub fn name(&self) -> &Sym {
        &self.name
    }
    pub fn parent(&self) -> Option<TypeId> {
        self.parent
    }
    pub fn children(&self) -> &[TypeId] {
        &self.children
    }
    pub fn constants(&self) -> &[Sym] {
        &self.constants
    }
}

/// The type hierarchy: an arena of types whose parent/child links form a
/// forest rooted at the implicit `OBJECT` type (always at index 0).
///
/// Cloning preserves indices, so a target environment seeded from a clone
/// shares the source's type ids for all copied types.
#[derive(Clone)]
pub struct Types {
    entries: Vec<TypeEntry>,
    index: hashbrown::HashMap<Sym, TypeId>,
}

impl Default for Types {
    fn default() -> Self {
        Self::new()
    }
}

impl Types {
    pub fn new() -> Self {
        let mut types = Types {
            entries: Vec::new(),
            index: hashbrown::HashMap::new(),
        };
        types
            .create(OBJECT_TYPE, None)
            .unwrap_or_else(|_| unreachable!("empty arena"));
        types
    }

    pub fn object(&self) -> TypeId {
        TypeId(0)
    }

    pub fn index_of(&self, name: &str) -> Option<TypeId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: TypeId) -> &TypeEntry {
        &self.entries[id.0 as usize]
    }

    pub fn name(&self, id: TypeId) -> &Sym {
        &self.get(id).name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All types in declaration order, the implicit `OBJECT` type included.
    pub fn iter(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.entries.len() as u32).map(TypeId)
    }

    pub fn resolve(&self, name: &Sym) -> Result<TypeId, SymbolError> {
        self.index_of(name.canonical_str())
            .ok_or_else(|| SymbolError::unknown(SymbolKind::Type, name))
    }

    /// Creates a new type under the given parent (the `OBJECT` root if `None`).
    pub fn create(&mut self, name: impl Into<Sym>, parent: Option<TypeId>) -> Result<TypeId, SymbolError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(SymbolError::duplicate(SymbolKind::Type, &name));
        }
        let parent = match parent {
            Some(p) => Some(p),
            None if self.entries.is_empty() => None, // the root itself
            None => Some(self.object()),
        };
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypeEntry {
            name: name.clone(),
            parent: None,
            children: Vec::new(),
            constants: Vec::new(),
        });
        self.index.insert(name, id);
        if let Some(parent) = parent {
            self.connect_types(parent, id);
        }
        Ok(id)
    }

    /// Low-level primitive wiring `child` under `parent`: sets the child's
    /// parent link and appends it to the parent's child list.
    pub fn connect_types(&mut self, parent: TypeId, child: TypeId) {
        self.entries[child.0 as usize].parent = Some(parent);
        self.entries[parent.0 as usize].children.push(child);
    }

    /// Detaches `child` from its current parent (used when splicing a fresh
    /// type between a parent and some of its children).
    pub fn disconnect_from_parent(&mut self, child: TypeId) {
        if let Some(parent) = self.entries[child.0 as usize].parent.take() {
            self.entries[parent.0 as usize].children.retain(|&c| c != child);
        }
    }

    pub fn is_subtype_of(&self, sub: TypeId, sup: TypeId) -> bool {
        let mut current = Some(sub);
        while let Some(t) = current {
            if t == sup {
                return true;
            }
            current = self.get(t).parent;
        }
        false
    }

    pub fn add_constant(&mut self, tpe: TypeId, name: impl Into<Sym>) {
        self.entries[tpe.0 as usize].constants.push(name.into());
    }

    /// The subtree rooted at `id` in pre-order, children in insertion order.
    pub fn subtree(&self, id: TypeId) -> Vec<TypeId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(t) = stack.pop() {
            result.push(t);
            // push in reverse so that the first child is visited first
            for &c in self.get(t).children.iter().rev() {
                stack.push(c);
            }
        }
        result
    }

    /// Constants visible from `id`: those of the type itself and of all its
    /// descendants, grouped by type in pre-order.
    pub fn constants_of(&self, id: TypeId) -> Vec<Sym> {
        self.subtree(id)
            .into_iter()
            .flat_map(|t| self.get(t).constants.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forest_structure() {
        let mut types = Types::new();
        let vehicle = types.create("VEHICLE", None).unwrap();
        let truck = types.create("TRUCK", Some(vehicle)).unwrap();
        let car = types.create("CAR", Some(vehicle)).unwrap();

        assert!(types.is_subtype_of(truck, vehicle));
        assert!(types.is_subtype_of(truck, types.object()));
        assert!(!types.is_subtype_of(vehicle, truck));
        assert_eq!(types.get(vehicle).children(), &[truck, car]);
        assert_eq!(types.subtree(vehicle), vec![vehicle, truck, car]);
        assert!(types.create("CAR", None).is_err());
    }

    #[test]
    fn splice() {
        let mut types = Types::new();
        let root = types.object();
        let a = types.create("A", None).unwrap();
        let b = types.create("B", None).unwrap();
        let middle = types.create("MIDDLE", None).unwrap();
        types.disconnect_from_parent(a);
        types.connect_types(middle, a);
        types.disconnect_from_parent(b);
        types.connect_types(middle, b);

        assert_eq!(types.get(root).children(), &[middle]);
        assert_eq!(types.get(middle).children(), &[a, b]);
        assert!(types.is_subtype_of(a, middle));
    }
}
