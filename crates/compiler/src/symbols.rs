//! Symbol table: an arena of symbols plus the stack of lexical domains.
//!
//! Symbols live in the arena for the whole compilation and are referred to
//! by [`SymbolId`]; dropping a domain only unbinds names. Functions and
//! structs keep reaching their parameters, locals and members through the
//! id lists in their kind, which is what outlives the defining domain.

use std::collections::HashMap;

use atomc_runtime::{CodeId, ExtId};

use crate::types::Ty;

/// Index of a symbol in the table's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(usize);

/// Where a variable's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarStorage {
    /// Base cell of the backing block in the global data segment.
    Global { base: usize },
    /// First slot in the owning function's locals area.
    Local { slot: usize },
    /// Byte offset inside the owning struct.
    Member { offset: usize },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FnInfo {
    /// Parameter symbols in declaration order.
    pub params: Vec<SymbolId>,
    /// Local variable symbols in declaration order.
    pub locals: Vec<SymbolId>,
    /// Body buffer; its instruction 0 is the function's `ENTER`.
    pub code: Option<CodeId>,
    /// Set for host functions invoked through `CALL_EXT`.
    pub external: Option<ExtId>,
    /// Cells taken by the locals registered so far.
    pub local_cells: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    Var(VarStorage),
    Param { index: usize },
    Fn(FnInfo),
    Struct { members: Vec<SymbolId> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Ty,
    /// Enclosing function or struct; `None` at global scope.
    pub owner: Option<SymbolId>,
}

#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    /// Scope stack; index 0 is the global domain.
    domains: Vec<HashMap<String, SymbolId>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: Vec::new(),
            domains: vec![HashMap::new()],
        }
    }

    pub fn push_domain(&mut self) {
        self.domains.push(HashMap::new());
    }

    /// Drop the innermost domain. The global domain stays.
    pub fn drop_domain(&mut self) {
        if self.domains.len() > 1 {
            self.domains.pop();
        }
    }

    pub fn domain_depth(&self) -> usize {
        self.domains.len()
    }

    /// Define a symbol in the current domain. Fails on a same-domain name
    /// collision.
    pub fn add(&mut self, sym: Symbol) -> Result<SymbolId, String> {
        let domain = self
            .domains
            .last_mut()
            .expect("the global domain always exists");
        if domain.contains_key(&sym.name) {
            return Err(format!("symbol redefinition: {}", sym.name));
        }
        let name = sym.name.clone();
        self.symbols.push(sym);
        let id = SymbolId(self.symbols.len() - 1);
        domain.insert(name, id);
        Ok(id)
    }

    /// Add a symbol to the arena without binding its name in any domain.
    /// Used for the parameters of host functions, which are only reachable
    /// through the function's parameter list.
    pub fn add_detached(&mut self, sym: Symbol) -> SymbolId {
        self.symbols.push(sym);
        SymbolId(self.symbols.len() - 1)
    }

    /// Look a name up in the current domain only.
    pub fn find_in_domain(&self, name: &str) -> Option<SymbolId> {
        self.domains.last().and_then(|d| d.get(name)).copied()
    }

    /// Look a name up walking outward through all domains.
    pub fn find(&self, name: &str) -> Option<SymbolId> {
        self.domains
            .iter()
            .rev()
            .find_map(|d| d.get(name))
            .copied()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0]
    }

    pub fn fn_info(&self, id: SymbolId) -> Option<&FnInfo> {
        match &self.get(id).kind {
            SymbolKind::Fn(info) => Some(info),
            _ => None,
        }
    }

    pub fn fn_info_mut(&mut self, id: SymbolId) -> Option<&mut FnInfo> {
        match &mut self.get_mut(id).kind {
            SymbolKind::Fn(info) => Some(info),
            _ => None,
        }
    }

    pub fn struct_members(&self, id: SymbolId) -> Option<&[SymbolId]> {
        match &self.get(id).kind {
            SymbolKind::Struct { members } => Some(members),
            _ => None,
        }
    }

    /// Find a member of a struct by name.
    pub fn find_member(&self, struct_id: SymbolId, name: &str) -> Option<SymbolId> {
        self.struct_members(struct_id)?
            .iter()
            .copied()
            .find(|&m| self.get(m).name == name)
    }

    /// Cell offset of a member from the start of its struct's storage.
    pub fn member_cell_offset(&self, struct_id: SymbolId, member_id: SymbolId) -> usize {
        let Some(members) = self.struct_members(struct_id) else {
            return 0;
        };
        members
            .iter()
            .take_while(|&&m| m != member_id)
            .map(|&m| self.get(m).ty.cells(self))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TyBase;

    fn var(name: &str, ty: Ty) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind: SymbolKind::Var(VarStorage::Global { base: 0 }),
            ty,
            owner: None,
        }
    }

    #[test]
    fn same_domain_collision_is_an_error() {
        let mut st = SymbolTable::new();
        st.add(var("v", Ty::INT)).unwrap();
        let err = st.add(var("v", Ty::DOUBLE)).unwrap_err();
        assert_eq!(err, "symbol redefinition: v");
    }

    #[test]
    fn inner_domains_shadow_and_unwind() {
        let mut st = SymbolTable::new();
        let outer = st.add(var("v", Ty::INT)).unwrap();
        st.push_domain();
        let inner = st.add(var("v", Ty::DOUBLE)).unwrap();
        assert_eq!(st.find("v"), Some(inner));
        assert_eq!(st.find_in_domain("v"), Some(inner));
        st.drop_domain();
        assert_eq!(st.find("v"), Some(outer));
    }

    #[test]
    fn find_walks_outward_but_find_in_domain_does_not() {
        let mut st = SymbolTable::new();
        let v = st.add(var("v", Ty::INT)).unwrap();
        st.push_domain();
        assert_eq!(st.find("v"), Some(v));
        assert_eq!(st.find_in_domain("v"), None);
    }

    #[test]
    fn dropping_a_domain_releases_its_bindings() {
        let mut st = SymbolTable::new();
        st.push_domain();
        st.add(var("tmp", Ty::INT)).unwrap();
        st.drop_domain();
        assert_eq!(st.find("tmp"), None);
    }

    #[test]
    fn the_global_domain_cannot_be_dropped() {
        let mut st = SymbolTable::new();
        st.drop_domain();
        assert_eq!(st.domain_depth(), 1);
        st.add(var("v", Ty::INT)).unwrap();
        assert!(st.find("v").is_some());
    }

    #[test]
    fn detached_symbols_have_no_binding() {
        let mut st = SymbolTable::new();
        let id = st.add_detached(var("hidden", Ty::INT));
        assert_eq!(st.find("hidden"), None);
        assert_eq!(st.get(id).name, "hidden");
    }

    #[test]
    fn member_lookup_and_cell_offsets() {
        let mut st = SymbolTable::new();
        let p = st
            .add(Symbol {
                name: "P".to_string(),
                kind: SymbolKind::Struct { members: vec![] },
                ty: Ty::VOID,
                owner: None,
            })
            .unwrap();
        st.get_mut(p).ty = Ty::scalar(TyBase::Struct(p));
        let a = st.add_detached(Symbol {
            name: "a".to_string(),
            kind: SymbolKind::Var(VarStorage::Member { offset: 0 }),
            ty: Ty::array(TyBase::Int, 3),
            owner: Some(p),
        });
        let b = st.add_detached(Symbol {
            name: "b".to_string(),
            kind: SymbolKind::Var(VarStorage::Member { offset: 12 }),
            ty: Ty::DOUBLE,
            owner: Some(p),
        });
        if let SymbolKind::Struct { members } = &mut st.get_mut(p).kind {
            members.extend([a, b]);
        }
        assert_eq!(st.find_member(p, "b"), Some(b));
        assert_eq!(st.find_member(p, "c"), None);
        assert_eq!(st.member_cell_offset(p, a), 0);
        assert_eq!(st.member_cell_offset(p, b), 3);
    }
}
