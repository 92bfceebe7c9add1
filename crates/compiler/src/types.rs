//! Type representation and the conversion rules of the language.
//!
//! A type is a base plus an optional array dimension. Struct types refer to
//! their defining symbol by id, which keeps the symbol/type reference cycle
//! out of the ownership graph.

use crate::symbols::{SymbolId, SymbolKind, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TyBase {
    Int,
    Double,
    Char,
    Void,
    Struct(SymbolId),
}

impl TyBase {
    pub fn is_numeric(self) -> bool {
        matches!(self, TyBase::Int | TyBase::Double | TyBase::Char)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ty {
    pub base: TyBase,
    /// `None` for scalars, `Some(0)` for arrays of unknown size (legal only
    /// as function parameters), `Some(n)` for arrays of n elements.
    pub array_len: Option<usize>,
}

impl Ty {
    pub const INT: Ty = Ty::scalar(TyBase::Int);
    pub const DOUBLE: Ty = Ty::scalar(TyBase::Double);
    pub const CHAR: Ty = Ty::scalar(TyBase::Char);
    pub const VOID: Ty = Ty::scalar(TyBase::Void);

    pub const fn scalar(base: TyBase) -> Ty {
        Ty {
            base,
            array_len: None,
        }
    }

    pub const fn array(base: TyBase, len: usize) -> Ty {
        Ty {
            base,
            array_len: Some(len),
        }
    }

    pub fn is_array(&self) -> bool {
        self.array_len.is_some()
    }

    /// Element type of an array.
    pub fn elem(&self) -> Ty {
        Ty::scalar(self.base)
    }

    /// A value of this type can appear where a single scalar is required:
    /// not an array, not void, not a struct.
    pub fn can_be_scalar(&self) -> bool {
        !self.is_array() && self.base.is_numeric()
    }

    /// Size in bytes: int 4, double 8, char 1, void 0; structs pack their
    /// members in declaration order; arrays of unknown size count one
    /// element.
    pub fn size_of(&self, st: &SymbolTable) -> usize {
        let elem = match self.base {
            TyBase::Int => 4,
            TyBase::Double => 8,
            TyBase::Char => 1,
            TyBase::Void => 0,
            TyBase::Struct(id) => match &st.get(id).kind {
                SymbolKind::Struct { members } => members
                    .iter()
                    .map(|&m| st.get(m).ty.size_of(st))
                    .sum::<usize>(),
                _ => 0,
            },
        };
        match self.array_len {
            None => elem,
            Some(n) => elem * n.max(1),
        }
    }

    /// Storage footprint in machine cells: one cell per scalar element.
    pub fn cells(&self, st: &SymbolTable) -> usize {
        let elem = match self.base {
            TyBase::Int | TyBase::Double | TyBase::Char => 1,
            TyBase::Void => 0,
            TyBase::Struct(id) => match &st.get(id).kind {
                SymbolKind::Struct { members } => members
                    .iter()
                    .map(|&m| st.get(m).ty.cells(st))
                    .sum::<usize>(),
                _ => 0,
            },
        };
        match self.array_len {
            None => elem,
            Some(n) => elem * n.max(1),
        }
    }
}

/// Result type of an arithmetic operation, by the `double` over `int` over
/// `char` ladder. Fails on arrays, structs and void.
pub fn arith_type_to(a: &Ty, b: &Ty) -> Option<Ty> {
    if !a.can_be_scalar() || !b.can_be_scalar() {
        return None;
    }
    let rank = |base: TyBase| match base {
        TyBase::Char => 0,
        TyBase::Int => 1,
        _ => 2,
    };
    if rank(a.base) >= rank(b.base) {
        Some(Ty::scalar(a.base))
    } else {
        Some(Ty::scalar(b.base))
    }
}

/// Whether a value of `src` converts to `dst`: numeric scalars convert in
/// both directions, arrays only to arrays of the same element type, structs
/// only to the identical struct. No scalar/array mixing, no void.
pub fn conv_to(src: &Ty, dst: &Ty) -> bool {
    match (src.is_array(), dst.is_array()) {
        (false, false) => {
            if src.base.is_numeric() && dst.base.is_numeric() {
                return true;
            }
            matches!((src.base, dst.base), (TyBase::Struct(a), TyBase::Struct(b)) if a == b)
        }
        (true, true) => src.base == dst.base,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{Symbol, SymbolTable, VarStorage};

    fn table_with_point() -> (SymbolTable, SymbolId) {
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
        for (i, name) in ["x", "y"].iter().enumerate() {
            let m = st.add_detached(Symbol {
                name: name.to_string(),
                kind: SymbolKind::Var(VarStorage::Member { offset: i * 4 }),
                ty: Ty::INT,
                owner: Some(p),
            });
            if let SymbolKind::Struct { members } = &mut st.get_mut(p).kind {
                members.push(m);
            }
        }
        (st, p)
    }

    #[test]
    fn scalar_sizes_are_language_defined() {
        let st = SymbolTable::new();
        assert_eq!(Ty::INT.size_of(&st), 4);
        assert_eq!(Ty::DOUBLE.size_of(&st), 8);
        assert_eq!(Ty::CHAR.size_of(&st), 1);
        assert_eq!(Ty::VOID.size_of(&st), 0);
    }

    #[test]
    fn struct_size_sums_members_without_padding() {
        let (st, p) = table_with_point();
        assert_eq!(Ty::scalar(TyBase::Struct(p)).size_of(&st), 8);
        assert_eq!(Ty::array(TyBase::Struct(p), 3).size_of(&st), 24);
    }

    #[test]
    fn array_size_counts_at_least_one_element() {
        let st = SymbolTable::new();
        assert_eq!(Ty::array(TyBase::Int, 10).size_of(&st), 40);
        assert_eq!(Ty::array(TyBase::Double, 0).size_of(&st), 8);
    }

    #[test]
    fn cells_count_scalar_elements() {
        let (st, p) = table_with_point();
        assert_eq!(Ty::INT.cells(&st), 1);
        assert_eq!(Ty::DOUBLE.cells(&st), 1);
        assert_eq!(Ty::scalar(TyBase::Struct(p)).cells(&st), 2);
        assert_eq!(Ty::array(TyBase::Char, 5).cells(&st), 5);
        assert_eq!(Ty::array(TyBase::Struct(p), 3).cells(&st), 6);
    }

    #[test]
    fn arith_is_idempotent_on_scalars() {
        for t in [Ty::INT, Ty::DOUBLE, Ty::CHAR] {
            assert_eq!(arith_type_to(&t, &t), Some(t));
        }
    }

    #[test]
    fn arith_promotes_up_the_ladder() {
        assert_eq!(arith_type_to(&Ty::INT, &Ty::DOUBLE), Some(Ty::DOUBLE));
        assert_eq!(arith_type_to(&Ty::DOUBLE, &Ty::INT), Some(Ty::DOUBLE));
        assert_eq!(arith_type_to(&Ty::CHAR, &Ty::INT), Some(Ty::INT));
        assert_eq!(arith_type_to(&Ty::CHAR, &Ty::CHAR), Some(Ty::CHAR));
    }

    #[test]
    fn arith_rejects_void_structs_and_arrays() {
        let (_, p) = table_with_point();
        assert_eq!(arith_type_to(&Ty::VOID, &Ty::INT), None);
        assert_eq!(arith_type_to(&Ty::scalar(TyBase::Struct(p)), &Ty::INT), None);
        assert_eq!(arith_type_to(&Ty::array(TyBase::Int, 3), &Ty::INT), None);
    }

    #[test]
    fn conv_is_reflexive_on_scalars_and_numeric_both_ways() {
        for t in [Ty::INT, Ty::DOUBLE, Ty::CHAR] {
            assert!(conv_to(&t, &t));
        }
        assert!(conv_to(&Ty::DOUBLE, &Ty::INT));
        assert!(conv_to(&Ty::INT, &Ty::DOUBLE));
        assert!(conv_to(&Ty::CHAR, &Ty::DOUBLE));
    }

    #[test]
    fn conv_never_mixes_scalars_and_arrays() {
        assert!(!conv_to(&Ty::INT, &Ty::array(TyBase::Int, 3)));
        assert!(!conv_to(&Ty::array(TyBase::Int, 3), &Ty::INT));
    }

    #[test]
    fn conv_on_arrays_requires_the_same_element_type() {
        assert!(conv_to(
            &Ty::array(TyBase::Int, 3),
            &Ty::array(TyBase::Int, 0)
        ));
        assert!(!conv_to(
            &Ty::array(TyBase::Int, 3),
            &Ty::array(TyBase::Double, 3)
        ));
    }

    #[test]
    fn conv_on_structs_requires_identity() {
        let (mut st, p) = table_with_point();
        let q = st
            .add(Symbol {
                name: "Q".to_string(),
                kind: SymbolKind::Struct { members: vec![] },
                ty: Ty::VOID,
                owner: None,
            })
            .unwrap();
        st.get_mut(q).ty = Ty::scalar(TyBase::Struct(q));
        let tp = Ty::scalar(TyBase::Struct(p));
        let tq = Ty::scalar(TyBase::Struct(q));
        assert!(conv_to(&tp, &tp));
        assert!(!conv_to(&tp, &tq));
        assert!(!conv_to(&tp, &Ty::INT));
    }

    #[test]
    fn void_converts_to_nothing() {
        assert!(!conv_to(&Ty::VOID, &Ty::VOID));
        assert!(!conv_to(&Ty::VOID, &Ty::INT));
        assert!(!conv_to(&Ty::INT, &Ty::VOID));
    }
}
