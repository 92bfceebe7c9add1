//! Runtime value cells.
//!
//! Every slot on the value stack and in the global data segment is one
//! [`Value`]. The compiler guarantees which variant an instruction will find;
//! the interpreter still checks and reports a fatal error on a mismatch
//! instead of reinterpreting bits.

use std::fmt;

use crate::program::CodeId;

/// Address of one cell in machine memory.
///
/// Memory is cell-granular: arrays and structs occupy consecutive cells, one
/// per scalar element, and address arithmetic moves in whole cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAddr {
    /// A cell in the global data segment.
    Data(usize),
    /// A cell on the value stack, by absolute slot index.
    Stack(usize),
}

impl MemAddr {
    /// Advance the address by a signed number of cells.
    ///
    /// Returns `None` when the result would fall below the start of the
    /// region; upper-bound checks happen at load/store time.
    pub fn offset(self, cells: i64) -> Option<MemAddr> {
        let shift = |base: usize| {
            let target = base as i64 + cells;
            usize::try_from(target).ok()
        };
        match self {
            MemAddr::Data(base) => shift(base).map(MemAddr::Data),
            MemAddr::Stack(base) => shift(base).map(MemAddr::Stack),
        }
    }
}

impl fmt::Display for MemAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemAddr::Data(i) => write!(f, "data[{}]", i),
            MemAddr::Stack(i) => write!(f, "stack[{}]", i),
        }
    }
}

/// Address of one instruction: a code buffer and an index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeAddr {
    pub code: CodeId,
    pub index: usize,
}

impl fmt::Display for CodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.code.index(), self.index)
    }
}

/// One 64-bit machine cell.
///
/// `Code` and `Frame` only ever appear in the bookkeeping slots of a call
/// frame (return address and saved frame pointer); compiled programs never
/// load or store them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Double(f64),
    /// Address of a data or stack cell.
    Addr(MemAddr),
    /// Return address pushed by `CALL`.
    Code(CodeAddr),
    /// Saved frame pointer pushed by `ENTER`.
    Frame(usize),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "i:{}", i),
            Value::Double(d) => write!(f, "f:{}", d),
            Value::Addr(a) => write!(f, "p:{}", a),
            Value::Code(a) => write!(f, "ret:{}", a),
            Value::Frame(n) => write!(f, "fp:{}", n),
        }
    }
}
