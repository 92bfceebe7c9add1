//! The instruction set of the stack machine.
//!
//! Each variant carries its own argument, so an instruction is a single
//! self-contained cell in a code buffer. Jump arguments are absolute indices
//! into the owning buffer; `CALL` targets name the callee's buffer, whose
//! instruction 0 is always its `ENTER`.

use std::fmt;

use crate::externals::ExtId;
use crate::program::CodeId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instr {
    /// Stop the machine.
    Halt,
    /// Do nothing. Used as a jump landing pad and as a reserved slot that the
    /// compiler may later patch into a conversion.
    Nop,
    /// Push an int constant.
    PushI(i64),
    /// Push a double constant.
    PushF(f64),
    /// Push the address of a global data cell.
    Addr(usize),
    /// Push the address of the frame cell at the given offset from FP.
    /// Positive offsets reach locals, negative offsets reach arguments.
    FpAddrI(i64),
    /// Same as `FpAddrI` for cells declared as doubles.
    FpAddrF(i64),
    /// Pop an address; push the int (or address) cell it refers to.
    LoadI,
    /// Pop an address; push the double cell it refers to.
    LoadF,
    /// Pop an int, pop a destination address, store, re-push the int.
    StoreI,
    /// Pop a double, pop a destination address, store, re-push the double.
    StoreF,
    /// Pop and discard the top cell.
    Drop,
    /// Open a call frame with the given number of local cells.
    Enter(usize),
    /// Push the return address and continue at the named buffer.
    Call(CodeId),
    /// Invoke a host function synchronously.
    CallExt(ExtId),
    /// Pop the return value, unwind the frame and the given number of
    /// argument cells, re-push the return value.
    Ret(usize),
    /// Unwind the frame and the given number of argument cells.
    RetVoid(usize),
    /// Continue at the given index of the current buffer.
    Jmp(usize),
    /// Pop an int; jump when it is zero.
    Jf(usize),
    AddI,
    AddF,
    SubI,
    SubF,
    MulI,
    MulF,
    DivI,
    DivF,
    LessI,
    LessF,
    LessEqI,
    LessEqF,
    GreaterI,
    GreaterF,
    GreaterEqI,
    GreaterEqF,
    EqI,
    EqF,
    NotEqI,
    NotEqF,
    /// Truncate the double on top of the stack to an int.
    ConvFI,
    /// Widen the int on top of the stack to a double.
    ConvIF,
    /// Pop a cell count, pop an address, push the advanced address.
    Offset,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Halt => write!(f, "HALT"),
            Instr::Nop => write!(f, "NOP"),
            Instr::PushI(v) => write!(f, "PUSH.i\t{}", v),
            Instr::PushF(v) => write!(f, "PUSH.f\t{}", v),
            Instr::Addr(base) => write!(f, "ADDR\t{}", base),
            Instr::FpAddrI(off) => write!(f, "FPADDR.i\t{}", off),
            Instr::FpAddrF(off) => write!(f, "FPADDR.f\t{}", off),
            Instr::LoadI => write!(f, "LOAD.i"),
            Instr::LoadF => write!(f, "LOAD.f"),
            Instr::StoreI => write!(f, "STORE.i"),
            Instr::StoreF => write!(f, "STORE.f"),
            Instr::Drop => write!(f, "DROP"),
            Instr::Enter(n) => write!(f, "ENTER\t{}", n),
            Instr::Call(id) => write!(f, "CALL\t{}", id.index()),
            Instr::CallExt(id) => write!(f, "CALL_EXT\t{}", id),
            Instr::Ret(n) => write!(f, "RET\t{}", n),
            Instr::RetVoid(n) => write!(f, "RET_VOID\t{}", n),
            Instr::Jmp(t) => write!(f, "JMP\t{}", t),
            Instr::Jf(t) => write!(f, "JF\t{}", t),
            Instr::AddI => write!(f, "ADD.i"),
            Instr::AddF => write!(f, "ADD.f"),
            Instr::SubI => write!(f, "SUB.i"),
            Instr::SubF => write!(f, "SUB.f"),
            Instr::MulI => write!(f, "MUL.i"),
            Instr::MulF => write!(f, "MUL.f"),
            Instr::DivI => write!(f, "DIV.i"),
            Instr::DivF => write!(f, "DIV.f"),
            Instr::LessI => write!(f, "LESS.i"),
            Instr::LessF => write!(f, "LESS.f"),
            Instr::LessEqI => write!(f, "LESSEQ.i"),
            Instr::LessEqF => write!(f, "LESSEQ.f"),
            Instr::GreaterI => write!(f, "GREATER.i"),
            Instr::GreaterF => write!(f, "GREATER.f"),
            Instr::GreaterEqI => write!(f, "GREATEREQ.i"),
            Instr::GreaterEqF => write!(f, "GREATEREQ.f"),
            Instr::EqI => write!(f, "EQ.i"),
            Instr::EqF => write!(f, "EQ.f"),
            Instr::NotEqI => write!(f, "NOTEQ.i"),
            Instr::NotEqF => write!(f, "NOTEQ.f"),
            Instr::ConvFI => write!(f, "CONV.f.i"),
            Instr::ConvIF => write!(f, "CONV.i.f"),
            Instr::Offset => write!(f, "OFFSET"),
        }
    }
}
