//! The compiled program image: code buffers and the global data segment.
//!
//! Every function body owns one [`CodeBuf`]; a separate buffer holds the
//! synthesized entry code that calls `main` and halts. Buffers support the
//! three operations the compiler's backtracking emitter needs: append,
//! truncate back to a recorded length, and patch an instruction in place
//! (jump targets, `ENTER` local counts, reserved conversion slots).

use crate::instr::Instr;
use crate::value::{CodeAddr, Value};

/// Handle to one code buffer inside a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeId(usize);

impl CodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A growable instruction buffer owned by one function (or the entry driver).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeBuf {
    instrs: Vec<Instr>,
}

impl CodeBuf {
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Append an instruction and return its index.
    pub fn push(&mut self, instr: Instr) -> usize {
        self.instrs.push(instr);
        self.instrs.len() - 1
    }

    /// Discard every instruction at or beyond `len`.
    pub fn truncate(&mut self, len: usize) {
        self.instrs.truncate(len);
    }

    /// Overwrite the instruction at `at`.
    pub fn patch(&mut self, at: usize, instr: Instr) {
        if let Some(slot) = self.instrs.get_mut(at) {
            *slot = instr;
        }
    }

    pub fn get(&self, at: usize) -> Option<Instr> {
        self.instrs.get(at).copied()
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }
}

/// A complete executable image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    bufs: Vec<CodeBuf>,
    /// Initial contents of the global data segment, one cell per scalar
    /// element of every global (and every string literal).
    pub data: Vec<Value>,
    /// Buffer the machine starts in; its last instruction is `HALT`.
    pub entry: Option<CodeId>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    /// Create a new empty code buffer and return its handle.
    pub fn add_buf(&mut self) -> CodeId {
        self.bufs.push(CodeBuf::default());
        CodeId(self.bufs.len() - 1)
    }

    pub fn buf(&self, id: CodeId) -> &CodeBuf {
        &self.bufs[id.0]
    }

    pub fn buf_mut(&mut self, id: CodeId) -> &mut CodeBuf {
        &mut self.bufs[id.0]
    }

    /// Fetch the instruction at an execution address, if it exists.
    pub fn fetch(&self, at: CodeAddr) -> Option<Instr> {
        self.bufs.get(at.code.0).and_then(|b| b.get(at.index))
    }

    /// Append cells to the data segment and return the base index of the
    /// allocated block.
    pub fn alloc_data(&mut self, cells: impl IntoIterator<Item = Value>) -> usize {
        let base = self.data.len();
        self.data.extend(cells);
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_returns_the_new_index() {
        let mut buf = CodeBuf::default();
        assert_eq!(buf.push(Instr::Nop), 0);
        assert_eq!(buf.push(Instr::Halt), 1);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn truncate_discards_the_tail() {
        let mut buf = CodeBuf::default();
        buf.push(Instr::PushI(1));
        let mark = buf.len();
        buf.push(Instr::PushI(2));
        buf.push(Instr::AddI);
        buf.truncate(mark);
        assert_eq!(buf.instrs(), &[Instr::PushI(1)]);
    }

    #[test]
    fn patch_overwrites_in_place() {
        let mut buf = CodeBuf::default();
        let jf = buf.push(Instr::Jf(0));
        let target = buf.push(Instr::Nop);
        buf.patch(jf, Instr::Jf(target));
        assert_eq!(buf.get(jf), Some(Instr::Jf(1)));
    }

    #[test]
    fn alloc_data_hands_out_consecutive_blocks() {
        let mut prog = Program::new();
        let a = prog.alloc_data([Value::Int(0), Value::Int(0)]);
        let b = prog.alloc_data([Value::Double(0.0)]);
        assert_eq!((a, b), (0, 2));
        assert_eq!(prog.data.len(), 3);
    }

    #[test]
    fn fetch_is_none_past_the_end() {
        let mut prog = Program::new();
        let id = prog.add_buf();
        prog.buf_mut(id).push(Instr::Halt);
        assert_eq!(
            prog.fetch(CodeAddr { code: id, index: 0 }),
            Some(Instr::Halt)
        );
        assert_eq!(prog.fetch(CodeAddr { code: id, index: 1 }), None);
    }
}
