//! The stack interpreter.
//!
//! Execution model: one instruction pointer, a value stack of fixed
//! capacity, and a frame pointer. A call frame for a function of `p`
//! parameters and `k` local cells looks like this (indices relative to FP,
//! the stack growing upward):
//!
//! ```text
//! FP-p-1 .. FP-2   arguments, pushed by the caller left to right
//! FP-1             return address
//! FP+0             saved FP
//! FP+1 .. FP+k     locals
//! ```
//!
//! `ENTER` builds the upper half, `RET`/`RET_VOID` unwind the whole frame
//! including the arguments. The machine runs until `HALT`; every error is
//! fatal.

use std::io::Write;

use crate::externals::host_fns;
use crate::instr::Instr;
use crate::program::Program;
use crate::value::{CodeAddr, MemAddr, Value};

/// Default capacity of the value stack, in cells.
pub const DEFAULT_STACK_CELLS: usize = 10_000;

pub struct Vm<'a> {
    program: &'a Program,
    out: &'a mut dyn Write,
    /// Working copy of the global data segment.
    data: Vec<Value>,
    stack: Vec<Value>,
    fp: usize,
    max_stack: usize,
    trace: bool,
}

impl<'a> Vm<'a> {
    pub fn new(program: &'a Program, out: &'a mut dyn Write) -> Self {
        Vm {
            program,
            out,
            data: program.data.clone(),
            stack: Vec::new(),
            fp: 0,
            max_stack: DEFAULT_STACK_CELLS,
            trace: false,
        }
    }

    pub fn with_stack_size(mut self, cells: usize) -> Self {
        self.max_stack = cells;
        self
    }

    pub fn with_trace(mut self, on: bool) -> Self {
        self.trace = on;
        self
    }

    /// Number of cells currently on the value stack.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Run from the program's entry buffer until `HALT`.
    pub fn run(&mut self) -> Result<(), String> {
        let entry = self
            .program
            .entry
            .ok_or_else(|| "the program has no entry point".to_string())?;
        let mut ip = CodeAddr {
            code: entry,
            index: 0,
        };
        loop {
            let instr = self
                .program
                .fetch(ip)
                .ok_or_else(|| format!("instruction pointer out of code at {}", ip))?;
            if self.trace {
                eprintln!("{}/{}\t{}", ip, self.stack.len(), instr);
            }
            match instr {
                Instr::Halt => {
                    self.out
                        .flush()
                        .map_err(|e| format!("output error: {}", e))?;
                    return Ok(());
                }
                Instr::Nop => {}
                Instr::PushI(v) => self.push(Value::Int(v))?,
                Instr::PushF(v) => self.push(Value::Double(v))?,
                Instr::Addr(base) => self.push(Value::Addr(MemAddr::Data(base)))?,
                Instr::FpAddrI(off) | Instr::FpAddrF(off) => {
                    let slot = (self.fp as i64) + off;
                    let slot = usize::try_from(slot)
                        .map_err(|_| format!("frame address below the stack: FP{:+}", off))?;
                    self.push(Value::Addr(MemAddr::Stack(slot)))?;
                }
                Instr::LoadI => {
                    let addr = self.pop_addr()?;
                    match self.load(addr)? {
                        v @ (Value::Int(_) | Value::Addr(_)) => self.push(v)?,
                        v => return Err(format!("LOAD.i: the cell at {} holds {}", addr, v)),
                    }
                }
                Instr::LoadF => {
                    let addr = self.pop_addr()?;
                    match self.load(addr)? {
                        v @ Value::Double(_) => self.push(v)?,
                        v => return Err(format!("LOAD.f: the cell at {} holds {}", addr, v)),
                    }
                }
                Instr::StoreI => {
                    let v = self.pop()?;
                    if !matches!(v, Value::Int(_) | Value::Addr(_)) {
                        return Err(format!("STORE.i: expected an int on the stack, found {}", v));
                    }
                    let addr = self.pop_addr()?;
                    self.store(addr, v)?;
                    self.push(v)?;
                }
                Instr::StoreF => {
                    let v = self.pop()?;
                    if !matches!(v, Value::Double(_)) {
                        return Err(format!(
                            "STORE.f: expected a double on the stack, found {}",
                            v
                        ));
                    }
                    let addr = self.pop_addr()?;
                    self.store(addr, v)?;
                    self.push(v)?;
                }
                Instr::Drop => {
                    self.pop()?;
                }
                Instr::Enter(locals) => {
                    self.push(Value::Frame(self.fp))?;
                    self.fp = self.stack.len() - 1;
                    for _ in 0..locals {
                        self.push(Value::Int(0))?;
                    }
                }
                Instr::Call(target) => {
                    self.push(Value::Code(CodeAddr {
                        code: ip.code,
                        index: ip.index + 1,
                    }))?;
                    ip = CodeAddr {
                        code: target,
                        index: 0,
                    };
                    continue;
                }
                Instr::CallExt(id) => {
                    let host = host_fns()
                        .get(id)
                        .ok_or_else(|| format!("call to unresolved external function {}", id))?;
                    (host.handler)(self)?;
                }
                Instr::Ret(args) => {
                    let v = self.pop()?;
                    ip = self.unwind_frame(args)?;
                    self.push(v)?;
                    continue;
                }
                Instr::RetVoid(args) => {
                    ip = self.unwind_frame(args)?;
                    continue;
                }
                Instr::Jmp(target) => {
                    ip.index = target;
                    continue;
                }
                Instr::Jf(target) => {
                    if self.pop_int()? == 0 {
                        ip.index = target;
                        continue;
                    }
                }
                Instr::AddI => self.bin_i(i64::wrapping_add)?,
                Instr::SubI => self.bin_i(i64::wrapping_sub)?,
                Instr::MulI => self.bin_i(i64::wrapping_mul)?,
                Instr::DivI => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    if b == 0 {
                        return Err("division by zero".to_string());
                    }
                    self.push(Value::Int(a.wrapping_div(b)))?;
                }
                Instr::AddF => self.bin_f(|a, b| a + b)?,
                Instr::SubF => self.bin_f(|a, b| a - b)?,
                Instr::MulF => self.bin_f(|a, b| a * b)?,
                Instr::DivF => self.bin_f(|a, b| a / b)?,
                Instr::LessI => self.cmp_i(|a, b| a < b)?,
                Instr::LessEqI => self.cmp_i(|a, b| a <= b)?,
                Instr::GreaterI => self.cmp_i(|a, b| a > b)?,
                Instr::GreaterEqI => self.cmp_i(|a, b| a >= b)?,
                Instr::EqI => self.cmp_i(|a, b| a == b)?,
                Instr::NotEqI => self.cmp_i(|a, b| a != b)?,
                Instr::LessF => self.cmp_f(|a, b| a < b)?,
                Instr::LessEqF => self.cmp_f(|a, b| a <= b)?,
                Instr::GreaterF => self.cmp_f(|a, b| a > b)?,
                Instr::GreaterEqF => self.cmp_f(|a, b| a >= b)?,
                Instr::EqF => self.cmp_f(|a, b| a == b)?,
                Instr::NotEqF => self.cmp_f(|a, b| a != b)?,
                Instr::ConvFI => {
                    let d = self.pop_double()?;
                    self.push(Value::Int(d as i64))?;
                }
                Instr::ConvIF => {
                    let i = self.pop_int()?;
                    self.push(Value::Double(i as f64))?;
                }
                Instr::Offset => {
                    let cells = self.pop_int()?;
                    let addr = self.pop_addr()?;
                    let addr = addr
                        .offset(cells)
                        .ok_or_else(|| format!("address out of range: {}{:+}", addr, cells))?;
                    self.push(Value::Addr(addr))?;
                }
            }
            ip.index += 1;
        }
    }

    /// Drop locals, saved FP, return address and `args` argument cells;
    /// restore FP and hand back the return address.
    fn unwind_frame(&mut self, args: usize) -> Result<CodeAddr, String> {
        let ret = match self.stack.get(self.fp.wrapping_sub(1)) {
            Some(Value::Code(addr)) => *addr,
            _ => return Err("malformed call frame: no return address".to_string()),
        };
        let saved = match self.stack.get(self.fp) {
            Some(Value::Frame(fp)) => *fp,
            _ => return Err("malformed call frame: no saved frame pointer".to_string()),
        };
        let new_len = self
            .fp
            .checked_sub(1 + args)
            .ok_or_else(|| "malformed call frame: arguments below the stack".to_string())?;
        self.stack.truncate(new_len);
        self.fp = saved;
        Ok(ret)
    }

    fn push(&mut self, v: Value) -> Result<(), String> {
        if self.stack.len() == self.max_stack {
            return Err("trying to push into a full stack".to_string());
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, String> {
        self.stack
            .pop()
            .ok_or_else(|| "trying to pop from empty stack".to_string())
    }

    pub fn pop_int(&mut self) -> Result<i64, String> {
        match self.pop()? {
            Value::Int(i) => Ok(i),
            v => Err(format!("expected an int on the stack, found {}", v)),
        }
    }

    pub fn pop_double(&mut self) -> Result<f64, String> {
        match self.pop()? {
            Value::Double(d) => Ok(d),
            v => Err(format!("expected a double on the stack, found {}", v)),
        }
    }

    fn pop_addr(&mut self) -> Result<MemAddr, String> {
        match self.pop()? {
            Value::Addr(a) => Ok(a),
            v => Err(format!("expected an address on the stack, found {}", v)),
        }
    }

    fn load(&self, addr: MemAddr) -> Result<Value, String> {
        let cell = match addr {
            MemAddr::Data(i) => self.data.get(i),
            MemAddr::Stack(i) => self.stack.get(i),
        };
        cell.copied()
            .ok_or_else(|| format!("address out of range: {}", addr))
    }

    fn store(&mut self, addr: MemAddr, v: Value) -> Result<(), String> {
        let cell = match addr {
            MemAddr::Data(i) => self.data.get_mut(i),
            MemAddr::Stack(i) => self.stack.get_mut(i),
        };
        match cell {
            Some(cell) => {
                *cell = v;
                Ok(())
            }
            None => Err(format!("address out of range: {}", addr)),
        }
    }

    fn bin_i(&mut self, op: fn(i64, i64) -> i64) -> Result<(), String> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Value::Int(op(a, b)))
    }

    fn bin_f(&mut self, op: fn(f64, f64) -> f64) -> Result<(), String> {
        let b = self.pop_double()?;
        let a = self.pop_double()?;
        self.push(Value::Double(op(a, b)))
    }

    fn cmp_i(&mut self, op: fn(i64, i64) -> bool) -> Result<(), String> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Value::Int(op(a, b) as i64))
    }

    fn cmp_f(&mut self, op: fn(f64, f64) -> bool) -> Result<(), String> {
        let b = self.pop_double()?;
        let a = self.pop_double()?;
        self.push(Value::Int(op(a, b) as i64))
    }

    /// Write program output (host functions go through this).
    pub fn write_out(&mut self, text: &str) -> Result<(), String> {
        self.out
            .write_all(text.as_bytes())
            .map_err(|e| format!("output error: {}", e))
    }
}
