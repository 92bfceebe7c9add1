//! AtomC stack machine
//!
//! The executable half of the AtomC toolchain. The compiler lowers a source
//! unit into a [`Program`]: one instruction buffer per function, a synthesized
//! entry buffer that calls `main`, and the initial image of the global data
//! segment. [`Vm`] interprets that image with a value stack and a frame
//! pointer; host functions such as `put_i` are invoked through `CALL_EXT`.
//!
//! The machine is deliberately small: every value is one 64-bit cell, memory
//! is cell-granular, and the instruction set is a closed enumeration. Nothing
//! here mutates a program once it has been built.

pub mod externals;
pub mod instr;
pub mod program;
pub mod value;
pub mod vm;

pub use externals::{ExtId, HostFn, HostKind, host_fns};
pub use instr::Instr;
pub use program::{CodeBuf, CodeId, Program};
pub use value::{CodeAddr, MemAddr, Value};
pub use vm::{DEFAULT_STACK_CELLS, Vm};
