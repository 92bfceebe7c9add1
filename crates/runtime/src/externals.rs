//! Host functions callable from compiled code through `CALL_EXT`.
//!
//! Each entry describes its AtomC-visible signature so the compiler can
//! register it as an external function symbol and type-check call sites.
//! Handlers follow the machine's calling convention for externals: the
//! caller has pushed the arguments left to right, the handler pops them and
//! pushes a return value only when it declares one.

use crate::vm::Vm;

/// Index into the host function registry, stored in `CALL_EXT`.
pub type ExtId = usize;

/// Scalar kinds a host function can declare in its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Int,
    Double,
}

/// Description of one host function.
pub struct HostFn {
    pub name: &'static str,
    /// Parameter names and kinds, in declaration order.
    pub params: &'static [(&'static str, HostKind)],
    /// `None` declares a void return.
    pub ret: Option<HostKind>,
    pub handler: fn(&mut Vm) -> Result<(), String>,
}

/// The registry of shipped host functions, indexed by [`ExtId`].
pub fn host_fns() -> &'static [HostFn] {
    &HOST_FNS
}

static HOST_FNS: [HostFn; 2] = [
    HostFn {
        name: "put_i",
        params: &[("i", HostKind::Int)],
        ret: None,
        handler: put_i,
    },
    HostFn {
        name: "put_d",
        params: &[("d", HostKind::Double)],
        ret: None,
        handler: put_d,
    },
];

fn put_i(vm: &mut Vm) -> Result<(), String> {
    let n = vm.pop_int()?;
    vm.write_out(&format!("=> {}", n))
}

fn put_d(vm: &mut Vm) -> Result<(), String> {
    let d = vm.pop_double()?;
    vm.write_out(&format!("=> {:.6}", d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_names_are_unique() {
        let fns = host_fns();
        for (i, a) in fns.iter().enumerate() {
            for b in &fns[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn put_fns_are_void_unary() {
        for host in host_fns() {
            assert_eq!(host.params.len(), 1);
            assert!(host.ret.is_none());
        }
    }
}
