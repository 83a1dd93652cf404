//! Escape analysis for stack allocations.
//!
//! A slice containing an `alloca` may only be outlined if the allocation's
//! address stays local: once the address is written to memory, laundered
//! through an integer, or handed to an opaque callee, re-running the slice
//! inside a thunk would duplicate a slot other code may observe. This
//! module decides, per allocation, whether any use could write the address
//! into memory or access memory outside the allocated bounds.
//!
//! The decision table walks the allocation's users, tracking the remaining
//! in-bounds size as the address flows through element addressing and
//! bit-preserving forwarders:
//!
//! - memory accesses larger than the remaining size escape
//! - storing the address itself (not through it) escapes
//! - a compare-exchange whose replacement is the address escapes
//! - pointer-to-integer conversion escapes
//! - invokes always escape; calls escape unless the callee is known pure
//!   or a lifetime/debug intrinsic
//! - constant-offset element addresses recurse with the remaining size;
//!   out-of-bounds or dynamic offsets escape
//! - bit/address-space reshapes, selects, and phis forward with the same
//!   size
//! - loads, atomic read-modify-writes, and returns contribute nothing
//! - anything else escapes conservatively

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{CastKind, ElemOffset, FnAttrs, Function, Inst, Module, Op, ValueId};

/// Returns `true` iff the address produced by `alloca` may escape or be
/// used to access memory outside `[0, alloc_size)`.
#[must_use]
pub fn address_escapes(
    module: &Module,
    func: &Function,
    alloca: ValueId,
    alloc_size: u64,
) -> bool {
    let users = collect_users(func);
    let mut visited = FxHashSet::default();
    escapes_through(module, func, &users, alloca, alloc_size, &mut visited)
}

/// Map from value to the instructions using it.
fn collect_users(func: &Function) -> FxHashMap<ValueId, Vec<&Inst>> {
    let mut users: FxHashMap<ValueId, Vec<&Inst>> = FxHashMap::default();
    for inst in func.all_insts() {
        for used in inst.op().uses() {
            users.entry(used).or_default().push(inst);
        }
    }
    users
}

fn access_size(module: &Module, func: &Function, value: ValueId) -> u64 {
    module.size_of(func.value_ty(value))
}

fn escapes_through(
    module: &Module,
    func: &Function,
    users: &FxHashMap<ValueId, Vec<&Inst>>,
    value: ValueId,
    remaining: u64,
    visited: &mut FxHashSet<ValueId>,
) -> bool {
    if !visited.insert(value) {
        return false;
    }

    let Some(direct_users) = users.get(&value) else {
        return false;
    };

    for user in direct_users {
        let escapes = match user.op() {
            // Reading through the pointer is fine as long as it stays in
            // bounds.
            Op::Load { .. } => access_size(module, func, user.id()) > remaining,

            Op::Store {
                addr,
                value: stored,
            } => {
                if *stored == value {
                    true
                } else {
                    debug_assert_eq!(*addr, value);
                    access_size(module, func, *stored) > remaining
                }
            }

            Op::CmpXchg {
                expected,
                replacement,
                ..
            } => *replacement == value || access_size(module, func, *expected) > remaining,

            // Load-like: the stored operand must be an integer, and a
            // laundered pointer is caught at its ptrtoint.
            Op::AtomicRmw { value: operand, .. } => {
                access_size(module, func, *operand) > remaining
            }

            Op::Cast { kind, .. } => match kind {
                CastKind::PtrToInt => true,
                CastKind::Bitcast | CastKind::AddrSpace => {
                    escapes_through(module, func, users, user.id(), remaining, visited)
                }
                _ => true,
            },

            Op::ElemAddr { offset, .. } => match offset {
                ElemOffset::Const(off) => {
                    *off >= remaining
                        || escapes_through(
                            module,
                            func,
                            users,
                            user.id(),
                            remaining - off,
                            visited,
                        )
                }
                ElemOffset::Dynamic(_) => true,
            },

            Op::Select { .. } | Op::Phi { .. } => {
                escapes_through(module, func, users, user.id(), remaining, visited)
            }

            Op::Invoke { .. } => true,
            Op::Call { effects, .. } => {
                !effects.intersects(
                    FnAttrs::PURE | FnAttrs::READONLY | FnAttrs::LIFETIME | FnAttrs::DEBUG,
                )
            }

            Op::Return { .. } => false,

            // Conservatively treat every other user as an escape.
            _ => true,
        };

        if escapes {
            return true;
        }
    }

    false
}
