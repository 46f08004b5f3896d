//! Domain-specific optimizations and the lowering transforms that turn
//! high-level constructs into primitive IR.

pub mod allocs;
pub mod err;
mod escape;
pub mod func_values;
pub mod gc;
pub mod interfaces;
pub mod linkage;
pub mod maps;
pub mod nilcheck;
pub mod panics;
pub mod strings;
pub mod tasks;

pub use allocs::optimize_allocs;
pub use err::{LoweringError, PreconditionViolation};
pub use func_values::lower_func_values;
pub use gc::{add_globals_bitmap, make_gc_stack_slots};
pub use interfaces::lower_interfaces;
pub use linkage::finalize_linkage;
pub use maps::optimize_maps;
pub use nilcheck::lower_nil_checks;
pub use panics::replace_panics_with_trap;
pub use strings::optimize_string_to_bytes;
pub use tasks::lower_tasks;

use crate::ir::{Constant, Module, Operand, Type};

/// Replace every occurrence of `from` with `to` in signatures, globals,
/// instruction result types and undef constants.
pub(crate) fn retype(module: &mut Module, from: Type, to: Type) {
    let swap = |t: &mut Type| {
        if *t == from {
            *t = to;
        }
    };
    for g in module.globals.iter_mut() {
        swap(&mut g.ty);
    }
    for func in module.functions.iter_mut() {
        func.params.iter_mut().for_each(swap);
        swap(&mut func.ret);
        for block in func.blocks.iter_mut() {
            for inst in block.insts.iter_mut() {
                swap(&mut inst.ty);
                for operand in inst.op.operands_mut() {
                    if let Operand::Const(Constant::Undef(t)) = operand {
                        swap(t);
                    }
                }
            }
        }
    }
}
