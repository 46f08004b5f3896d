//! Use-based escape queries shared by the collection and allocation passes.

use crate::ir::{Function, InstId, Op, Operand};

fn is(operand: &Operand, id: InstId) -> bool {
    operand.as_inst() == Some(id)
}

/// Whether the pointer `id` is only read through, possibly via `gep`.
pub(crate) fn only_read(func: &Function, id: InstId) -> bool {
    func.uses_of_inst(id).into_iter().all(|user| match func.inst(user).map(|i| &i.op) {
        Some(Op::Load { ptr }) => is(ptr, id),
        Some(Op::Gep { .. }) => only_read(func, user),
        _ => false,
    })
}

/// Whether the pointer `id` never leaves the function: it is only loaded
/// from, stored to, offset or compared.
pub(crate) fn does_not_escape(func: &Function, id: InstId) -> bool {
    func.uses_of_inst(id).into_iter().all(|user| match func.inst(user).map(|i| &i.op) {
        Some(Op::Load { .. }) | Some(Op::ICmp { .. }) => true,
        Some(Op::Store { ptr, value }) => is(ptr, id) && !is(value, id),
        Some(Op::Gep { .. }) => does_not_escape(func, user),
        _ => false,
    })
}
