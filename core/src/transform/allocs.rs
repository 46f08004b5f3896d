use log::debug;

use super::escape::does_not_escape;
use crate::ir::{InstId, Module, Op};

/// Largest heap allocation moved to the stack, in bytes.
pub const MAX_STACK_ALLOC: u64 = 256;

/// Turn small constant-size heap allocations that never escape into stack
/// allocations.
pub fn optimize_allocs(module: &mut Module) -> usize {
    let mut converted = 0;
    for func in module.functions.iter_mut() {
        let candidates: Vec<(InstId, u64)> = func
            .insts()
            .filter_map(|i| match &i.op {
                Op::Alloc { size } => match size.as_const_int() {
                    Some(n) if n >= 0 && (n as u64) <= MAX_STACK_ALLOC => Some((i.id, n as u64)),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        for (id, size) in candidates {
            if !does_not_escape(func, id) {
                continue;
            }
            if let Some(inst) = func.inst_mut(id) {
                inst.op = Op::StackAlloc { size };
                converted += 1;
            }
        }
    }
    if converted > 0 {
        debug!("moved {} allocation(s) to the stack", converted);
    }
    converted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn small_local_allocations_move_to_the_stack() {
        let mut m = parse_module(
            "module t
declare @keep(ptr) -> void
define @f() -> i64 {
bb0:
  %0 : ptr = alloc 16:i64
  store %0, 5:i64
  %1 : i64 = load %0
  %2 : ptr = alloc 512:i64
  store %2, 1:i64
  %3 : ptr = alloc 8:i64
  call @keep(%3)
  ret %1
}
",
            "t.kir",
        )
        .unwrap();
        assert_eq!(optimize_allocs(&mut m), 1);
        let f = m.function(m.named_function("f").unwrap());
        assert_eq!(f.inst(crate::ir::InstId(0)).map(|i| &i.op), Some(&Op::StackAlloc { size: 16 }));
        assert_eq!(optimize_allocs(&mut m), 0);
    }
}
