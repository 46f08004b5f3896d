//! Control-flow cleanup: constant branches, truncation after calls that
//! never return, unreachable-block removal and straight-line block merging.
//!
//! `trap` is treated as an opaque side effect here; code following it is
//! only dropped when the block also calls a `noreturn` function.

use std::collections::HashSet;

use crate::ir::cfg;
use crate::ir::{Attribute, BlockId, FuncId, Function, Inst, Module, Op, Operand, Type, Constant};

pub(crate) fn run(module: &mut Module, id: FuncId) -> bool {
    let no_return: HashSet<FuncId> = module
        .func_ids()
        .filter(|f| module.function(*f).has_attr(Attribute::NoReturn))
        .collect();
    let func = module.function_mut(id);
    let mut changed = false;
    changed |= fold_constant_branches(func);
    changed |= truncate_after_no_return(func, &no_return);
    changed |= remove_unreachable_blocks(func);
    changed |= merge_blocks(func);
    changed
}

fn fold_constant_branches(func: &mut Function) -> bool {
    let mut changed = false;
    for block in func.blocks.iter_mut() {
        let Some(last) = block.insts.last_mut() else { continue };
        if let Op::CondBr { cond, then_block, else_block } = &last.op {
            let target = match cond.as_const_int() {
                Some(0) => Some(*else_block),
                Some(_) => Some(*then_block),
                None if then_block == else_block => Some(*then_block),
                None => None,
            };
            if let Some(target) = target {
                last.op = Op::Br { target };
                changed = true;
            }
        }
    }
    changed
}

fn truncate_after_no_return(func: &mut Function, no_return: &HashSet<FuncId>) -> bool {
    let mut dropped: Vec<Inst> = Vec::new();
    let mut spare_ids = Vec::new();
    for (bi, block) in func.blocks.iter().enumerate() {
        let cut = block
            .insts
            .iter()
            .position(|i| i.op.direct_callee().is_some_and(|c| no_return.contains(&c)));
        if let Some(cut) = cut {
            let already = block.insts.len() == cut + 2 && matches!(block.insts[cut + 1].op, Op::Unreachable);
            if !already {
                spare_ids.push((bi, cut));
            }
        }
    }
    if spare_ids.is_empty() {
        return false;
    }
    for (bi, cut) in spare_ids {
        let id = func.alloc_inst_id();
        let block = &mut func.blocks[bi];
        dropped.extend(block.insts.drain(cut + 1..));
        block.insts.push(Inst { id, ty: Type::Void, op: Op::Unreachable });
    }
    for inst in dropped {
        func.replace_all_uses(inst.id, &Operand::Const(Constant::Undef(inst.ty)));
    }
    true
}

fn remove_unreachable_blocks(func: &mut Function) -> bool {
    let reachable = cfg::reachable(func);
    let dead: Vec<BlockId> = func.blocks.iter().map(|b| b.id).filter(|b| !reachable.contains(b)).collect();
    if dead.is_empty() {
        return false;
    }
    func.remove_blocks(&dead);
    true
}

/// Fold `a: ...; br b` into `a` when `b` has `a` as its only predecessor.
fn merge_blocks(func: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let preds = func.predecessors();
        let entry = func.entry();
        let candidate = func.blocks.iter().find_map(|b| match b.terminator().map(|t| &t.op) {
            Some(Op::Br { target })
                if *target != b.id
                    && Some(*target) != entry
                    && preds.get(target).is_some_and(|p| p.len() == 1) =>
            {
                Some((b.id, *target))
            }
            _ => None,
        });
        let Some((pred, succ)) = candidate else {
            return changed;
        };
        let (Some(pi), Some(si)) = (func.block_index(pred), func.block_index(succ)) else {
            return changed;
        };
        let moved = std::mem::take(&mut func.blocks[si].insts);
        let block = &mut func.blocks[pi];
        block.insts.pop();
        block.insts.extend(moved);
        func.blocks.remove(si);
        changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn constant_branch_collapses_into_one_block() {
        let mut m = parse_module(
            "module t
define @f() -> i64 {
bb0:
  condbr true, bb1, bb2
bb1:
  ret 1:i64
bb2:
  ret 2:i64
}
",
            "t.kir",
        )
        .unwrap();
        let id = m.named_function("f").unwrap();
        assert!(run(&mut m, id));
        let f = m.function(id);
        assert_eq!(f.blocks.len(), 1);
        assert!(matches!(&f.blocks[0].insts[0].op, Op::Ret { value: Some(v) } if v.as_const_int() == Some(1)));
    }

    #[test]
    fn code_after_noreturn_call_is_dropped_but_trap_is_kept() {
        let mut m = parse_module(
            "module t
declare @runtime._panic(ptr) -> void noreturn
define @f() -> i64 {
bb0:
  trap
  call @runtime._panic(null)
  %0 : i64 = add 1:i64, 2:i64
  ret %0
}
",
            "t.kir",
        )
        .unwrap();
        let id = m.named_function("f").unwrap();
        assert!(run(&mut m, id));
        let ops: Vec<&str> = m.function(id).insts().map(|i| i.op.mnemonic()).collect();
        assert_eq!(ops, vec!["trap", "call", "unreachable"]);
        assert!(!run(&mut m, id));
    }
}
