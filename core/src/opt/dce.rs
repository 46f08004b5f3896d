use std::collections::{HashMap, HashSet};

use log::debug;

use crate::ir::{Attribute, FuncId, Function, Inst, InstId, Module, Op};

/// Calls to these functions may be deleted when their result is unused.
fn removable_callees(module: &Module) -> HashSet<FuncId> {
    module
        .func_ids()
        .filter(|id| {
            let f = module.function(*id);
            f.has_attr(Attribute::ReadNone) && !f.has_attr(Attribute::NoReturn)
        })
        .collect()
}

fn is_removable(inst: &Inst, pure_calls: &HashSet<FuncId>) -> bool {
    match &inst.op {
        Op::Call { .. } => inst.op.direct_callee().is_some_and(|c| pure_calls.contains(&c)),
        op => !op.has_side_effects(),
    }
}

/// Remove trivially dead instructions until none are left.
pub(crate) fn run(module: &mut Module, id: FuncId) -> bool {
    let pure_calls = removable_callees(module);
    let func = module.function_mut(id);
    let mut changed = false;
    loop {
        let mut use_counts: HashMap<InstId, usize> = HashMap::new();
        for inst in func.insts() {
            for operand in inst.op.operands() {
                if let Some(used) = operand.as_inst() {
                    *use_counts.entry(used).or_default() += 1;
                }
            }
        }
        let dead: Vec<InstId> = func
            .insts()
            .filter(|i| !use_counts.contains_key(&i.id) && is_removable(i, &pure_calls))
            .map(|i| i.id)
            .collect();
        if dead.is_empty() {
            return changed;
        }
        for inst in dead {
            func.erase_inst(inst);
        }
        changed = true;
    }
}

/// Mark-and-sweep DCE over every function: everything not needed by a
/// side effect is deleted in one sweep.
pub(crate) fn run_aggressive(module: &mut Module) -> bool {
    let pure_calls = removable_callees(module);
    let mut removed = 0;
    for func in module.functions.iter_mut() {
        removed += sweep(func, &pure_calls);
    }
    if removed > 0 {
        debug!("aggressive DCE removed {} instruction(s)", removed);
    }
    removed > 0
}

fn sweep(func: &mut Function, pure_calls: &HashSet<FuncId>) -> usize {
    let by_id: HashMap<InstId, &Inst> = func.insts().map(|i| (i.id, i)).collect();
    let mut live: HashSet<InstId> = HashSet::new();
    let mut work: Vec<InstId> = func
        .insts()
        .filter(|i| !is_removable(i, pure_calls))
        .map(|i| i.id)
        .collect();
    while let Some(id) = work.pop() {
        if !live.insert(id) {
            continue;
        }
        if let Some(inst) = by_id.get(&id) {
            work.extend(inst.op.operands().iter().filter_map(|o| o.as_inst()));
        }
    }
    let before = func.inst_count();
    for block in func.blocks.iter_mut() {
        block.insts.retain(|i| live.contains(&i.id));
    }
    before - func.inst_count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    const DEAD_CHAIN: &str = "module t
declare @pure(i64) -> i64 readnone
declare @effect(i64) -> i64
define @f(i64) -> void {
bb0:
  %0 : i64 = add $0, 1:i64
  %1 : i64 = mul %0, 2:i64
  %2 : i64 = call @pure(%1)
  %3 : i64 = call @effect(%0)
  ret
}
";

    #[test]
    fn trivially_dead_chain_is_removed_but_effects_stay() {
        let mut m = parse_module(DEAD_CHAIN, "t.kir").unwrap();
        let id = m.named_function("f").unwrap();
        assert!(run(&mut m, id));
        let ops: Vec<&str> = m.function(id).insts().map(|i| i.op.mnemonic()).collect();
        assert_eq!(ops, vec!["add", "call", "ret"]);
    }

    #[test]
    fn aggressive_sweep_agrees_with_iterative_removal() {
        let mut m = parse_module(DEAD_CHAIN, "t.kir").unwrap();
        assert!(run_aggressive(&mut m));
        let id = m.named_function("f").unwrap();
        assert_eq!(m.function(id).inst_count(), 3);
        assert!(!run_aggressive(&mut m));
    }
}
