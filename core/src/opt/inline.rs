use std::collections::HashMap;

use log::debug;

use crate::ir::{Block, FuncId, InstId, Module, Op, Operand};

/// Estimated cost of inlining a body of `insts` instructions.
pub fn inline_cost(insts: usize) -> u32 {
    (insts as u32).saturating_mul(5)
}

/// Inline small single-block callees at direct call sites.
pub(crate) fn run(module: &mut Module, threshold: u32) -> bool {
    let mut candidates: HashMap<FuncId, Block> = module
        .func_ids()
        .filter_map(|id| inlinable_body(module, id, threshold).map(|b| (id, b)))
        .collect();
    // Only leaves are inlined, so inlining cannot cycle.
    let non_leaves: Vec<FuncId> = candidates
        .iter()
        .filter(|(_, body)| body.insts.iter().any(|i| i.op.func_refs().iter().any(|f| candidates.contains_key(f))))
        .map(|(id, _)| *id)
        .collect();
    for id in non_leaves {
        candidates.remove(&id);
    }
    if candidates.is_empty() {
        return false;
    }

    let mut inlined = 0;
    for caller in module.func_ids().collect::<Vec<_>>() {
        loop {
            let func = module.function(caller);
            let site = func.insts().find_map(|i| match &i.op {
                Op::Call { callee: Operand::Func(c), args } if *c != caller && candidates.contains_key(c) => {
                    Some((i.id, *c, args.clone()))
                }
                _ => None,
            });
            let Some((call, callee, args)) = site else { break };
            let body = &candidates[&callee];
            inline_at(module, caller, call, body, &args);
            inlined += 1;
        }
    }
    if inlined > 0 {
        debug!("inlined {} call site(s) at threshold {}", inlined, threshold);
    }
    inlined > 0
}

fn inlinable_body(module: &Module, id: FuncId, threshold: u32) -> Option<Block> {
    let func = module.function(id);
    if func.is_declaration() || func.blocks.len() != 1 {
        return None;
    }
    let block = &func.blocks[0];
    if !matches!(block.terminator().map(|t| &t.op), Some(Op::Ret { .. })) {
        return None;
    }
    let blocked = block.insts.iter().any(|i| {
        matches!(i.op, Op::StackAlloc { .. } | Op::Yield) || i.op.func_refs().contains(&id)
    });
    if blocked || inline_cost(block.insts.len()) > threshold {
        return None;
    }
    Some(block.clone())
}

fn inline_at(module: &mut Module, caller: FuncId, call: InstId, body: &Block, args: &[Operand]) {
    let func = module.function_mut(caller);
    let mut renamed: HashMap<InstId, InstId> = HashMap::new();
    let map = |o: &Operand, renamed: &HashMap<InstId, InstId>| match o {
        Operand::Inst(i) => Operand::Inst(renamed.get(i).copied().unwrap_or(*i)),
        Operand::Arg(a) => args.get(*a as usize).cloned().unwrap_or_else(|| o.clone()),
        other => other.clone(),
    };

    let mut result: Option<Operand> = None;
    for inst in body.insts.iter() {
        if let Op::Ret { value } = &inst.op {
            result = value.as_ref().map(|v| map(v, &renamed));
            break;
        }
        let mut op = inst.op.clone();
        for operand in op.operands_mut() {
            *operand = map(operand, &renamed);
        }
        if let Some(new_id) = func.insert_before(call, inst.ty, op) {
            renamed.insert(inst.id, new_id);
        }
    }
    match result {
        Some(value) => {
            func.replace_and_erase(call, &value);
        }
        None => {
            func.erase_inst(call);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    const SRC: &str = "module t
define internal @inc(i64) -> i64 {
bb0:
  %0 : i64 = add $0, 1:i64
  ret %0
}
define @main(i64) -> i64 {
bb0:
  %0 : i64 = call @inc($0)
  %1 : i64 = call @inc(%0)
  ret %1
}
";

    #[test]
    fn small_callee_is_inlined_at_every_site() {
        let mut m = parse_module(SRC, "t.kir").unwrap();
        assert!(run(&mut m, 225));
        let main = m.function(m.named_function("main").unwrap());
        let ops: Vec<&str> = main.insts().map(|i| i.op.mnemonic()).collect();
        assert_eq!(ops, vec!["add", "add", "ret"]);
        assert!(crate::ir::verify_module(&m).is_ok());
    }

    #[test]
    fn threshold_below_cost_keeps_calls() {
        let mut m = parse_module(SRC, "t.kir").unwrap();
        // two instructions cost 10
        assert!(!run(&mut m, 9));
        assert!(run(&mut m, 10));
    }
}
