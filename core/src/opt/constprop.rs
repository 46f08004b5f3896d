//! Constant propagation across global and function boundaries.

use std::collections::HashSet;

use log::debug;

use crate::ir::{Constant, FuncId, InstId, Linkage, Module, Op, Operand};

pub(crate) fn run(module: &mut Module) -> bool {
    let folded = fold_constant_loads(module);
    let propagated = propagate_arguments(module);
    folded | propagated
}

/// Replace loads of constant globals with the global's initializer.
fn fold_constant_loads(module: &mut Module) -> bool {
    let constants: Vec<Option<Constant>> = module
        .globals
        .iter()
        .map(|g| if g.constant { g.init.clone() } else { None })
        .collect();
    let mut changed = false;
    for func in module.functions.iter_mut() {
        let loads: Vec<(InstId, Constant)> = func
            .insts()
            .filter_map(|i| match &i.op {
                Op::Load { ptr: Operand::Global(g) } => constants
                    .get(g.0 as usize)
                    .cloned()
                    .flatten()
                    .filter(|c| c.ty() == i.ty && !matches!(c, Constant::Bytes(_)))
                    .map(|c| (i.id, c)),
                _ => None,
            })
            .collect();
        for (id, value) in loads {
            func.replace_and_erase(id, &Operand::Const(value));
            changed = true;
        }
    }
    changed
}

/// For internal functions only ever called directly, substitute parameters
/// that receive the same constant at every call site.
fn propagate_arguments(module: &mut Module) -> bool {
    let dispatched: HashSet<String> = module.types.iter().flat_map(|t| t.methods.values().cloned()).collect();
    let mut changed = false;
    for callee in module.func_ids().collect::<Vec<_>>() {
        let target = module.function(callee);
        if target.linkage != Linkage::Internal || target.is_declaration() || dispatched.contains(&target.name) {
            continue;
        }
        let uses = module.uses_of_func(callee);
        if uses.is_empty() {
            continue;
        }
        let mut calls: Vec<Vec<Operand>> = Vec::new();
        let mut direct_only = true;
        for at in uses.iter() {
            match module.inst(at).map(|i| &i.op) {
                Some(Op::Call { callee: Operand::Func(c), args })
                    if *c == callee && !args.iter().any(|a| a.as_func() == Some(callee)) =>
                {
                    calls.push(args.clone())
                }
                _ => direct_only = false,
            }
        }
        if !direct_only {
            continue;
        }

        let nparams = module.function(callee).params.len();
        let mut substitutions: Vec<(u32, Operand)> = Vec::new();
        for index in 0..nparams {
            let first = match calls.first().and_then(|a| a.get(index)) {
                Some(o @ Operand::Const(c)) if !matches!(c, Constant::Undef(_)) => o.clone(),
                _ => continue,
            };
            if calls.iter().all(|args| args.get(index) == Some(&first)) {
                substitutions.push((index as u32, first));
            }
        }

        let func = module.function_mut(callee);
        for (index, value) in substitutions {
            let mut replaced = 0;
            for block in func.blocks.iter_mut() {
                for inst in block.insts.iter_mut() {
                    for operand in inst.op.operands_mut() {
                        if *operand == Operand::Arg(index) {
                            *operand = value.clone();
                            replaced += 1;
                        }
                    }
                }
            }
            if replaced > 0 {
                debug!("@{}: argument {} is always {}", func.name, index, value_text(&value));
                changed = true;
            }
        }
    }
    changed
}

fn value_text(value: &Operand) -> String {
    match value {
        Operand::Const(c) => c.to_string(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn loads_of_constant_globals_fold() {
        let mut m = parse_module(
            "module t
global @limit : i64 = 10:i64 internal constant
define @f() -> i64 {
bb0:
  %0 : i64 = load @limit
  ret %0
}
",
            "t.kir",
        )
        .unwrap();
        assert!(run(&mut m));
        let f = m.function(m.named_function("f").unwrap());
        assert!(matches!(&f.blocks[0].insts[0].op, Op::Ret { value: Some(v) } if v.as_const_int() == Some(10)));
    }

    #[test]
    fn same_constant_argument_is_propagated_into_internal_callee() {
        let mut m = parse_module(
            "module t
define internal @scale(i64, i64) -> i64 {
bb0:
  %0 : i64 = mul $0, $1
  ret %0
}
define @a(i64) -> i64 {
bb0:
  %0 : i64 = call @scale($0, 3:i64)
  ret %0
}
define @b() -> i64 {
bb0:
  %0 : i64 = call @scale(7:i64, 3:i64)
  ret %0
}
",
            "t.kir",
        )
        .unwrap();
        assert!(run(&mut m));
        let scale = m.function(m.named_function("scale").unwrap());
        assert!(matches!(
            &scale.blocks[0].insts[0].op,
            Op::Bin { lhs: Operand::Arg(0), rhs, .. } if rhs.as_const_int() == Some(3)
        ));
        assert!(!run(&mut m));
    }
}
