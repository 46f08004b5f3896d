//! Function attribute inference (`readnone`, `readonly`, `noyield`).
//!
//! Inference only ever adds attributes. Attributes present on input are
//! trusted. Indirect calls and dynamic dispatch defeat every attribute.

use std::collections::HashSet;

use log::debug;

use crate::ir::{Attribute, FuncId, Function, Module, Op};

pub(crate) fn run(module: &mut Module) -> bool {
    let mut added = 0;
    loop {
        let mut updates: Vec<(FuncId, Attribute)> = Vec::new();
        let yielding = may_yield(module);
        for id in module.func_ids() {
            let func = module.function(id);
            if func.is_declaration() {
                continue;
            }
            for attr in [Attribute::ReadNone, Attribute::ReadOnly] {
                if !func.has_attr(attr) && memory_effects_allow(module, func, attr) {
                    updates.push((id, attr));
                }
            }
            if !func.has_attr(Attribute::NoYield) && !yielding.contains(&id) {
                updates.push((id, Attribute::NoYield));
            }
        }
        if updates.is_empty() {
            break;
        }
        added += updates.len();
        for (id, attr) in updates {
            module.function_mut(id).attrs.insert(attr);
        }
    }
    if added > 0 {
        debug!("inferred {} function attribute(s)", added);
    }
    added > 0
}

fn memory_effects_allow(module: &Module, func: &Function, attr: Attribute) -> bool {
    let callee_ok = |callee: FuncId| {
        let c = module.function(callee);
        c.has_attr(Attribute::ReadNone) || (attr == Attribute::ReadOnly && c.has_attr(Attribute::ReadOnly))
    };
    func.insts().all(|inst| match &inst.op {
        Op::Load { .. } | Op::MapLookup { .. } => attr == Attribute::ReadOnly,
        Op::Call { .. } => inst.op.direct_callee().is_some_and(|c| callee_ok(c)),
        Op::Store { .. }
        | Op::Alloc { .. }
        | Op::Trap
        | Op::MapMake
        | Op::MapUpdate { .. }
        | Op::StringToBytes { .. }
        | Op::MakeInterface { .. }
        | Op::InvokeMethod { .. }
        | Op::TypeAssert { .. }
        | Op::MakeFuncValue { .. }
        | Op::CallFuncValue { .. }
        | Op::Spawn { .. }
        | Op::Yield => false,
        _ => true,
    })
}

/// Defined functions that may suspend the running task: those containing a
/// yield, making an indirect or dynamically dispatched call, or calling one
/// that may yield. Declarations without `noyield` are assumed not to yield.
pub fn may_yield(module: &Module) -> HashSet<FuncId> {
    let mut yielding: HashSet<FuncId> = module
        .func_ids()
        .filter(|id| {
            let f = module.function(*id);
            !f.has_attr(Attribute::NoYield)
                && f.insts().any(|i| {
                    matches!(i.op, Op::Yield | Op::InvokeMethod { .. } | Op::CallFuncValue { .. })
                        || matches!(&i.op, Op::Call { callee, .. } if callee.as_func().is_none())
                })
        })
        .collect();
    loop {
        let before = yielding.len();
        for id in module.func_ids() {
            if yielding.contains(&id) || module.function(id).has_attr(Attribute::NoYield) {
                continue;
            }
            let calls_yielding = module
                .function(id)
                .insts()
                .any(|i| i.op.direct_callee().is_some_and(|c| yielding.contains(&c)));
            if calls_yielding {
                yielding.insert(id);
            }
        }
        if yielding.len() == before {
            return yielding;
        }
    }
}

/// Functions that contain a yield themselves or reach one through direct calls.
/// Unlike [`may_yield`], indirect calls are not counted.
pub fn yielding_functions(module: &Module) -> HashSet<FuncId> {
    let mut yielding: HashSet<FuncId> = module
        .func_ids()
        .filter(|id| module.function(*id).insts().any(|i| matches!(i.op, Op::Yield)))
        .collect();
    loop {
        let before = yielding.len();
        for id in module.func_ids() {
            if !yielding.contains(&id)
                && module
                    .function(id)
                    .insts()
                    .any(|i| i.op.direct_callee().is_some_and(|c| yielding.contains(&c)))
            {
                yielding.insert(id);
            }
        }
        if yielding.len() == before {
            return yielding;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn attributes_propagate_through_direct_calls() {
        let mut m = parse_module(
            "module t
global @g : i64 = 0:i64
define @pure(i64) -> i64 {
bb0:
  %0 : i64 = add $0, 1:i64
  ret %0
}
define @reader() -> i64 {
bb0:
  %0 : i64 = load @g
  %1 : i64 = call @pure(%0)
  ret %1
}
define @writer() -> void {
bb0:
  store @g, 1:i64
  ret
}
define @sleeper() -> void {
bb0:
  yield
  ret
}
define @caller() -> void {
bb0:
  call @sleeper()
  ret
}
",
            "t.kir",
        )
        .unwrap();
        assert!(run(&mut m));
        let f = |name: &str| m.function(m.named_function(name).unwrap()).attrs.clone();
        assert!(f("pure").contains(&Attribute::ReadNone));
        assert!(f("reader").contains(&Attribute::ReadOnly));
        assert!(!f("reader").contains(&Attribute::ReadNone));
        assert!(!f("writer").contains(&Attribute::ReadOnly));
        assert!(f("writer").contains(&Attribute::NoYield));
        assert!(!f("caller").contains(&Attribute::NoYield));
        assert!(!run(&mut m));
    }
}
