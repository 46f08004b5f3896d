use log::{debug, warn};

use crate::ir::runtime::IS_NIL;
use crate::ir::{FuncId, IcmpPred, InstId, Module, Op, Operand, Type};

/// Replace every call to the null-test helper with `icmp eq ptr, null`.
///
/// A pointer produced by a bitcast is unwrapped exactly one layer. Uses of
/// each call are redirected to the comparison before the call is erased.
pub fn lower_nil_checks(module: &mut Module) -> usize {
    let Some(helper) = module.named_function(IS_NIL) else {
        return 0;
    };
    let mut lowered = 0;
    for func in module.functions.iter_mut() {
        let calls: Vec<(InstId, Operand)> = func
            .insts()
            .filter_map(|i| match &i.op {
                Op::Call { callee: Operand::Func(c), args } if *c == helper && args.len() == 1 => {
                    Some((i.id, args[0].clone()))
                }
                _ => None,
            })
            .collect();
        for (call, arg) in calls {
            let ptr = match &arg {
                Operand::Inst(def) => match func.inst(*def).map(|i| &i.op) {
                    Some(Op::Bitcast { value }) => value.clone(),
                    _ => arg.clone(),
                },
                _ => arg.clone(),
            };
            let ptr = if func.type_of(&ptr) == Some(Type::Ptr) { ptr } else { arg };
            let Some(cmp) = func.insert_before(
                call,
                Type::I1,
                Op::ICmp { pred: IcmpPred::Eq, lhs: ptr, rhs: Operand::null() },
            ) else {
                continue;
            };
            func.replace_all_uses(call, &Operand::Inst(cmp));
            func.erase_inst(call);
            lowered += 1;
        }
    }
    debug!("lowered {} null test(s)", lowered);
    let left = leftover_uses(module, helper);
    if left > 0 {
        warn!("{} use(s) of {} are not single-argument calls and were left in place", left, IS_NIL);
    }
    lowered
}

fn leftover_uses(module: &Module, helper: FuncId) -> usize {
    module.uses_of_func(helper).len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn casts_are_unwrapped_once() {
        let mut m = parse_module(
            "module t
declare @runtime.isnil(ptr) -> i1 readnone
define @f(ptr) -> i1 {
bb0:
  %0 : ptr = bitcast $0
  %1 : ptr = bitcast %0
  %2 : i1 = call @runtime.isnil(%1)
  %3 : i1 = call @runtime.isnil($0)
  %4 : i1 = and %2, %3
  ret %4
}
",
            "t.kir",
        )
        .unwrap();
        assert_eq!(lower_nil_checks(&mut m), 2);
        let isnil = m.named_function(IS_NIL).unwrap();
        assert!(m.uses_of_func(isnil).is_empty());
        let f = m.function(m.named_function("f").unwrap());
        let cmps: Vec<&Op> = f.insts().map(|i| &i.op).filter(|op| matches!(op, Op::ICmp { .. })).collect();
        assert_eq!(
            cmps,
            vec![
                &Op::ICmp { pred: IcmpPred::Eq, lhs: Operand::Inst(InstId(0)), rhs: Operand::null() },
                &Op::ICmp { pred: IcmpPred::Eq, lhs: Operand::Arg(0), rhs: Operand::null() },
            ]
        );
        assert!(crate::ir::verify_module(&m).is_ok());
    }

    #[test]
    fn non_call_uses_are_left_and_counted() {
        let mut m = parse_module(
            "module t
declare @runtime.isnil(ptr) -> i1 readnone
define @f(ptr) -> i1 {
bb0:
  %0 : ptr = bitcast @runtime.isnil
  %1 : i1 = call @runtime.isnil($0)
  ret %1
}
",
            "t.kir",
        )
        .unwrap();
        assert_eq!(lower_nil_checks(&mut m), 1);
        let isnil = m.named_function(IS_NIL).unwrap();
        assert_eq!(leftover_uses(&m, isnil), 1);
    }

    #[test]
    fn absent_helper_is_a_no_op() {
        let mut m = parse_module("module t\ndefine @f() -> void {\nbb0:\n  ret\n}\n", "t.kir").unwrap();
        assert_eq!(lower_nil_checks(&mut m), 0);
    }
}
