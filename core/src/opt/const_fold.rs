use std::collections::HashSet;

use crate::ir::{Constant, FuncId, IcmpPred, InstId, Module, Op, Operand, Type};

/// Fold instructions whose result is known at compile time.
pub(crate) fn run(module: &mut Module, id: FuncId) -> bool {
    let func = module.function_mut(id);
    let mut changed = false;
    loop {
        // Results that are fresh allocations, and therefore never null.
        let allocations: HashSet<InstId> = func
            .insts()
            .filter(|i| matches!(i.op, Op::Alloc { .. } | Op::StackAlloc { .. }))
            .map(|i| i.id)
            .collect();

        let folds: Vec<(InstId, Constant)> = func
            .insts()
            .filter_map(|i| fold(&i.op, i.ty, &allocations).map(|c| (i.id, c)))
            .collect();
        if folds.is_empty() {
            return changed;
        }
        for (inst, value) in folds {
            func.replace_and_erase(inst, &Operand::Const(value));
        }
        changed = true;
    }
}

fn fold(op: &Op, ty: Type, allocations: &HashSet<InstId>) -> Option<Constant> {
    match op {
        Op::Bin { kind, lhs, rhs } => {
            let (a, b) = (lhs.as_const_int()?, rhs.as_const_int()?);
            Some(Constant::int(ty, kind.eval(a, b)))
        }
        Op::ICmp { pred, lhs, rhs } => {
            if let (Some(a), Some(b)) = (lhs.as_const_int(), rhs.as_const_int()) {
                return Some(Constant::bool(pred.eval(a, b)));
            }
            let is_null = |o: &Operand| matches!(o, Operand::Const(Constant::Null));
            let never_null = |o: &Operand| match o {
                Operand::Inst(i) => allocations.contains(i),
                Operand::Func(_) | Operand::Global(_) => true,
                _ => false,
            };
            let known_unequal = (is_null(lhs) && never_null(rhs)) || (never_null(lhs) && is_null(rhs));
            let known_equal = is_null(lhs) && is_null(rhs);
            match pred {
                IcmpPred::Eq if known_equal => Some(Constant::bool(true)),
                IcmpPred::Eq if known_unequal => Some(Constant::bool(false)),
                IcmpPred::Ne if known_equal => Some(Constant::bool(false)),
                IcmpPred::Ne if known_unequal => Some(Constant::bool(true)),
                _ => None,
            }
        }
        Op::Bitcast { value: Operand::Const(Constant::Null) } if ty == Type::Ptr => Some(Constant::Null),
        Op::Bitcast { value: Operand::Const(c) } if c.ty() == ty => Some(c.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn folds_arithmetic_and_null_checks_on_allocations() {
        let mut m = parse_module(
            "module t
define @f() -> i1 {
bb0:
  %0 : i64 = add 2:i64, 3:i64
  %1 : i64 = mul %0, 4:i64
  %2 : ptr = alloc %1
  %3 : i1 = icmp eq %2, null
  ret %3
}
",
            "t.kir",
        )
        .unwrap();
        let id = m.named_function("f").unwrap();
        assert!(run(&mut m, id));
        let f = m.function(id);
        assert_eq!(f.inst_count(), 2);
        assert!(matches!(&f.blocks[0].insts[0].op, Op::Alloc { size } if size.as_const_int() == Some(20)));
        assert!(matches!(&f.blocks[0].insts[1].op, Op::Ret { value: Some(v) } if v.as_const_int() == Some(0)));
    }

    #[test]
    fn results_wrap_to_their_type() {
        let mut m = parse_module(
            "module t\ndefine @f() -> i8 {\nbb0:\n  %0 : i8 = add 127:i8, 1:i8\n  ret %0\n}\n",
            "t.kir",
        )
        .unwrap();
        let id = m.named_function("f").unwrap();
        run(&mut m, id);
        let f = m.function(id);
        assert!(matches!(&f.blocks[0].insts[0].op, Op::Ret { value: Some(v) } if v.as_const_int() == Some(-128)));
    }
}
