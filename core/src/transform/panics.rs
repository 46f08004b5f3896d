use log::debug;

use super::err::PreconditionViolation;
use crate::ir::runtime::FAILURE_FUNCTIONS;
use crate::ir::{Module, Op, Operand, Type};
use crate::location::IrLocation;

/// Put a `trap` immediately before every call to a failure function.
/// The call itself stays in place.
///
/// Every use of a failure function must be a direct call to it; anything
/// else is reported as a `PreconditionViolation` before the module is touched.
pub fn replace_panics_with_trap(module: &mut Module) -> Result<usize, PreconditionViolation> {
    let mut sites = Vec::new();
    for name in FAILURE_FUNCTIONS {
        let Some(id) = module.named_function(name) else { continue };
        for at in module.uses_of_func(id) {
            let direct = matches!(
                module.inst(&at).map(|i| &i.op),
                Some(Op::Call { callee: Operand::Func(c), args }) if *c == id && !args.iter().any(|a| a.as_func() == Some(id))
            );
            if !direct {
                let func = module.function(at.func).name.clone();
                return Err(PreconditionViolation::new(
                    format!("@{} is used other than as a direct call", name),
                    "kiln.transform.panics".to_string(),
                    Some(IrLocation::at(func, at.block, Some(at.inst))),
                ));
            }
            sites.push(at);
        }
    }
    for at in sites.iter() {
        module.function_mut(at.func).insert_before(at.inst, Type::Void, Op::Trap);
    }
    debug!("inserted {} trap(s) before failure calls", sites.len());
    Ok(sites.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KilnErrorExt;
    use crate::ir::parse_module;

    #[test]
    fn trap_is_inserted_before_each_failure_call() {
        let mut m = parse_module(
            "module t
declare @runtime._panic(ptr) -> void noreturn
declare @runtime.runtimePanic(ptr) -> void noreturn
define @f(i1) -> void {
bb0:
  condbr $0, bb1, bb2
bb1:
  call @runtime._panic(null)
  unreachable
bb2:
  call @runtime.runtimePanic(null)
  unreachable
}
",
            "t.kir",
        )
        .unwrap();
        assert_eq!(replace_panics_with_trap(&mut m).unwrap(), 2);
        let f = m.function(m.named_function("f").unwrap());
        for block in &f.blocks[1..] {
            let ops: Vec<&str> = block.insts.iter().map(|i| i.op.mnemonic()).collect();
            assert_eq!(ops, vec!["trap", "call", "unreachable"]);
        }
    }

    #[test]
    fn non_call_use_is_a_precondition_violation() {
        let mut m = parse_module(
            "module t
declare @runtime._panic(ptr) -> void noreturn
global @hook : ptr
define @f() -> void {
bb0:
  store @hook, @runtime._panic
  ret
}
",
            "t.kir",
        )
        .unwrap();
        let before = m.to_string();
        let err = replace_panics_with_trap(&mut m).unwrap_err();
        assert!(err.message().contains("runtime._panic"));
        assert_eq!(err.ir_location().map(|l| l.function), Some("f".to_string()));
        assert_eq!(m.to_string(), before);
    }
}
