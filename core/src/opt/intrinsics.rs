use std::collections::HashMap;

use log::debug;

use crate::ir::{FuncId, InstId, Module, Op, Operand, Type};

/// Replace `framesize @f` with the frame size recorded on `@f`.
/// Functions whose tasks have not been lowered yet keep the intrinsic.
pub(crate) fn lower_frame_size(module: &mut Module) -> bool {
    let sizes: HashMap<FuncId, u64> = module
        .func_ids()
        .filter_map(|id| module.function(id).frame_size.map(|s| (id, s)))
        .collect();

    let mut changed = false;
    for func in module.functions.iter_mut() {
        let sites: Vec<(InstId, u64)> = func
            .insts()
            .filter_map(|i| match i.op {
                Op::FrameSize { func: target } => sizes.get(&target).map(|s| (i.id, *s)),
                _ => None,
            })
            .collect();
        for (id, size) in sites {
            func.replace_and_erase(id, &Operand::int(Type::I64, size as i64));
            changed = true;
        }
    }
    if changed {
        debug!("resolved frame-size intrinsics");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn resolves_only_known_frame_sizes() {
        let mut m = parse_module(
            "module t
define @task(ptr) -> i1 framesize(32) {
bb0:
  ret true
}
define @other(ptr) -> i1 {
bb0:
  ret true
}
define @main() -> i64 {
bb0:
  %0 : i64 = framesize @task
  %1 : i64 = framesize @other
  %2 : i64 = add %0, %1
  ret %2
}
",
            "t.kir",
        )
        .unwrap();
        assert!(lower_frame_size(&mut m));
        let main = m.function(m.named_function("main").unwrap());
        assert_eq!(main.inst_count(), 3);
        assert!(matches!(
            &main.blocks[0].insts[1].op,
            Op::Bin { lhs, .. } if lhs.as_const_int() == Some(32)
        ));
        assert!(!lower_frame_size(&mut m));
    }
}
