use log::debug;

use crate::ir::runtime::TRANSFORM_HELPERS;
use crate::ir::{Linkage, Module};

/// Give the runtime helpers the transforms call into internal linkage now
/// that no further transform needs them by name. Declarations keep their
/// linkage since an internal declaration could never be resolved.
pub fn finalize_linkage(module: &mut Module) -> usize {
    let mut changed = 0;
    for name in TRANSFORM_HELPERS {
        let Some(id) = module.named_function(name) else { continue };
        let func = module.function_mut(id);
        if func.is_declaration() || func.linkage == Linkage::Internal {
            continue;
        }
        func.linkage = Linkage::Internal;
        changed += 1;
    }
    debug!("internalized {} runtime helper(s)", changed);
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn only_defined_helpers_become_internal() {
        let mut m = parse_module(
            "module t
declare @runtime.free(ptr) -> void
define @runtime.alloc(i64) -> ptr {
bb0:
  %0 : ptr = alloc $0
  ret %0
}
define @runtime.other() -> void {
bb0:
  ret
}
define @runtime.gcPushFrame(ptr) -> void {
bb0:
  ret
}
",
            "t.kir",
        )
        .unwrap();
        assert_eq!(finalize_linkage(&mut m), 1);
        let linkage = |n: &str| m.function(m.named_function(n).unwrap()).linkage;
        assert_eq!(linkage("runtime.alloc"), Linkage::Internal);
        assert_eq!(linkage("runtime.free"), Linkage::External);
        assert_eq!(linkage("runtime.other"), Linkage::External);
        assert_eq!(linkage("runtime.gcPushFrame"), Linkage::External);
        assert_eq!(finalize_linkage(&mut m), 0);
    }
}
