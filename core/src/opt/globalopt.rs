use std::collections::HashSet;

use log::debug;

use crate::ir::{FuncId, GlobalId, Linkage, Module, Op, Operand};

/// Drop unused internal globals and mark internal globals that are only
/// ever loaded from as constant.
pub(crate) fn run(module: &mut Module) -> bool {
    let mut changed = false;

    let unused: HashSet<GlobalId> = (0..module.globals.len() as u32)
        .map(GlobalId)
        .filter(|g| module.global(*g).linkage == Linkage::Internal && module.uses_of_global(*g).is_empty())
        .collect();
    if !unused.is_empty() {
        debug!("dropping {} unused internal global(s)", unused.len());
        module.retain_globals(|id, _| !unused.contains(&id));
        changed = true;
    }

    for index in 0..module.globals.len() {
        let id = GlobalId(index as u32);
        let global = module.global(id);
        if global.constant || global.linkage != Linkage::Internal || global.init.is_none() {
            continue;
        }
        let only_loaded = module.uses_of_global(id).iter().all(|at| {
            matches!(module.inst(at).map(|i| &i.op), Some(Op::Load { ptr: Operand::Global(g) }) if *g == id)
        });
        if only_loaded {
            module.globals[index].constant = true;
            changed = true;
        }
    }
    changed
}

/// Remove internal functions nothing refers to. Functions named by a type
/// descriptor count as referenced.
pub(crate) fn remove_dead_functions(module: &mut Module) -> bool {
    let mut removed_any = false;
    loop {
        let by_type: HashSet<&str> = module
            .types
            .iter()
            .flat_map(|t| t.methods.values().map(String::as_str))
            .collect();
        let dead: HashSet<FuncId> = module
            .func_ids()
            .filter(|id| {
                let f = module.function(*id);
                f.linkage == Linkage::Internal
                    && !by_type.contains(f.name.as_str())
                    && module.uses_of_func(*id).iter().all(|at| at.func == *id)
            })
            .collect();
        if dead.is_empty() {
            return removed_any;
        }
        debug!("removing {} dead internal function(s)", dead.len());
        module.retain_functions(|id, _| !dead.contains(&id));
        removed_any = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn unused_globals_go_and_read_only_globals_become_constant() {
        let mut m = parse_module(
            "module t
global @unused : i64 = 1:i64 internal
global @limit : i64 = 10:i64 internal
global @state : i64 = 0:i64 internal
global @exported : i64 = 0:i64
define @f() -> i64 {
bb0:
  %0 : i64 = load @limit
  store @state, %0
  ret %0
}
",
            "t.kir",
        )
        .unwrap();
        assert!(run(&mut m));
        let names: Vec<&str> = m.globals.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["limit", "state", "exported"]);
        assert!(m.global(m.named_global("limit").unwrap()).constant);
        assert!(!m.global(m.named_global("state").unwrap()).constant);
        assert!(!m.global(m.named_global("exported").unwrap()).constant);
        // ids in the body still point at the right globals after renumbering
        assert!(crate::ir::verify_module(&m).is_ok());
        assert!(!run(&mut m));
    }

    #[test]
    fn dead_internal_functions_are_removed_transitively() {
        let mut m = parse_module(
            "module t
define internal @leaf() -> void {
bb0:
  ret
}
define internal @middle() -> void {
bb0:
  call @leaf()
  call @middle()
  ret
}
define @main() -> void {
bb0:
  ret
}
",
            "t.kir",
        )
        .unwrap();
        assert!(remove_dead_functions(&mut m));
        assert_eq!(m.functions.len(), 1);
        assert_eq!(m.functions[0].name, "main");
    }
}
