use log::debug;

use crate::ir::{InstId, Module, Op, Operand};

/// Remove maps that are created and updated but never read or passed on.
pub fn optimize_maps(module: &mut Module) -> usize {
    let mut removed = 0;
    for func in module.functions.iter_mut() {
        let makes: Vec<InstId> = func.insts().filter(|i| matches!(i.op, Op::MapMake)).map(|i| i.id).collect();
        for map in makes {
            let users = func.uses_of_inst(map);
            let write_only = users.iter().all(|u| {
                matches!(
                    func.inst(*u).map(|i| &i.op),
                    Some(Op::MapUpdate { map: Operand::Inst(m), key, value })
                        if *m == map && key.as_inst() != Some(map) && value.as_inst() != Some(map)
                )
            });
            if !write_only {
                continue;
            }
            for update in users {
                func.erase_inst(update);
            }
            func.erase_inst(map);
            removed += 1;
        }
    }
    if removed > 0 {
        debug!("removed {} write-only map(s)", removed);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn only_write_only_maps_are_removed() {
        let mut m = parse_module(
            "module t
define @f() -> i64 {
bb0:
  %0 : ptr = map.make
  map.update %0, 1:i64, 2:i64
  map.update %0, 3:i64, 4:i64
  %1 : ptr = map.make
  map.update %1, 1:i64, 2:i64
  %2 : i64 = map.lookup %1, 1:i64
  ret %2
}
",
            "t.kir",
        )
        .unwrap();
        assert_eq!(optimize_maps(&mut m), 1);
        let f = m.function(m.named_function("f").unwrap());
        assert_eq!(f.inst_count(), 4);
        assert_eq!(optimize_maps(&mut m), 0);
    }
}
