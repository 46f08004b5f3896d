use log::debug;

use super::escape::only_read;
use crate::ir::{InstId, Module, Op, Operand};

/// Drop string-to-bytes conversions whose result is only read; the string
/// data can be read in place.
pub fn optimize_string_to_bytes(module: &mut Module) -> usize {
    let mut replaced = 0;
    for func in module.functions.iter_mut() {
        let conversions: Vec<(InstId, Operand)> = func
            .insts()
            .filter_map(|i| match &i.op {
                Op::StringToBytes { value } => Some((i.id, value.clone())),
                _ => None,
            })
            .collect();
        for (id, string) in conversions {
            if only_read(func, id) {
                func.replace_and_erase(id, &string);
                replaced += 1;
            }
        }
    }
    if replaced > 0 {
        debug!("removed {} string-to-bytes conversion(s)", replaced);
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn read_only_conversions_use_the_string_directly() {
        let mut m = parse_module(
            "module t
declare @consume(ptr) -> void
define @f(ptr) -> i8 {
bb0:
  %0 : ptr = string.tobytes $0
  %1 : ptr = gep %0, 2
  %2 : i8 = load %1
  %3 : ptr = string.tobytes $0
  call @consume(%3)
  ret %2
}
",
            "t.kir",
        )
        .unwrap();
        assert_eq!(optimize_string_to_bytes(&mut m), 1);
        let f = m.function(m.named_function("f").unwrap());
        assert!(matches!(&f.blocks[0].insts[0].op, Op::Gep { ptr: Operand::Arg(0), offset: 2 }));
        assert_eq!(f.insts().filter(|i| matches!(i.op, Op::StringToBytes { .. })).count(), 1);
    }
}
