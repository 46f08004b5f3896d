//! file: core/src/transform/gc.rs
//! description: makes GC roots findable by the collector.
//!
//! Globals are described by a bitmap with one bit per 8-byte word; a set bit
//! marks a word holding a pointer. Heap pointers held in locals are stored
//! in a per-call stack frame linked into the collector's frame list:
//!
//! ```text
//! +0   link to the previous frame (maintained by the runtime)
//! +8   number of slots
//! +16  slot 0, slot 1, ...
//! ```

use log::debug;

use crate::ir::runtime::{
    GC_POP_FRAME, GC_PUSH_FRAME, TRACKED_GLOBALS_BITMAP, TRACKED_GLOBALS_LENGTH, is_runtime_gc_function,
};
use crate::ir::{Constant, FuncId, Function, Global, InstId, Module, Op, Operand, StackMap, Type};

pub const WORD: u64 = 8;
pub const FRAME_HEADER: u64 = 16;

/// Bitmap over the words of every global, least significant bit first.
pub fn globals_bitmap(module: &Module) -> (Vec<u8>, u64) {
    let mut bits: Vec<bool> = Vec::new();
    for g in module.globals.iter() {
        if g.name == TRACKED_GLOBALS_BITMAP || g.name == TRACKED_GLOBALS_LENGTH {
            continue;
        }
        let words = g.ty.size().div_ceil(WORD);
        bits.push(g.ty.has_pointers());
        bits.extend((1..words).map(|_| false));
    }
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, set) in bits.iter().enumerate() {
        if *set {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    (bytes, bits.len() as u64)
}

fn set_global(module: &mut Module, name: &str, ty: Type, init: Constant) -> bool {
    match module.named_global(name) {
        Some(id) => {
            let g = &mut module.globals[id.0 as usize];
            if g.ty == ty && g.init.as_ref() == Some(&init) {
                return false;
            }
            g.ty = ty;
            g.init = Some(init);
        }
        None => {
            let mut g = Global::new(name, ty, Some(init));
            g.constant = true;
            module.add_global(g);
        }
    }
    true
}

/// Record which global words hold pointers. Returns whether the module changed.
pub fn add_globals_bitmap(module: &mut Module) -> bool {
    let (bytes, words) = globals_bitmap(module);
    if bytes.iter().all(|b| *b == 0) {
        return false;
    }
    let len = bytes.len() as u32;
    let mut changed = set_global(module, TRACKED_GLOBALS_BITMAP, Type::Bytes(len), Constant::Bytes(bytes));
    changed |= set_global(module, TRACKED_GLOBALS_LENGTH, Type::I64, Constant::int(Type::I64, words as i64));
    if changed {
        debug!("tracked {} global word(s)", words);
    }
    changed
}

fn is_collection_point(op: &Op, gc_functions: &[FuncId]) -> bool {
    match op {
        Op::Alloc { .. } => true,
        Op::Call { .. } => !op.direct_callee().is_some_and(|c| gc_functions.contains(&c)),
        _ => false,
    }
}

/// `root` and every pointer derived from it through `gep` or `bitcast`.
fn derived_pointers(func: &Function, root: InstId) -> Vec<InstId> {
    let mut family = vec![root];
    let mut next = 0;
    while let Some(&value) = family.get(next) {
        next += 1;
        for user in func.uses_of_inst(value) {
            let derives = func.inst(user).is_some_and(|i| match &i.op {
                Op::Gep { ptr, .. } => *ptr == Operand::Inst(value),
                Op::Bitcast { value: v } => *v == Operand::Inst(value),
                _ => false,
            });
            if derives && !family.contains(&user) {
                family.push(user);
            }
        }
    }
    family
}

/// Heap pointers that are still needed after a later allocation or call,
/// either directly or through a pointer derived from them.
fn find_roots(func: &Function, gc_functions: &[FuncId]) -> Vec<InstId> {
    let points = func.insts().filter(|i| is_collection_point(&i.op, gc_functions)).count();
    let mut roots = Vec::new();
    for block in func.blocks.iter() {
        for (pos, inst) in block.insts.iter().enumerate() {
            if inst.ty != Type::Ptr || !matches!(inst.op, Op::Alloc { .. } | Op::Call { .. }) {
                continue;
            }
            let family = derived_pointers(func, inst.id);
            let live_across = family
                .iter()
                .flat_map(|v| func.uses_of_inst(*v))
                .filter(|u| !family.contains(u))
                .any(|u| match block.insts.iter().position(|i| i.id == u) {
                    Some(use_pos) => block
                        .insts
                        .get(pos + 1..use_pos)
                        .is_some_and(|between| between.iter().any(|i| is_collection_point(&i.op, gc_functions))),
                    // Used in another block: assume a collection may happen in between.
                    None => points > 1,
                });
            if live_across {
                roots.push(inst.id);
            }
        }
    }
    roots
}

fn instrument(func: &mut Function, roots: &[InstId], push: FuncId, pop: FuncId) {
    let Some(first) = func.blocks.first().and_then(|b| b.insts.first()).map(|i| i.id) else { return };
    let slots = roots.len() as u64;
    let Some(frame) =
        func.insert_before(first, Type::Ptr, Op::StackAlloc { size: FRAME_HEADER + WORD * slots })
    else {
        return;
    };
    func.insert_before(first, Type::Void, Op::Call { callee: Operand::Func(push), args: vec![frame.into()] });
    if let Some(count) = func.insert_before(first, Type::Ptr, Op::Gep { ptr: frame.into(), offset: WORD }) {
        func.insert_before(first, Type::Void, Op::Store { ptr: count.into(), value: Operand::int(Type::I64, slots as i64) });
    }

    for (k, root) in roots.iter().enumerate() {
        let offset = FRAME_HEADER + WORD * k as u64;
        if let Some(slot) = func.insert_after(*root, Type::Ptr, Op::Gep { ptr: frame.into(), offset }) {
            func.insert_after(slot, Type::Void, Op::Store { ptr: slot.into(), value: (*root).into() });
        }
    }

    let returns: Vec<InstId> = func.insts().filter(|i| matches!(i.op, Op::Ret { .. })).map(|i| i.id).collect();
    for ret in returns {
        func.insert_before(ret, Type::Void, Op::Call { callee: Operand::Func(pop), args: vec![frame.into()] });
    }
    func.stack_map = Some(StackMap { slots: slots as u32 });
}

/// Give every function with live heap pointers a collector-visible frame.
/// Functions that already carry a stack map are left alone.
pub fn make_gc_stack_slots(module: &mut Module) -> bool {
    let plan: Vec<(FuncId, Vec<InstId>)> = {
        let gc_functions: Vec<FuncId> = [GC_PUSH_FRAME, GC_POP_FRAME]
            .iter()
            .filter_map(|name| module.named_function(name))
            .collect();
        module
            .func_ids()
            .filter_map(|id| {
                let func = module.function(id);
                if func.is_declaration() || func.stack_map.is_some() || is_runtime_gc_function(&func.name) {
                    return None;
                }
                let roots = find_roots(func, &gc_functions);
                (!roots.is_empty()).then_some((id, roots))
            })
            .collect()
    };
    if plan.is_empty() {
        return false;
    }
    let (Some(push), Some(pop)) =
        (module.get_or_declare_runtime(GC_PUSH_FRAME), module.get_or_declare_runtime(GC_POP_FRAME))
    else {
        return false;
    };
    for (id, roots) in plan.iter() {
        instrument(module.function_mut(*id), roots, push, pop);
    }
    debug!("added stack frames to {} function(s)", plan.len());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{parse_module, verify_module};

    #[test]
    fn bitmap_marks_pointer_words() {
        let mut m = parse_module(
            "module t
global @count : i64 = 0:i64
global @head : ptr = null
global @name : [12 x i8] = x\"000000000000000000000000\"
global @tail : ptr = null
",
            "t.kir",
        )
        .unwrap();
        // words: count, head, name, name, tail
        assert_eq!(globals_bitmap(&m), (vec![0b10010], 5));
        assert!(add_globals_bitmap(&mut m));
        assert!(m.named_global(TRACKED_GLOBALS_BITMAP).is_some());
        assert!(!add_globals_bitmap(&mut m));
    }

    #[test]
    fn modules_without_pointer_globals_are_unchanged() {
        let mut m = parse_module("module t\nglobal @n : i64 = 1:i64\n", "t.kir").unwrap();
        assert!(!add_globals_bitmap(&mut m));
        assert_eq!(m.globals.len(), 1);
    }

    #[test]
    fn pointers_live_across_allocations_get_slots() {
        let mut m = parse_module(
            "module t
declare @use(ptr, ptr) -> void
define @f() -> void {
bb0:
  %0 : ptr = alloc 16:i64
  %1 : ptr = alloc 32:i64
  call @use(%0, %1)
  ret
}
define @g() -> i64 {
bb0:
  ret 0:i64
}
",
            "t.kir",
        )
        .unwrap();
        assert!(make_gc_stack_slots(&mut m));
        let f = m.function(m.named_function("f").unwrap());
        // %0 survives the second allocation, %1 is consumed by the next call
        assert_eq!(f.stack_map, Some(StackMap { slots: 1 }));
        assert!(matches!(f.blocks[0].insts[0].op, Op::StackAlloc { size: 24 }));
        let g = m.function(m.named_function("g").unwrap());
        assert_eq!(g.stack_map, None);
        verify_module(&m).unwrap();
        assert!(!make_gc_stack_slots(&mut m));
    }

    #[test]
    fn derived_pointer_keeps_its_object_rooted() {
        let mut m = parse_module(
            "module t
declare @work() -> void
define @f() -> i64 {
bb0:
  %0 : ptr = alloc 16:i64
  %1 : ptr = gep %0, 8
  %2 : ptr = bitcast %1
  call @work()
  %3 : i64 = load %2
  ret %3
}
",
            "t.kir",
        )
        .unwrap();
        assert!(make_gc_stack_slots(&mut m));
        let f = m.function(m.named_function("f").unwrap());
        assert_eq!(f.stack_map, Some(StackMap { slots: 1 }));
        // the allocation itself is what gets stored in the slot
        let stored: Vec<&Operand> = f
            .insts()
            .filter_map(|i| match &i.op {
                Op::Store { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert!(stored.contains(&&Operand::Inst(InstId(0))));
        verify_module(&m).unwrap();
    }
}
