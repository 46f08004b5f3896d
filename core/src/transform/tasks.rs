//! file: core/src/transform/tasks.rs
//! description: lowers spawned tasks and yield points to resumable state machines.
//!
//! A function containing `yield` becomes a resume function `f(frame: ptr) -> i1`
//! over a heap frame. Word 0 of the frame holds the state: 0 on first entry,
//! `k` after the k-th yield point and -1 once the task finished. Arguments
//! follow the state word, then the slots of values that live across blocks.
//! The resume function returns false when it suspends and true when done.
//!
//! Spawned functions that never yield get a small `$task` wrapper with the
//! same calling convention.

use std::collections::{BTreeMap, HashSet};

use log::debug;

use super::err::LoweringError;
use super::func_values::is_dispatcher;
use super::interfaces::DISPATCH_SUFFIX;
use crate::ir::runtime::SPAWN_TASK;
use crate::ir::{
    Attribute, Block, Constant, FuncId, Function, FunctionBuilder, IcmpPred, InstId, Linkage, Module,
    Op, Operand, Type,
};
use crate::opt::func_attrs::yielding_functions;

/// Bytes of the state word at the start of every frame.
pub const STATE_SIZE: u64 = 8;
pub const STATE_DONE: i64 = -1;
pub const WRAPPER_SUFFIX: &str = "$task";

fn slot_size(ty: Type) -> u64 {
    ty.size().max(1).div_ceil(8) * 8
}

/// Frame offsets of the arguments of a task with the given parameters.
pub fn arg_offsets(params: &[Type]) -> Vec<u64> {
    let mut offset = STATE_SIZE;
    params
        .iter()
        .map(|ty| {
            let at = offset;
            offset += slot_size(*ty);
            at
        })
        .collect()
}

fn frame_base(params: &[Type]) -> u64 {
    STATE_SIZE + params.iter().map(|t| slot_size(*t)).sum::<u64>()
}

fn is_dispatch_function(name: &str) -> bool {
    is_dispatcher(name) || name.contains(DISPATCH_SUFFIX)
}

/// Reject modules whose tasks cannot be lowered. Runs before anything is
/// changed, so a failure leaves the module as it was.
fn check(module: &Module, tasks: &HashSet<FuncId>) -> Result<(), LoweringError> {
    let yielding = yielding_functions(module);
    for id in module.func_ids() {
        let func = module.function(id);
        if tasks.contains(&id) && func.ret != Type::Void {
            return Err(LoweringError::NonVoidTask { function: func.name.clone() });
        }
        for inst in func.insts() {
            if let Op::Spawn { func: target, .. } = &inst.op {
                let target = module.function(*target);
                if target.ret != Type::Void {
                    return Err(LoweringError::NonVoidTask { function: target.name.clone() });
                }
            }
        }
    }
    for callee in module.func_ids().filter(|id| yielding.contains(id)) {
        let callee_name = &module.function(callee).name;
        for use_ in module.uses_of_func(callee) {
            let caller = module.function(use_.func);
            let Some(inst) = module.inst(&use_) else { continue };
            match &inst.op {
                Op::Spawn { func, args } if *func == callee && !args.contains(&Operand::Func(callee)) => {}
                Op::Call { callee: Operand::Func(f), args }
                    if *f == callee && !args.contains(&Operand::Func(callee)) =>
                {
                    if is_dispatch_function(&caller.name) {
                        return Err(LoweringError::EscapingTask { function: callee_name.clone() });
                    }
                    return Err(LoweringError::BlockingCall {
                        caller: caller.name.clone(),
                        callee: callee_name.clone(),
                    });
                }
                _ => return Err(LoweringError::EscapingTask { function: callee_name.clone() }),
            }
        }
    }
    Ok(())
}

/// Lower every spawn and yield in the module. Returns the number of
/// constructs lowered.
pub fn lower_tasks(module: &mut Module) -> Result<usize, LoweringError> {
    let tasks: HashSet<FuncId> = module
        .func_ids()
        .filter(|id| module.function(*id).insts().any(|i| matches!(i.op, Op::Yield)))
        .collect();
    let spawned: Vec<FuncId> = {
        let mut s: Vec<FuncId> = module
            .functions
            .iter()
            .flat_map(|f| f.insts())
            .filter_map(|i| match i.op {
                Op::Spawn { func, .. } => Some(func),
                _ => None,
            })
            .collect();
        s.sort();
        s.dedup();
        s
    };
    if tasks.is_empty() && spawned.is_empty() {
        return Ok(0);
    }
    check(module, &tasks)?;

    let offsets: BTreeMap<FuncId, Vec<u64>> =
        spawned.iter().chain(tasks.iter()).map(|f| (*f, arg_offsets(&module.function(*f).params))).collect();

    // Spawn targets that never yield run through a wrapper.
    let mut entry_points: BTreeMap<FuncId, FuncId> = BTreeMap::new();
    for target in spawned.iter() {
        let resume = if tasks.contains(target) { *target } else { build_wrapper(module, *target) };
        entry_points.insert(*target, resume);
    }

    let mut lowered = 0;
    if let Some(spawn_task) = module.get_or_declare_runtime(SPAWN_TASK) {
        for func in module.functions.iter_mut() {
            lowered += lower_spawns(func, spawn_task, &entry_points, &offsets);
        }
    }

    let mut task_ids: Vec<FuncId> = tasks.into_iter().collect();
    task_ids.sort();
    for id in task_ids {
        let func = module.function_mut(id);
        lowered += make_resumable(func);
    }

    debug!("lowered {} task construct(s), {} wrapper(s)", lowered, entry_points.iter().filter(|(a, b)| a != b).count());
    Ok(lowered)
}

fn build_wrapper(module: &mut Module, target: FuncId) -> FuncId {
    let callee = module.function(target);
    let params = callee.params.clone();
    let name = format!("{}{}", callee.name, WRAPPER_SUFFIX);

    let mut b = FunctionBuilder::new(name, vec![Type::Ptr], Type::I1).linkage(Linkage::Internal);
    b.block();
    let args: Vec<Operand> = params
        .iter()
        .zip(arg_offsets(&params))
        .map(|(ty, offset)| {
            let slot = b.gep(Operand::Arg(0), offset);
            b.load(*ty, slot)
        })
        .collect();
    b.call(Type::Void, Operand::Func(target), args);
    b.store(Operand::Arg(0), Operand::int(Type::I64, STATE_DONE));
    b.ret(Some(Operand::Const(Constant::bool(true))));
    let mut wrapper = b.finish();
    wrapper.frame_size = Some(frame_base(&params));
    module.add_function(wrapper)
}

/// `spawn @f(args)` becomes a frame allocation, argument stores and a call
/// to the scheduler.
fn lower_spawns(
    func: &mut Function,
    spawn_task: FuncId,
    entry_points: &BTreeMap<FuncId, FuncId>,
    offsets: &BTreeMap<FuncId, Vec<u64>>,
) -> usize {
    let sites: Vec<(InstId, FuncId, Vec<Operand>)> = func
        .insts()
        .filter_map(|i| match &i.op {
            Op::Spawn { func, args } => Some((i.id, *func, args.clone())),
            _ => None,
        })
        .collect();
    let mut lowered = 0;
    for (site, target, args) in sites {
        let Some(resume) = entry_points.get(&target).copied() else { continue };
        let Some(size) = func.insert_before(site, Type::I64, Op::FrameSize { func: resume }) else { continue };
        let Some(frame) = func.insert_before(site, Type::Ptr, Op::Alloc { size: size.into() }) else { continue };
        let arg_offsets = offsets.get(&target).cloned().unwrap_or_default();
        for (arg, offset) in args.into_iter().zip(arg_offsets) {
            if let Some(slot) = func.insert_before(site, Type::Ptr, Op::Gep { ptr: frame.into(), offset }) {
                func.insert_before(site, Type::Void, Op::Store { ptr: slot.into(), value: arg });
            }
        }
        if let Some(inst) = func.inst_mut(site) {
            inst.ty = Type::Void;
            inst.op = Op::Call { callee: Operand::Func(spawn_task), args: vec![Operand::Func(resume), frame.into()] };
            lowered += 1;
        }
    }
    lowered
}

/// Rewrite a yielding function in place into its resume function.
fn make_resumable(func: &mut Function) -> usize {
    let params = func.params.clone();
    let arg_offsets = arg_offsets(&params);
    let frame = Operand::Arg(0);

    // Arguments are read from the frame right before each use.
    let readers: Vec<InstId> = func
        .insts()
        .filter(|i| i.op.operands().iter().any(|o| matches!(o, Operand::Arg(_))))
        .map(|i| i.id)
        .collect();
    for user in readers {
        let Some(mut op) = func.inst(user).map(|i| i.op.clone()) else { continue };
        for operand in op.operands_mut() {
            let Operand::Arg(index) = *operand else { continue };
            let (Some(ty), Some(offset)) = (params.get(index as usize), arg_offsets.get(index as usize)) else {
                continue;
            };
            let Some(slot) = func.insert_before(user, Type::Ptr, Op::Gep { ptr: frame.clone(), offset: *offset }) else {
                continue;
            };
            if let Some(value) = func.insert_before(user, *ty, Op::Load { ptr: slot.into() }) {
                *operand = value.into();
            }
        }
        if let Some(inst) = func.inst_mut(user) {
            inst.op = op;
        }
    }

    // Split every block at its yield points.
    let mut resume_points = Vec::new();
    loop {
        let Some((bi, ii)) = func
            .blocks
            .iter()
            .enumerate()
            .find_map(|(bi, b)| b.insts.iter().position(|i| matches!(i.op, Op::Yield)).map(|ii| (bi, ii)))
        else {
            break;
        };
        let state = resume_points.len() as i64 + 1;
        let tail = func.blocks[bi].insts.split_off(ii + 1);
        func.blocks[bi].insts.pop();
        let resume = func.alloc_block_id();
        func.blocks.insert(bi + 1, Block { id: resume, insts: tail });
        let here = func.blocks[bi].id;
        func.push_inst(here, Type::Void, Op::Store { ptr: frame.clone(), value: Operand::int(Type::I64, state) });
        func.push_inst(here, Type::Void, Op::Ret { value: Some(Operand::Const(Constant::bool(false))) });
        resume_points.push((state, resume));
    }
    let yields = resume_points.len();

    // Returning finishes the task.
    let returns: Vec<InstId> = func
        .insts()
        .filter(|i| matches!(i.op, Op::Ret { value: None }))
        .map(|i| i.id)
        .collect();
    for ret in returns {
        func.insert_before(ret, Type::Void, Op::Store { ptr: frame.clone(), value: Operand::int(Type::I64, STATE_DONE) });
        if let Some(inst) = func.inst_mut(ret) {
            inst.op = Op::Ret { value: Some(Operand::Const(Constant::bool(true))) };
        }
    }

    // Stack memory does not survive a suspension.
    for block in func.blocks.iter_mut() {
        for inst in block.insts.iter_mut() {
            if let Op::StackAlloc { size } = inst.op {
                inst.op = Op::Alloc { size: Operand::int(Type::I64, size as i64) };
            }
        }
    }

    let spill_end = spill_cross_block_values(func, frame_base(&params));

    // New entry: dispatch on the saved state.
    let Some(first) = func.entry() else { return yields };
    let mut targets = vec![(0, first)];
    targets.extend(resume_points);
    let entry = func.alloc_block_id();
    func.blocks.insert(0, Block::new(entry));
    let trap = func.add_block();
    func.push_inst(trap, Type::Void, Op::Unreachable);
    let state = func.push_inst(entry, Type::I64, Op::Load { ptr: frame.clone() });
    let mut check = entry;
    for (i, (value, target)) in targets.iter().enumerate() {
        let next = if i + 1 < targets.len() { func.add_block() } else { trap };
        let cmp = func.push_inst(
            check,
            Type::I1,
            Op::ICmp { pred: IcmpPred::Eq, lhs: state.into(), rhs: Operand::int(Type::I64, *value) },
        );
        func.push_inst(check, Type::Void, Op::CondBr { cond: cmp.into(), then_block: *target, else_block: next });
        check = next;
    }

    func.params = vec![Type::Ptr];
    func.ret = Type::I1;
    func.frame_size = Some(spill_end);
    func.attrs.remove(&Attribute::ReadNone);
    func.attrs.remove(&Attribute::ReadOnly);
    yields
}

/// Move values used outside their defining block into frame slots starting
/// at `base`. Returns the end of the last slot.
fn spill_cross_block_values(func: &mut Function, base: u64) -> u64 {
    let mut spills: Vec<(InstId, Type, Vec<InstId>)> = Vec::new();
    for block in func.blocks.iter() {
        for inst in block.insts.iter().filter(|i| i.ty != Type::Void) {
            let remote: Vec<InstId> = func
                .uses_of_inst(inst.id)
                .into_iter()
                .filter(|u| func.block_of(*u) != Some(block.id))
                .collect();
            if !remote.is_empty() {
                spills.push((inst.id, inst.ty, remote));
            }
        }
    }

    let frame = Operand::Arg(0);
    let mut offset = base;
    for (value, ty, users) in spills {
        let Some(slot) = func.insert_after(value, Type::Ptr, Op::Gep { ptr: frame.clone(), offset }) else {
            continue;
        };
        func.insert_after(slot, Type::Void, Op::Store { ptr: slot.into(), value: value.into() });
        for user in users {
            let Some(slot) = func.insert_before(user, Type::Ptr, Op::Gep { ptr: frame.clone(), offset }) else {
                continue;
            };
            let Some(reload) = func.insert_before(user, ty, Op::Load { ptr: slot.into() }) else { continue };
            if let Some(inst) = func.inst_mut(user) {
                for operand in inst.op.operands_mut() {
                    if operand.as_inst() == Some(value) {
                        *operand = reload.into();
                    }
                }
            }
        }
        offset += slot_size(ty);
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{parse_module, verify_module};

    const WORKER: &str = "module t
declare @sink(i64) -> void
define @worker(i64) -> void {
bb0:
  %0 : i64 = add $0, 1:i64
  yield
  call @sink(%0)
  yield
  call @sink($0)
  ret
}
define @plain(i64) -> void {
bb0:
  call @sink($0)
  ret
}
define @main() -> void {
bb0:
  spawn @worker(41:i64)
  spawn @plain(7:i64)
  ret
}
";

    #[test]
    fn spawned_functions_become_resume_functions() {
        let mut m = parse_module(WORKER, "t.kir").unwrap();
        // two spawns, two yields
        assert_eq!(lower_tasks(&mut m).unwrap(), 4);
        assert!(!m.has_high_level_constructs());

        let worker = m.function(m.named_function("worker").unwrap());
        assert_eq!(worker.params, vec![Type::Ptr]);
        assert_eq!(worker.ret, Type::I1);
        // state, one argument, one spilled value
        assert_eq!(worker.frame_size, Some(24));

        let wrapper = m.named_function("plain$task").unwrap();
        assert_eq!(m.function(wrapper).frame_size, Some(16));
        let main = m.function(m.named_function("main").unwrap());
        assert_eq!(main.insts().filter(|i| matches!(i.op, Op::FrameSize { .. })).count(), 2);
        verify_module(&m).unwrap();
    }

    #[test]
    fn direct_call_to_a_yielding_function_is_rejected() {
        let text = "module t
define @sleeper() -> void {
bb0:
  yield
  ret
}
define @main() -> void {
bb0:
  call @sleeper()
  ret
}
";
        let mut m = parse_module(text, "t.kir").unwrap();
        let before = m.clone();
        let err = lower_tasks(&mut m).unwrap_err();
        assert_eq!(err, LoweringError::BlockingCall { caller: "main".to_string(), callee: "sleeper".to_string() });
        assert_eq!(m, before);
    }

    #[test]
    fn yielding_function_values_and_results_are_rejected() {
        let escaping = "module t
define @sleeper(ptr) -> void {
bb0:
  yield
  ret
}
define @main() -> funcval {
bb0:
  %0 : funcval = func.make @sleeper, null
  ret %0
}
";
        let mut m = parse_module(escaping, "t.kir").unwrap();
        assert_eq!(lower_tasks(&mut m), Err(LoweringError::EscapingTask { function: "sleeper".to_string() }));

        let valued = "module t
define @compute() -> i64 {
bb0:
  yield
  ret 1:i64
}
";
        let mut m = parse_module(valued, "t.kir").unwrap();
        assert_eq!(lower_tasks(&mut m), Err(LoweringError::NonVoidTask { function: "compute".to_string() }));
    }

    #[test]
    fn modules_without_tasks_are_untouched() {
        let mut m = parse_module("module t\ndefine @f() -> void {\nbb0:\n  ret\n}\n", "t.kir").unwrap();
        let before = m.clone();
        assert_eq!(lower_tasks(&mut m), Ok(0));
        assert_eq!(m, before);
    }
}
