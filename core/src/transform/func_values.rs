//! file: core/src/transform/func_values.rs
//! description: lowers first-class function values to `{id, context}` boxes.
//!
//! Every function whose value is taken gets a 32-bit id, numbered from 1 in
//! function order. Such functions must already take the context pointer as
//! their last parameter. Calls through a value go to one dispatch function
//! per call signature, which compares the id against every taken function of
//! that signature.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use super::retype;
use crate::ir::runtime::NIL_PANIC;
use crate::ir::{FuncId, FunctionBuilder, IcmpPred, InstId, Linkage, Module, Op, Operand, Type};

pub const BOX_SIZE: u64 = 16;
pub const CONTEXT_OFFSET: u64 = 8;
pub const DISPATCH_PREFIX: &str = "funcValue.call$";

pub fn lower_func_values(module: &mut Module) -> usize {
    let taken: BTreeSet<FuncId> = module
        .functions
        .iter()
        .flat_map(|f| f.insts())
        .filter_map(|i| match i.op {
            Op::MakeFuncValue { func, .. } => Some(func),
            _ => None,
        })
        .collect();
    let ids: BTreeMap<FuncId, i64> = taken.iter().enumerate().map(|(i, f)| (*f, i as i64 + 1)).collect();

    // (arg types, ret) -> dispatcher
    let mut dispatchers: BTreeMap<(Vec<Type>, Type), FuncId> = BTreeMap::new();
    let mut calls: Vec<(FuncId, InstId, (Vec<Type>, Type))> = Vec::new();
    for id in module.func_ids() {
        let func = module.function(id);
        for inst in func.insts() {
            if let Op::CallFuncValue { args, .. } = &inst.op {
                let sig: Vec<Type> = args.iter().map(|a| func.type_of(a).unwrap_or(Type::Void)).collect();
                calls.push((id, inst.id, (sig, inst.ty)));
            }
        }
    }
    for (_, _, sig) in calls.iter() {
        if !dispatchers.contains_key(sig) {
            let index = dispatchers.len();
            let dispatcher = build_dispatcher(module, &ids, sig, index);
            dispatchers.insert(sig.clone(), dispatcher);
        }
    }

    let mut lowered = 0;
    for id in module.func_ids().collect::<Vec<_>>() {
        let func = module.function_mut(id);
        let sites: Vec<InstId> = func.insts().filter(|i| i.op.is_func_value_construct()).map(|i| i.id).collect();
        for site in sites {
            let Some(inst) = func.inst(site).cloned() else { continue };
            match inst.op {
                Op::MakeFuncValue { func: target, context } => {
                    let code = ids.get(&target).copied().unwrap_or(0);
                    let Some(boxed) =
                        func.insert_before(site, Type::Ptr, Op::Alloc { size: Operand::int(Type::I64, BOX_SIZE as i64) })
                    else {
                        continue;
                    };
                    func.insert_before(site, Type::Void, Op::Store { ptr: boxed.into(), value: Operand::int(Type::I32, code) });
                    if let Some(slot) = func.insert_before(site, Type::Ptr, Op::Gep { ptr: boxed.into(), offset: CONTEXT_OFFSET }) {
                        func.insert_before(site, Type::Void, Op::Store { ptr: slot.into(), value: context });
                    }
                    func.replace_and_erase(site, &boxed.into());
                }
                Op::CallFuncValue { callee, args } => {
                    let sig = calls.iter().find(|(f, i, _)| *f == id && *i == site).map(|(_, _, s)| s);
                    let Some(dispatcher) = sig.and_then(|s| dispatchers.get(s)) else { continue };
                    let mut call_args = vec![callee];
                    call_args.extend(args);
                    if let Some(target) = func.inst_mut(site) {
                        target.op = Op::Call { callee: Operand::Func(*dispatcher), args: call_args };
                    }
                }
                _ => continue,
            }
            lowered += 1;
        }
    }

    retype(module, Type::FuncVal, Type::Ptr);
    debug!("lowered {} function-value construct(s), {} taken function(s)", lowered, ids.len());
    lowered
}

fn build_dispatcher(module: &mut Module, ids: &BTreeMap<FuncId, i64>, sig: &(Vec<Type>, Type), index: usize) -> FuncId {
    let (arg_types, ret) = sig;
    let nil_panic = module.get_or_declare_runtime(NIL_PANIC);
    let mut expected = arg_types.clone();
    expected.push(Type::Ptr);
    let targets: Vec<(i64, FuncId)> = ids
        .iter()
        .filter(|(f, _)| {
            let func = module.function(**f);
            func.params == expected && func.ret == *ret
        })
        .map(|(f, code)| (*code, *f))
        .collect();

    let mut params = vec![Type::Ptr];
    params.extend(arg_types.iter().copied());
    let mut b = FunctionBuilder::new(format!("{}{}", DISPATCH_PREFIX, index), params, *ret).linkage(Linkage::Internal);
    let entry = b.block();
    let code = b.load(Type::I32, Operand::Arg(0));
    let slot = b.gep(Operand::Arg(0), CONTEXT_OFFSET);
    let context = b.load(Type::Ptr, slot);
    let fail = b.new_block();
    let mut check = entry;
    for (i, (value_id, target)) in targets.iter().enumerate() {
        b.switch_to(check);
        let hit = b.new_block();
        let next = if i + 1 < targets.len() { b.new_block() } else { fail };
        let cmp = b.icmp(IcmpPred::Eq, code.clone(), Operand::int(Type::I32, *value_id));
        b.cond_br(cmp, hit, next);

        b.switch_to(hit);
        let mut args: Vec<Operand> = (0..arg_types.len()).map(|a| Operand::Arg(a as u32 + 1)).collect();
        args.push(context.clone());
        let result = b.call(*ret, Operand::Func(*target), args);
        b.ret(if *ret == Type::Void { None } else { Some(result.into()) });
        check = next;
    }
    if targets.is_empty() {
        b.switch_to(entry);
        b.br(fail);
    }
    b.switch_to(fail);
    if let Some(np) = nil_panic {
        b.call(Type::Void, Operand::Func(np), Vec::new());
    }
    b.unreachable();
    module.add_function(b.finish())
}

/// Whether `name` is a dispatcher generated by this lowering.
pub fn is_dispatcher(name: &str) -> bool {
    name.starts_with(DISPATCH_PREFIX)
}
