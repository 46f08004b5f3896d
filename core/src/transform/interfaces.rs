//! file: core/src/transform/interfaces.rs
//! description: lowers dynamic dispatch to typecode boxes and dispatch functions.
//!
//! An interface value becomes a pointer to a 16-byte box: a 32-bit typecode
//! at offset 0 and the concrete value at offset 8. Typecodes are the sorted
//! type names numbered from 1, so the assignment only depends on the set of
//! types in the module.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, warn};

use super::retype;
use crate::ir::runtime::NIL_PANIC;
use crate::ir::{
    FuncId, Function, FunctionBuilder, IcmpPred, InstId, Linkage, Module, Op, Operand, Type,
};

pub const BOX_SIZE: u64 = 16;
pub const VALUE_OFFSET: u64 = 8;
pub const DISPATCH_SUFFIX: &str = "$dispatch";

/// Deterministic typecodes for every concrete type the module mentions.
pub fn assign_typecodes(module: &Module) -> BTreeMap<String, i64> {
    let mut names: BTreeSet<String> = module.types.iter().map(|t| t.name.clone()).collect();
    for inst in module.functions.iter().flat_map(|f| f.insts()) {
        match &inst.op {
            Op::MakeInterface { type_name, .. } | Op::TypeAssert { type_name, .. } => {
                names.insert(type_name.clone());
            }
            _ => {}
        }
    }
    names.into_iter().enumerate().map(|(i, n)| (n, i as i64 + 1)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct DispatchKey {
    method: String,
    args: Vec<Type>,
    ret: Type,
}

pub fn lower_interfaces(module: &mut Module) -> usize {
    let codes = assign_typecodes(module);
    let mut lowered = 0;

    // Dispatch functions, created on first use per method signature.
    let mut dispatchers: HashMap<DispatchKey, FuncId> = HashMap::new();
    let mut invokes: Vec<(FuncId, InstId, DispatchKey)> = Vec::new();
    for id in module.func_ids() {
        let func = module.function(id);
        for inst in func.insts() {
            if let Op::InvokeMethod { method, args, .. } = &inst.op {
                let args = args.iter().map(|a| func.type_of(a).unwrap_or(Type::Void)).collect();
                invokes.push((id, inst.id, DispatchKey { method: method.clone(), args, ret: inst.ty }));
            }
        }
    }
    let mut keys: Vec<DispatchKey> = invokes.iter().map(|(_, _, k)| k.clone()).collect();
    keys.sort();
    keys.dedup();
    for key in keys {
        let dispatcher = build_dispatcher(module, &codes, &key, dispatchers.len());
        dispatchers.insert(key, dispatcher);
    }

    for id in module.func_ids().collect::<Vec<_>>() {
        let func = module.function_mut(id);
        let sites: Vec<InstId> = func.insts().filter(|i| i.op.is_dispatch_construct()).map(|i| i.id).collect();
        for site in sites {
            let Some(inst) = func.inst(site).cloned() else { continue };
            match inst.op {
                Op::MakeInterface { type_name, value } => {
                    let code = codes.get(&type_name).copied().unwrap_or(0);
                    let Some(boxed) = func.insert_before(site, Type::Ptr, Op::Alloc { size: Operand::int(Type::I64, BOX_SIZE as i64) }) else {
                        continue;
                    };
                    func.insert_before(site, Type::Void, Op::Store { ptr: boxed.into(), value: Operand::int(Type::I32, code) });
                    if let Some(slot) = func.insert_before(site, Type::Ptr, Op::Gep { ptr: boxed.into(), offset: VALUE_OFFSET }) {
                        func.insert_before(site, Type::Void, Op::Store { ptr: slot.into(), value });
                    }
                    func.replace_and_erase(site, &boxed.into());
                }
                Op::TypeAssert { receiver, type_name } => {
                    let code = codes.get(&type_name).copied().unwrap_or(0);
                    let Some(loaded) = func.insert_before(site, Type::I32, Op::Load { ptr: receiver }) else { continue };
                    let Some(cmp) = func.insert_before(
                        site,
                        Type::I1,
                        Op::ICmp { pred: IcmpPred::Eq, lhs: loaded.into(), rhs: Operand::int(Type::I32, code) },
                    ) else {
                        continue;
                    };
                    func.replace_and_erase(site, &cmp.into());
                }
                Op::InvokeMethod { receiver, method: _, args } => {
                    let key = invokes.iter().find(|(f, i, _)| *f == id && *i == site).map(|(_, _, k)| k);
                    let Some(dispatcher) = key.and_then(|k| dispatchers.get(k)) else { continue };
                    let mut call_args = vec![receiver];
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

    retype(module, Type::Iface, Type::Ptr);
    module.types.clear();
    debug!("lowered {} dynamic-dispatch construct(s) into {} dispatcher(s)", lowered, dispatchers.len());
    lowered
}

/// `{method}$dispatch(recv, args...)`: compare the receiver's typecode
/// against each implementing type and call the matching method.
fn build_dispatcher(module: &mut Module, codes: &BTreeMap<String, i64>, key: &DispatchKey, index: usize) -> FuncId {
    let nil_panic = module.get_or_declare_runtime(NIL_PANIC);
    let mut implementors: Vec<(i64, FuncId)> = Vec::new();
    for t in module.types.iter() {
        let Some(target) = t.methods.get(&key.method) else { continue };
        match module.named_function(target) {
            Some(f) => implementors.push((codes.get(&t.name).copied().unwrap_or(0), f)),
            None => warn!("type {} names missing method implementation @{}", t.name, target),
        }
    }
    implementors.sort();

    let name = if index == 0 && module.named_function(&format!("{}{}", key.method, DISPATCH_SUFFIX)).is_none() {
        format!("{}{}", key.method, DISPATCH_SUFFIX)
    } else {
        format!("{}{}.{}", key.method, DISPATCH_SUFFIX, index)
    };
    let mut params = vec![Type::Ptr];
    params.extend(key.args.iter().copied());
    let mut b = FunctionBuilder::new(name, params, key.ret).linkage(Linkage::Internal);

    let entry = b.block();
    let code = b.load(Type::I32, Operand::Arg(0));
    let fail = b.new_block();
    let mut check = entry;
    for (i, (typecode, target)) in implementors.iter().enumerate() {
        b.switch_to(check);
        let hit = b.new_block();
        let next = if i + 1 < implementors.len() { b.new_block() } else { fail };
        let cmp = b.icmp(IcmpPred::Eq, code.clone(), Operand::int(Type::I32, *typecode));
        b.cond_br(cmp, hit, next);

        b.switch_to(hit);
        let callee = module.function(*target);
        let mut args = Vec::new();
        if let Some(recv_ty) = callee.params.first().copied() {
            let slot = b.gep(Operand::Arg(0), VALUE_OFFSET);
            args.push(b.load(recv_ty, slot));
        }
        args.extend((0..key.args.len()).map(|a| Operand::Arg(a as u32 + 1)));
        let result = b.call(key.ret, Operand::Func(*target), args);
        b.ret(if key.ret == Type::Void { None } else { Some(result.into()) });
        check = next;
    }
    if implementors.is_empty() {
        b.switch_to(entry);
        b.br(fail);
    }
    b.switch_to(fail);
    if let Some(np) = nil_panic {
        b.call(Type::Void, Operand::Func(np), Vec::new());
    }
    b.unreachable();

    let func: Function = b.finish();
    module.add_function(func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    const ZOO: &str = "module zoo
type Dog { speak = @Dog.speak }
type Cat { speak = @Cat.speak }
define @Dog.speak(i64) -> i64 {
bb0:
  ret 1:i64
}
define @Cat.speak(i64) -> i64 {
bb0:
  ret 2:i64
}
define @main(i64) -> i1 {
bb0:
  %0 : iface = iface.make Dog, $0
  %1 : i64 = iface.invoke %0, speak()
  %2 : i1 = iface.assert %0, Cat
  ret %2
}
";

    #[test]
    fn typecodes_follow_sorted_type_names() {
        let m = parse_module(ZOO, "zoo.kir").unwrap();
        let codes = assign_typecodes(&m);
        assert_eq!(codes.get("Cat"), Some(&1));
        assert_eq!(codes.get("Dog"), Some(&2));
    }

    #[test]
    fn dispatch_constructs_are_gone_and_module_verifies() {
        let mut m = parse_module(ZOO, "zoo.kir").unwrap();
        assert_eq!(lower_interfaces(&mut m), 3);
        assert_eq!(m.count_insts(|i| i.op.is_dispatch_construct()), 0);
        assert!(m.types.is_empty());
        assert!(!m.has_high_level_constructs());
        let dispatcher = m.named_function("speak$dispatch").unwrap();
        assert_eq!(m.function(dispatcher).linkage, Linkage::Internal);
        // two implementors: entry, two hit blocks, one chained check, fail
        assert_eq!(m.function(dispatcher).blocks.len(), 5);
        crate::ir::verify_module(&m).unwrap();
    }
}
