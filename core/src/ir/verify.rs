//! IR verification: structural and type validation of a `Module`.
//!
//! The verifier never repairs anything. It walks every function and
//! collects one diagnostic per violated rule so callers can report all
//! problems at once.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::cfg::DomTree;
use super::module::{BlockId, Function, InstId, Module};
use super::op::Op;
use super::value::{Operand, Type};
use crate::error::{KilnErrorExt, Level};
use crate::location::IrLocation;

/// One violated rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub location: IrLocation,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationError {
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module failed verification with {} problem(s)", self.diagnostics.len())?;
        for d in &self.diagnostics {
            write!(f, "\n  {}", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for VerificationError {}

impl KilnErrorExt for VerificationError {
    fn level(&self) -> Level {
        Level::Error
    }

    fn message(&self) -> String {
        match self.diagnostics.first() {
            Some(first) if self.diagnostics.len() > 1 => {
                format!("{} (and {} more)", first.message, self.diagnostics.len() - 1)
            }
            Some(first) => first.message.clone(),
            None => "module failed verification".to_string(),
        }
    }

    fn issuer(&self) -> String {
        "kiln.verify".to_string()
    }

    fn location(&self) -> Option<crate::location::Location> {
        None
    }

    fn ir_location(&self) -> Option<IrLocation> {
        self.diagnostics.first().map(|d| d.location.clone())
    }
}

pub fn verify_module(module: &Module) -> Result<(), VerificationError> {
    let diagnostics = ModuleVerifier::new(module).run();
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(VerificationError { diagnostics })
    }
}

struct ModuleVerifier<'a> {
    module: &'a Module,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> ModuleVerifier<'a> {
    fn new(module: &'a Module) -> Self {
        ModuleVerifier { module, diagnostics: Vec::new() }
    }

    fn run(mut self) -> Vec<Diagnostic> {
        self.verify_globals();
        let module = self.module;
        let mut names: HashSet<&str> = HashSet::new();
        for func in module.functions.iter() {
            if !names.insert(func.name.as_str()) {
                self.report(IrLocation::function(&func.name), "duplicate function name".to_string());
            }
            if !func.is_declaration() {
                FunctionVerifier::new(module, func, &mut self.diagnostics).run();
            }
        }
        self.diagnostics
    }

    fn verify_globals(&mut self) {
        let module = self.module;
        let mut names: HashSet<&str> = HashSet::new();
        for g in module.globals.iter() {
            if !names.insert(g.name.as_str()) {
                self.report(IrLocation::function(&g.name), "duplicate global name".to_string());
            }
            if let Some(init) = &g.init {
                if init.ty() != g.ty {
                    self.report(
                        IrLocation::function(&g.name),
                        format!("global of type {} initialised with {}", g.ty, init.ty()),
                    );
                }
            }
        }
    }

    fn report(&mut self, location: IrLocation, message: String) {
        self.diagnostics.push(Diagnostic { location, message });
    }
}

struct FunctionVerifier<'a, 'd> {
    module: &'a Module,
    func: &'a Function,
    diagnostics: &'d mut Vec<Diagnostic>,
    /// Defining block and position of every instruction.
    defs: HashMap<InstId, (BlockId, usize)>,
}

impl<'a, 'd> FunctionVerifier<'a, 'd> {
    fn new(module: &'a Module, func: &'a Function, diagnostics: &'d mut Vec<Diagnostic>) -> Self {
        FunctionVerifier { module, func, diagnostics, defs: HashMap::new() }
    }

    fn report(&mut self, block: BlockId, inst: Option<InstId>, message: String) {
        self.diagnostics.push(Diagnostic {
            location: IrLocation::at(&self.func.name, block, inst),
            message,
        });
    }

    fn run(mut self) {
        let func = self.func;
        let mut block_ids: HashSet<BlockId> = HashSet::new();
        for block in func.blocks.iter() {
            if !block_ids.insert(block.id) {
                self.report(block.id, None, "duplicate block id".to_string());
            }
            for (idx, inst) in block.insts.iter().enumerate() {
                if self.defs.insert(inst.id, (block.id, idx)).is_some() {
                    self.report(block.id, Some(inst.id), "duplicate instruction id".to_string());
                }
            }
        }

        let dom = DomTree::compute(func);
        for block in func.blocks.iter() {
            match block.insts.last() {
                Some(last) if last.op.is_terminator() => {}
                _ => self.report(block.id, None, "block does not end with a terminator".to_string()),
            }
            for (idx, inst) in block.insts.iter().enumerate() {
                if inst.op.is_terminator() && idx + 1 != block.insts.len() {
                    self.report(block.id, Some(inst.id), "terminator in the middle of a block".to_string());
                }
                for target in inst.op.successors() {
                    if !block_ids.contains(&target) {
                        self.report(block.id, Some(inst.id), format!("branch to unknown block {}", target));
                    }
                }
                for operand in inst.op.operands() {
                    self.check_operand(&dom, block.id, idx, inst.id, operand);
                }
                if let Err(message) = self.check_types(&inst.op, inst.ty) {
                    self.report(block.id, Some(inst.id), message);
                }
            }
        }
    }

    fn check_operand(&mut self, dom: &DomTree, block: BlockId, idx: usize, user: InstId, operand: &Operand) {
        match operand {
            Operand::Inst(def) => {
                let Some(&(def_block, def_idx)) = self.defs.get(def) else {
                    self.report(block, Some(user), format!("use of undefined value {}", def));
                    return;
                };
                if self.func.inst(*def).map(|i| i.ty) == Some(Type::Void) {
                    self.report(block, Some(user), format!("use of void value {}", def));
                }
                if !dom.is_reachable(block) {
                    return;
                }
                let dominated = if def_block == block {
                    def_idx < idx
                } else {
                    dom.dominates(def_block, block)
                };
                if !dominated {
                    self.report(block, Some(user), format!("{} does not dominate this use", def));
                }
            }
            Operand::Arg(index) => {
                if *index as usize >= self.func.params.len() {
                    self.report(block, Some(user), format!("argument ${} out of range", index));
                }
            }
            Operand::Func(f) => {
                if self.module.get_function(*f).is_none() {
                    self.report(block, Some(user), format!("reference to unknown function {}", f));
                }
            }
            Operand::Global(g) => {
                if g.0 as usize >= self.module.globals.len() {
                    self.report(block, Some(user), format!("reference to unknown global {}", g));
                }
            }
            Operand::Const(_) => {}
        }
    }

    fn ty(&self, operand: &Operand) -> Type {
        self.func.type_of(operand).unwrap_or(Type::Void)
    }

    fn expect(&self, operand: &Operand, want: Type, what: &str) -> Result<(), String> {
        let got = self.ty(operand);
        if got == want {
            Ok(())
        } else {
            Err(format!("{} must be {}, found {}", what, want, got))
        }
    }

    fn check_result(ty: Type, want: Type, mnemonic: &str) -> Result<(), String> {
        if ty == want {
            Ok(())
        } else {
            Err(format!("{} produces {}, not {}", mnemonic, want, ty))
        }
    }

    fn check_types(&self, op: &Op, ty: Type) -> Result<(), String> {
        match op {
            Op::Bin { lhs, rhs, .. } => {
                if !ty.is_int() {
                    return Err(format!("{} on non-integer type {}", op.mnemonic(), ty));
                }
                self.expect(lhs, ty, "left operand")?;
                self.expect(rhs, ty, "right operand")
            }
            Op::ICmp { lhs, rhs, .. } => {
                Self::check_result(ty, Type::I1, "icmp")?;
                let (l, r) = (self.ty(lhs), self.ty(rhs));
                if l != r {
                    return Err(format!("icmp operands differ: {} vs {}", l, r));
                }
                if !(l.is_int() || l == Type::Ptr) {
                    return Err(format!("icmp on unsupported type {}", l));
                }
                Ok(())
            }
            Op::Bitcast { value } => {
                let from = self.ty(value);
                if from == Type::Void || ty == Type::Void {
                    return Err("bitcast involving void".to_string());
                }
                if from.size() != ty.size() {
                    return Err(format!("bitcast between {} and {} changes size", from, ty));
                }
                Ok(())
            }
            Op::Alloc { size } => {
                self.expect(size, Type::I64, "allocation size")?;
                Self::check_result(ty, Type::Ptr, "alloc")
            }
            Op::StackAlloc { .. } | Op::MapMake => Self::check_result(ty, Type::Ptr, op.mnemonic()),
            Op::Load { ptr } => {
                self.expect(ptr, Type::Ptr, "load address")?;
                if ty == Type::Void {
                    return Err("load of void".to_string());
                }
                Ok(())
            }
            Op::Store { ptr, value } => {
                self.expect(ptr, Type::Ptr, "store address")?;
                if self.ty(value) == Type::Void {
                    return Err("store of void".to_string());
                }
                Self::check_result(ty, Type::Void, "store")
            }
            Op::Gep { ptr, .. } => {
                self.expect(ptr, Type::Ptr, "gep base")?;
                Self::check_result(ty, Type::Ptr, "gep")
            }
            Op::Call { callee, args } => self.check_call(callee, args, ty),
            Op::Trap | Op::Yield | Op::Unreachable | Op::Br { .. } => {
                Self::check_result(ty, Type::Void, op.mnemonic())
            }
            Op::FrameSize { func } => {
                if self.module.get_function(*func).is_none() {
                    return Err(format!("framesize of unknown function {}", func));
                }
                Self::check_result(ty, Type::I64, "framesize")
            }
            Op::MapUpdate { map, .. } => {
                self.expect(map, Type::Ptr, "map")?;
                Self::check_result(ty, Type::Void, "map.update")
            }
            Op::MapLookup { map, .. } => {
                self.expect(map, Type::Ptr, "map")?;
                if ty == Type::Void {
                    return Err("map.lookup of void".to_string());
                }
                Ok(())
            }
            Op::StringToBytes { value } => {
                self.expect(value, Type::Ptr, "string")?;
                Self::check_result(ty, Type::Ptr, "string.tobytes")
            }
            Op::MakeInterface { type_name, value } => {
                if !self.module.types.iter().any(|t| &t.name == type_name) {
                    return Err(format!("unknown type {}", type_name));
                }
                if self.ty(value) == Type::Void {
                    return Err("interface of void".to_string());
                }
                Self::check_result(ty, Type::Iface, "iface.make")
            }
            Op::InvokeMethod { receiver, .. } => self.expect(receiver, Type::Iface, "receiver"),
            Op::TypeAssert { receiver, .. } => {
                self.expect(receiver, Type::Iface, "receiver")?;
                Self::check_result(ty, Type::I1, "iface.assert")
            }
            Op::MakeFuncValue { func, .. } => {
                if self.module.get_function(*func).is_none() {
                    return Err(format!("function value of unknown function {}", func));
                }
                Self::check_result(ty, Type::FuncVal, "func.make")
            }
            Op::CallFuncValue { callee, .. } => self.expect(callee, Type::FuncVal, "callee"),
            Op::Spawn { func, args } => {
                let Some(target) = self.module.get_function(*func) else {
                    return Err(format!("spawn of unknown function {}", func));
                };
                if target.params.len() != args.len() {
                    return Err(format!(
                        "spawn of @{} passes {} argument(s), expected {}",
                        target.name,
                        args.len(),
                        target.params.len()
                    ));
                }
                Self::check_result(ty, Type::Void, "spawn")
            }
            Op::Ret { value } => {
                Self::check_result(ty, Type::Void, "ret")?;
                match value {
                    None if self.func.ret == Type::Void => Ok(()),
                    None => Err(format!("missing return value of type {}", self.func.ret)),
                    Some(v) => self.expect(v, self.func.ret, "return value"),
                }
            }
            Op::CondBr { cond, .. } => {
                self.expect(cond, Type::I1, "branch condition")?;
                Self::check_result(ty, Type::Void, "condbr")
            }
        }
    }

    fn check_call(&self, callee: &Operand, args: &[Operand], ty: Type) -> Result<(), String> {
        let Operand::Func(id) = callee else {
            return self.expect(callee, Type::Ptr, "indirect callee");
        };
        let Some(target) = self.module.get_function(*id) else {
            return Err(format!("call to unknown function {}", id));
        };
        if target.params.len() != args.len() {
            return Err(format!(
                "call to @{} passes {} argument(s), expected {}",
                target.name,
                args.len(),
                target.params.len()
            ));
        }
        for (i, (arg, param)) in args.iter().zip(target.params.iter()).enumerate() {
            let got = self.ty(arg);
            if got != *param {
                return Err(format!("argument {} of call to @{} is {}, expected {}", i, target.name, got, param));
            }
        }
        if ty != target.ret {
            return Err(format!("call to @{} returns {}, not {}", target.name, target.ret, ty));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinKind, Constant, FunctionBuilder};

    fn module_with(f: Function) -> Module {
        let mut m = Module::new("t");
        m.add_function(f);
        m
    }

    #[test]
    fn well_formed_function_passes() {
        let mut b = FunctionBuilder::new("f", vec![Type::I64], Type::I64);
        b.block();
        let v = b.bin(BinKind::Add, Type::I64, Operand::Arg(0), Operand::int(Type::I64, 2));
        b.ret(Some(v));
        assert!(verify_module(&module_with(b.finish())).is_ok());
    }

    #[test]
    fn missing_terminator_is_reported() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        b.block();
        b.store(Operand::null(), Operand::int(Type::I64, 1));
        let err = verify_module(&module_with(b.finish())).unwrap_err();
        assert!(err.diagnostics.iter().any(|d| d.message.contains("terminator")));
    }

    #[test]
    fn use_before_definition_is_reported() {
        let mut f = Function::new("f", vec![], Type::I64);
        let b0 = f.add_block();
        let later = InstId(5);
        f.push_inst(b0, Type::Void, Op::Ret { value: Some(Operand::Inst(later)) });
        f.blocks[0].insts.insert(
            0,
            crate::ir::Inst {
                id: InstId(9),
                ty: Type::I64,
                op: Op::Bin { kind: BinKind::Add, lhs: Operand::Inst(InstId(10)), rhs: Operand::int(Type::I64, 1) },
            },
        );
        f.blocks[0].insts.insert(
            1,
            crate::ir::Inst { id: InstId(10), ty: Type::I64, op: Op::Bitcast { value: Operand::int(Type::I64, 0) } },
        );
        let err = verify_module(&module_with(f)).unwrap_err();
        let messages: Vec<&str> = err.diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("undefined value %5")));
        assert!(messages.iter().any(|m| m.contains("%10 does not dominate")));
    }

    #[test]
    fn call_signature_mismatch_is_reported() {
        let mut m = Module::new("t");
        let callee = m.add_function(Function::new("callee", vec![Type::Ptr], Type::Void));
        let mut b = FunctionBuilder::new("caller", vec![], Type::Void);
        b.block();
        b.call(Type::Void, Operand::Func(callee), vec![Operand::int(Type::I64, 1)]);
        b.ret(None);
        m.add_function(b.finish());
        let err = verify_module(&m).unwrap_err();
        assert_eq!(err.diagnostics.len(), 1);
        assert!(err.message().contains("argument 0"));
        assert_eq!(err.ir_location().map(|l| l.function), Some("caller".to_string()));
    }

    #[test]
    fn global_initialiser_type_is_checked() {
        let mut m = Module::new("t");
        m.add_global(crate::ir::Global::new("g", Type::I64, Some(Constant::Null)));
        assert!(verify_module(&m).is_err());
    }
}
