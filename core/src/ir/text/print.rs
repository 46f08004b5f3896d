use std::fmt;

use crate::ir::{Function, Inst, Linkage, Module, Op, Operand};

/// Borrowing view that renders a single instruction with symbol names.
pub struct InstDisplay<'a> {
    module: &'a Module,
    inst: &'a Inst,
}

impl<'a> InstDisplay<'a> {
    pub fn new(module: &'a Module, inst: &'a Inst) -> Self {
        InstDisplay { module, inst }
    }
}

impl fmt::Display for InstDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_inst(f, self.module, self.inst)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        if !self.globals.is_empty() || !self.types.is_empty() {
            writeln!(f)?;
        }
        for g in self.globals.iter() {
            write!(f, "global @{} : {}", g.name, g.ty)?;
            if let Some(init) = &g.init {
                write!(f, " = {}", init)?;
            }
            if g.linkage == Linkage::Internal {
                write!(f, " internal")?;
            }
            if g.constant {
                write!(f, " constant")?;
            }
            writeln!(f)?;
        }
        for t in self.types.iter() {
            let methods: Vec<String> = t.methods.iter().map(|(m, target)| format!("{} = @{}", m, target)).collect();
            if methods.is_empty() {
                writeln!(f, "type {} {{}}", t.name)?;
            } else {
                writeln!(f, "type {} {{ {} }}", t.name, methods.join(", "))?;
            }
        }
        for func in self.functions.iter() {
            writeln!(f)?;
            write_function(f, self, func)?;
        }
        Ok(())
    }
}

fn write_function(f: &mut fmt::Formatter<'_>, module: &Module, func: &Function) -> fmt::Result {
    let keyword = if func.is_declaration() { "declare" } else { "define" };
    write!(f, "{}", keyword)?;
    if func.linkage == Linkage::Internal {
        write!(f, " internal")?;
    }
    let params: Vec<String> = func.params.iter().map(|p| p.to_string()).collect();
    write!(f, " @{}({}) -> {}", func.name, params.join(", "), func.ret)?;
    for attr in func.attrs.iter() {
        write!(f, " {}", attr.keyword())?;
    }
    if let Some(size) = func.frame_size {
        write!(f, " framesize({})", size)?;
    }
    if let Some(map) = func.stack_map {
        write!(f, " stackmap({})", map.slots)?;
    }
    if func.is_declaration() {
        return writeln!(f);
    }
    writeln!(f, " {{")?;
    for block in func.blocks.iter() {
        writeln!(f, "{}:", block.id)?;
        for inst in block.insts.iter() {
            write!(f, "  ")?;
            write_inst(f, module, inst)?;
            writeln!(f)?;
        }
    }
    writeln!(f, "}}")
}

fn write_inst(f: &mut fmt::Formatter<'_>, module: &Module, inst: &Inst) -> fmt::Result {
    if inst.ty != crate::ir::Type::Void {
        write!(f, "{} : {} = ", inst.id, inst.ty)?;
    }
    let list = |args: &[Operand]| operand_list(module, args);
    let func_name = |id: crate::ir::FuncId| {
        module.get_function(id).map(|f| f.name.clone()).unwrap_or_else(|| id.to_string())
    };
    match &inst.op {
        Op::Bin { kind, lhs, rhs } => write!(f, "{} {}, {}", kind.mnemonic(), od(module, lhs), od(module, rhs)),
        Op::ICmp { pred, lhs, rhs } => write!(f, "icmp {} {}, {}", pred.mnemonic(), od(module, lhs), od(module, rhs)),
        Op::Bitcast { value } => write!(f, "bitcast {}", od(module, value)),
        Op::Alloc { size } => write!(f, "alloc {}", od(module, size)),
        Op::StackAlloc { size } => write!(f, "stackalloc {}", size),
        Op::Load { ptr } => write!(f, "load {}", od(module, ptr)),
        Op::Store { ptr, value } => write!(f, "store {}, {}", od(module, ptr), od(module, value)),
        Op::Gep { ptr, offset } => write!(f, "gep {}, {}", od(module, ptr), offset),
        Op::Call { callee, args } => write!(f, "call {}({})", od(module, callee), list(args)),
        Op::Trap => write!(f, "trap"),
        Op::FrameSize { func } => write!(f, "framesize @{}", func_name(*func)),
        Op::MapMake => write!(f, "map.make"),
        Op::MapUpdate { map, key, value } => write!(f, "map.update {}, {}, {}", od(module, map), od(module, key), od(module, value)),
        Op::MapLookup { map, key } => write!(f, "map.lookup {}, {}", od(module, map), od(module, key)),
        Op::StringToBytes { value } => write!(f, "string.tobytes {}", od(module, value)),
        Op::MakeInterface { type_name, value } => write!(f, "iface.make {}, {}", type_name, od(module, value)),
        Op::InvokeMethod { receiver, method, args } => {
            write!(f, "iface.invoke {}, {}({})", od(module, receiver), method, list(args))
        }
        Op::TypeAssert { receiver, type_name } => write!(f, "iface.assert {}, {}", od(module, receiver), type_name),
        Op::MakeFuncValue { func, context } => write!(f, "func.make @{}, {}", func_name(*func), od(module, context)),
        Op::CallFuncValue { callee, args } => write!(f, "func.call {}({})", od(module, callee), list(args)),
        Op::Spawn { func, args } => write!(f, "spawn @{}({})", func_name(*func), list(args)),
        Op::Yield => write!(f, "yield"),
        Op::Ret { value: Some(v) } => write!(f, "ret {}", od(module, v)),
        Op::Ret { value: None } => write!(f, "ret"),
        Op::Br { target } => write!(f, "br {}", target),
        Op::CondBr { cond, then_block, else_block } => {
            write!(f, "condbr {}, {}, {}", od(module, cond), then_block, else_block)
        }
        Op::Unreachable => write!(f, "unreachable"),
    }
}

fn od<'a>(module: &'a Module, operand: &'a Operand) -> OperandDisplay<'a> {
    OperandDisplay { module, operand }
}

fn operand_list(module: &Module, args: &[Operand]) -> String {
    args.iter().map(|a| od(module, a).to_string()).collect::<Vec<_>>().join(", ")
}

struct OperandDisplay<'a> {
    module: &'a Module,
    operand: &'a Operand,
}

impl fmt::Display for OperandDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Operand::Inst(id) => write!(f, "{}", id),
            Operand::Arg(i) => write!(f, "${}", i),
            Operand::Const(c) => write!(f, "{}", c),
            Operand::Func(id) => match self.module.get_function(*id) {
                Some(func) => write!(f, "@{}", func.name),
                None => write!(f, "{}", id),
            },
            Operand::Global(id) => match self.module.globals.get(id.0 as usize) {
                Some(g) => write!(f, "@{}", g.name),
                None => write!(f, "{}", id),
            },
        }
    }
}
