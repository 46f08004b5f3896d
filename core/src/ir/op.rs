use serde::{Deserialize, Serialize};

use super::module::{BlockId, FuncId};
use super::value::Operand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinKind {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

impl BinKind {
    pub fn eval(&self, a: i64, b: i64) -> i64 {
        match self {
            BinKind::Add => a.wrapping_add(b),
            BinKind::Sub => a.wrapping_sub(b),
            BinKind::Mul => a.wrapping_mul(b),
            BinKind::And => a & b,
            BinKind::Or => a | b,
            BinKind::Xor => a ^ b,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            BinKind::Add => "add",
            BinKind::Sub => "sub",
            BinKind::Mul => "mul",
            BinKind::And => "and",
            BinKind::Or => "or",
            BinKind::Xor => "xor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IcmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl IcmpPred {
    pub fn eval(&self, a: i64, b: i64) -> bool {
        match self {
            IcmpPred::Eq => a == b,
            IcmpPred::Ne => a != b,
            IcmpPred::Slt => a < b,
            IcmpPred::Sle => a <= b,
            IcmpPred::Sgt => a > b,
            IcmpPred::Sge => a >= b,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            IcmpPred::Eq => "eq",
            IcmpPred::Ne => "ne",
            IcmpPred::Slt => "slt",
            IcmpPred::Sle => "sle",
            IcmpPred::Sgt => "sgt",
            IcmpPred::Sge => "sge",
        }
    }
}

/// Instruction payload.
///
/// Ops fall in four groups: primitive ops the code generator understands,
/// terminators, collection/string constructs the domain optimizers target,
/// and the high-level constructs (dynamic dispatch, function values, tasks)
/// that must be lowered away before code generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Bin { kind: BinKind, lhs: Operand, rhs: Operand },
    ICmp { pred: IcmpPred, lhs: Operand, rhs: Operand },
    Bitcast { value: Operand },
    /// Zeroed, GC-managed heap allocation.
    Alloc { size: Operand },
    /// Zeroed storage in the current stack frame.
    StackAlloc { size: u64 },
    Load { ptr: Operand },
    Store { ptr: Operand, value: Operand },
    Gep { ptr: Operand, offset: u64 },
    Call { callee: Operand, args: Vec<Operand> },
    /// Unconditional trap.
    Trap,
    /// Frame size of a lowered task; resolved by the function pass batch.
    FrameSize { func: FuncId },

    MapMake,
    MapUpdate { map: Operand, key: Operand, value: Operand },
    MapLookup { map: Operand, key: Operand },
    StringToBytes { value: Operand },

    MakeInterface { type_name: String, value: Operand },
    InvokeMethod { receiver: Operand, method: String, args: Vec<Operand> },
    TypeAssert { receiver: Operand, type_name: String },
    MakeFuncValue { func: FuncId, context: Operand },
    CallFuncValue { callee: Operand, args: Vec<Operand> },
    Spawn { func: FuncId, args: Vec<Operand> },
    Yield,

    Ret { value: Option<Operand> },
    Br { target: BlockId },
    CondBr { cond: Operand, then_block: BlockId, else_block: BlockId },
    Unreachable,
}

impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Ret { .. } | Op::Br { .. } | Op::CondBr { .. } | Op::Unreachable)
    }

    pub fn is_dispatch_construct(&self) -> bool {
        matches!(self, Op::MakeInterface { .. } | Op::InvokeMethod { .. } | Op::TypeAssert { .. })
    }

    pub fn is_func_value_construct(&self) -> bool {
        matches!(self, Op::MakeFuncValue { .. } | Op::CallFuncValue { .. })
    }

    pub fn is_task_construct(&self) -> bool {
        matches!(self, Op::Spawn { .. } | Op::Yield)
    }

    /// Whether the op is one of the constructs code generation cannot consume.
    pub fn is_high_level(&self) -> bool {
        self.is_dispatch_construct() || self.is_func_value_construct() || self.is_task_construct()
    }

    /// Ops that must be kept even when their result is unused.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Op::Store { .. }
                | Op::Call { .. }
                | Op::Trap
                | Op::MapUpdate { .. }
                | Op::InvokeMethod { .. }
                | Op::CallFuncValue { .. }
                | Op::Spawn { .. }
                | Op::Yield
        ) || self.is_terminator()
    }

    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Op::Bin { lhs, rhs, .. } | Op::ICmp { lhs, rhs, .. } => vec![lhs, rhs],
            Op::Bitcast { value } | Op::StringToBytes { value } => vec![value],
            Op::Alloc { size } => vec![size],
            Op::Load { ptr } | Op::Gep { ptr, .. } => vec![ptr],
            Op::Store { ptr, value } => vec![ptr, value],
            Op::Call { callee, args } | Op::CallFuncValue { callee, args } => {
                std::iter::once(callee).chain(args.iter()).collect()
            }
            Op::MapUpdate { map, key, value } => vec![map, key, value],
            Op::MapLookup { map, key } => vec![map, key],
            Op::MakeInterface { value, .. } => vec![value],
            Op::InvokeMethod { receiver, args, .. } => {
                std::iter::once(receiver).chain(args.iter()).collect()
            }
            Op::TypeAssert { receiver, .. } => vec![receiver],
            Op::MakeFuncValue { context, .. } => vec![context],
            Op::Spawn { args, .. } => args.iter().collect(),
            Op::Ret { value } => value.iter().collect(),
            Op::CondBr { cond, .. } => vec![cond],
            Op::StackAlloc { .. }
            | Op::Trap
            | Op::FrameSize { .. }
            | Op::MapMake
            | Op::Yield
            | Op::Br { .. }
            | Op::Unreachable => Vec::new(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Op::Bin { lhs, rhs, .. } | Op::ICmp { lhs, rhs, .. } => vec![lhs, rhs],
            Op::Bitcast { value } | Op::StringToBytes { value } => vec![value],
            Op::Alloc { size } => vec![size],
            Op::Load { ptr } | Op::Gep { ptr, .. } => vec![ptr],
            Op::Store { ptr, value } => vec![ptr, value],
            Op::Call { callee, args } | Op::CallFuncValue { callee, args } => {
                std::iter::once(callee).chain(args.iter_mut()).collect()
            }
            Op::MapUpdate { map, key, value } => vec![map, key, value],
            Op::MapLookup { map, key } => vec![map, key],
            Op::MakeInterface { value, .. } => vec![value],
            Op::InvokeMethod { receiver, args, .. } => {
                std::iter::once(receiver).chain(args.iter_mut()).collect()
            }
            Op::TypeAssert { receiver, .. } => vec![receiver],
            Op::MakeFuncValue { context, .. } => vec![context],
            Op::Spawn { args, .. } => args.iter_mut().collect(),
            Op::Ret { value } => value.iter_mut().collect(),
            Op::CondBr { cond, .. } => vec![cond],
            Op::StackAlloc { .. }
            | Op::Trap
            | Op::FrameSize { .. }
            | Op::MapMake
            | Op::Yield
            | Op::Br { .. }
            | Op::Unreachable => Vec::new(),
        }
    }

    /// Every function this op refers to, through operands or dedicated fields.
    pub fn func_refs(&self) -> Vec<FuncId> {
        let mut refs: Vec<FuncId> = self.operands().into_iter().filter_map(|o| o.as_func()).collect();
        match self {
            Op::FrameSize { func } | Op::MakeFuncValue { func, .. } | Op::Spawn { func, .. } => {
                refs.push(*func)
            }
            _ => {}
        }
        refs
    }

    pub fn func_refs_mut(&mut self) -> Vec<&mut FuncId> {
        let mut refs: Vec<&mut FuncId> = Vec::new();
        match self {
            Op::FrameSize { func } => refs.push(func),
            Op::MakeFuncValue { func, context } => {
                refs.push(func);
                if let Operand::Func(f) = context {
                    refs.push(f);
                }
            }
            Op::Spawn { func, args } => {
                refs.push(func);
                refs.extend(args.iter_mut().filter_map(|a| match a {
                    Operand::Func(f) => Some(f),
                    _ => None,
                }));
            }
            other => {
                refs.extend(other.operands_mut().into_iter().filter_map(|a| match a {
                    Operand::Func(f) => Some(f),
                    _ => None,
                }));
            }
        }
        refs
    }

    /// The direct callee of a `Call`, if any.
    pub fn direct_callee(&self) -> Option<FuncId> {
        match self {
            Op::Call { callee: Operand::Func(f), .. } => Some(*f),
            _ => None,
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Op::Br { target } => vec![*target],
            Op::CondBr { then_block, else_block, .. } => vec![*then_block, *else_block],
            _ => Vec::new(),
        }
    }

    pub fn successors_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            Op::Br { target } => vec![target],
            Op::CondBr { then_block, else_block, .. } => vec![then_block, else_block],
            _ => Vec::new(),
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Bin { kind, .. } => kind.mnemonic(),
            Op::ICmp { .. } => "icmp",
            Op::Bitcast { .. } => "bitcast",
            Op::Alloc { .. } => "alloc",
            Op::StackAlloc { .. } => "stackalloc",
            Op::Load { .. } => "load",
            Op::Store { .. } => "store",
            Op::Gep { .. } => "gep",
            Op::Call { .. } => "call",
            Op::Trap => "trap",
            Op::FrameSize { .. } => "framesize",
            Op::MapMake => "map.make",
            Op::MapUpdate { .. } => "map.update",
            Op::MapLookup { .. } => "map.lookup",
            Op::StringToBytes { .. } => "string.tobytes",
            Op::MakeInterface { .. } => "iface.make",
            Op::InvokeMethod { .. } => "iface.invoke",
            Op::TypeAssert { .. } => "iface.assert",
            Op::MakeFuncValue { .. } => "func.make",
            Op::CallFuncValue { .. } => "func.call",
            Op::Spawn { .. } => "spawn",
            Op::Yield => "yield",
            Op::Ret { .. } => "ret",
            Op::Br { .. } => "br",
            Op::CondBr { .. } => "condbr",
            Op::Unreachable => "unreachable",
        }
    }
}
