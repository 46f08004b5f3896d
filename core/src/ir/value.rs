use serde::{Deserialize, Serialize};

use super::module::{FuncId, GlobalId, InstId};

/// First-class IR types.
///
/// `Iface` and `FuncVal` only exist before lowering; every lowering that
/// removes the matching constructs also retypes them to `Ptr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Type {
    Void,
    I1,
    I8,
    I32,
    I64,
    Ptr,
    Iface,
    FuncVal,
    /// Byte array of the given length.
    Bytes(u32),
}

impl Type {
    pub fn is_int(&self) -> bool {
        matches!(self, Type::I1 | Type::I8 | Type::I32 | Type::I64)
    }

    /// Storage size in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Type::Void => 0,
            Type::I1 | Type::I8 => 1,
            Type::I32 => 4,
            Type::I64 | Type::Ptr | Type::Iface | Type::FuncVal => 8,
            Type::Bytes(n) => u64::from(*n),
        }
    }

    /// Whether a value of this type may hold a GC-visible pointer.
    pub fn has_pointers(&self) -> bool {
        matches!(self, Type::Ptr | Type::Iface | Type::FuncVal)
    }

    /// Truncate `value` to the bit width of this integer type (sign-extended back to i64).
    pub fn wrap(&self, value: i64) -> i64 {
        match self {
            Type::I1 => value & 1,
            Type::I8 => value as i8 as i64,
            Type::I32 => value as i32 as i64,
            _ => value,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::I1 => write!(f, "i1"),
            Type::I8 => write!(f, "i8"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::Ptr => write!(f, "ptr"),
            Type::Iface => write!(f, "iface"),
            Type::FuncVal => write!(f, "funcval"),
            Type::Bytes(n) => write!(f, "[{} x i8]", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constant {
    Int { ty: Type, value: i64 },
    Null,
    Bytes(Vec<u8>),
    Undef(Type),
}

impl Constant {
    pub fn int(ty: Type, value: i64) -> Self {
        Constant::Int { ty, value: ty.wrap(value) }
    }

    pub fn bool(value: bool) -> Self {
        Constant::Int { ty: Type::I1, value: value as i64 }
    }

    pub fn ty(&self) -> Type {
        match self {
            Constant::Int { ty, .. } => *ty,
            Constant::Null => Type::Ptr,
            Constant::Bytes(bytes) => Type::Bytes(bytes.len() as u32),
            Constant::Undef(ty) => *ty,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int { value, .. } => Some(*value),
            _ => None,
        }
    }
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Int { ty: Type::I1, value } => {
                write!(f, "{}", if *value != 0 { "true" } else { "false" })
            }
            Constant::Int { ty, value } => write!(f, "{}:{}", value, ty),
            Constant::Null => write!(f, "null"),
            Constant::Bytes(bytes) => {
                write!(f, "x\"")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, "\"")
            }
            Constant::Undef(ty) => write!(f, "undef:{}", ty),
        }
    }
}

/// An instruction operand. References are by id, never by ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Inst(InstId),
    Arg(u32),
    Const(Constant),
    Func(FuncId),
    Global(GlobalId),
}

impl Operand {
    pub fn int(ty: Type, value: i64) -> Self {
        Operand::Const(Constant::int(ty, value))
    }

    pub fn null() -> Self {
        Operand::Const(Constant::Null)
    }

    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Operand::Inst(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<FuncId> {
        match self {
            Operand::Func(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_const_int(&self) -> Option<i64> {
        match self {
            Operand::Const(c) => c.as_int(),
            _ => None,
        }
    }
}

impl From<InstId> for Operand {
    fn from(id: InstId) -> Self {
        Operand::Inst(id)
    }
}

impl From<Constant> for Operand {
    fn from(c: Constant) -> Self {
        Operand::Const(c)
    }
}
