pub mod builder;
pub mod cfg;
pub mod module;
pub mod op;
pub mod runtime;
pub mod text;
pub mod value;
pub mod verify;

pub use builder::FunctionBuilder;
pub use module::{
    Attribute, Block, BlockId, FuncId, Function, Global, GlobalId, Inst, InstId, InstRef, Linkage, Module,
    StackMap, TypeDescriptor,
};
pub use op::{BinKind, IcmpPred, Op};
pub use text::{TextError, parse_module};
pub use value::{Constant, Operand, Type};
pub use verify::{Diagnostic, VerificationError, verify_module};
