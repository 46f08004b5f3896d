//! file: core/src/ir/runtime.rs
//! description: well-known runtime functions the lowering transforms call into.

use lazy_static::lazy_static;
use std::collections::HashMap;

use super::module::Attribute;
use super::value::Type;

pub const PANIC: &str = "runtime._panic";
pub const RUNTIME_PANIC: &str = "runtime.runtimePanic";
pub const IS_NIL: &str = "runtime.isnil";
pub const ALLOC: &str = "runtime.alloc";
pub const FREE: &str = "runtime.free";
pub const NIL_PANIC: &str = "runtime.nilPanic";
pub const SPAWN_TASK: &str = "runtime.spawnTask";
pub const GC_PUSH_FRAME: &str = "runtime.gcPushFrame";
pub const GC_POP_FRAME: &str = "runtime.gcPopFrame";

pub const TRACKED_GLOBALS_BITMAP: &str = "runtime.trackedGlobalsBitmap";
pub const TRACKED_GLOBALS_LENGTH: &str = "runtime.trackedGlobalsLength";

/// Functions whose every use aborts the program.
pub const FAILURE_FUNCTIONS: [&str; 2] = [PANIC, RUNTIME_PANIC];

/// Functions the transforms reference by name and that stay visible
/// until linkage is finalised. The GC frame functions are not listed: GC
/// instrumentation runs after linkage is finalised and still calls them.
pub const TRANSFORM_HELPERS: [&str; 4] = [ALLOC, FREE, NIL_PANIC, SPAWN_TASK];

#[derive(Debug, Clone)]
pub struct RuntimeSignature {
    pub params: Vec<Type>,
    pub ret: Type,
    pub attrs: Vec<Attribute>,
}

lazy_static! {
    static ref RUNTIME_SIGNATURES: HashMap<&'static str, RuntimeSignature> = {
        let mut m = HashMap::new();
        let sig = |params: &[Type], ret: Type, attrs: &[Attribute]| RuntimeSignature {
            params: params.to_vec(),
            ret,
            attrs: attrs.to_vec(),
        };
        m.insert(PANIC, sig(&[Type::Ptr], Type::Void, &[Attribute::NoReturn]));
        m.insert(RUNTIME_PANIC, sig(&[Type::Ptr], Type::Void, &[Attribute::NoReturn]));
        m.insert(IS_NIL, sig(&[Type::Ptr], Type::I1, &[Attribute::ReadNone]));
        m.insert(ALLOC, sig(&[Type::I64], Type::Ptr, &[]));
        m.insert(FREE, sig(&[Type::Ptr], Type::Void, &[]));
        m.insert(NIL_PANIC, sig(&[], Type::Void, &[Attribute::NoReturn]));
        m.insert(SPAWN_TASK, sig(&[Type::Ptr, Type::Ptr], Type::Void, &[]));
        m.insert(GC_PUSH_FRAME, sig(&[Type::Ptr], Type::Void, &[Attribute::NoYield]));
        m.insert(GC_POP_FRAME, sig(&[Type::Ptr], Type::Void, &[Attribute::NoYield]));
        m
    };
}

pub fn signature(name: &str) -> Option<&'static RuntimeSignature> {
    RUNTIME_SIGNATURES.get(name)
}

pub fn is_runtime_gc_function(name: &str) -> bool {
    name == GC_PUSH_FRAME || name == GC_POP_FRAME
}
