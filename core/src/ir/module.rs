use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::op::Op;
use super::runtime;
use super::value::{Constant, Operand, Type};

macro_rules! id_type {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

id_type!(InstId, "%");
id_type!(BlockId, "bb");
id_type!(FuncId, "fn#");
id_type!(GlobalId, "global#");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Linkage {
    External,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Attribute {
    /// Prefer smaller code over faster code.
    OptSize,
    ReadNone,
    ReadOnly,
    /// Never suspends the running task.
    NoYield,
    NoReturn,
}

impl Attribute {
    pub fn keyword(&self) -> &'static str {
        match self {
            Attribute::OptSize => "optsize",
            Attribute::ReadNone => "readnone",
            Attribute::ReadOnly => "readonly",
            Attribute::NoYield => "noyield",
            Attribute::NoReturn => "noreturn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inst {
    pub id: InstId,
    pub ty: Type,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub insts: Vec<Inst>,
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Block { id, insts: Vec::new() }
    }

    pub fn terminator(&self) -> Option<&Inst> {
        self.insts.last().filter(|i| i.op.is_terminator())
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.terminator().map(|t| t.op.successors()).unwrap_or_default()
    }
}

/// Stack slots registered with the collector for one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackMap {
    pub slots: u32,
}

/// A position inside a module: function, block and instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstRef {
    pub func: FuncId,
    pub block: BlockId,
    pub inst: InstId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub linkage: Linkage,
    pub attrs: BTreeSet<Attribute>,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub frame_size: Option<u64>,
    #[serde(default)]
    pub stack_map: Option<StackMap>,
    #[serde(skip)]
    next_inst: u32,
    #[serde(skip)]
    next_block: u32,
}

impl Function {
    /// Create an external declaration. Adding a block turns it into a definition.
    pub fn new(name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        Function {
            name: name.into(),
            params,
            ret,
            linkage: Linkage::External,
            attrs: BTreeSet::new(),
            blocks: Vec::new(),
            frame_size: None,
            stack_map: None,
            next_inst: 0,
            next_block: 0,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn has_attr(&self, attr: Attribute) -> bool {
        self.attrs.contains(&attr)
    }

    /// Resynchronise id counters with the ids present in the body.
    /// Needed after deserialisation, which does not carry the counters.
    pub fn refresh_counters(&mut self) {
        let max_inst = self.insts().map(|i| i.id.0 + 1).max().unwrap_or(0);
        let max_block = self.blocks.iter().map(|b| b.id.0 + 1).max().unwrap_or(0);
        self.next_inst = self.next_inst.max(max_inst);
        self.next_block = self.next_block.max(max_block);
    }

    pub fn alloc_inst_id(&mut self) -> InstId {
        let id = InstId(self.next_inst);
        self.next_inst = self.next_inst.wrapping_add(1);
        id
    }

    pub fn alloc_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block = self.next_block.wrapping_add(1);
        id
    }

    /// Append a new, empty block and return its id.
    pub fn add_block(&mut self) -> BlockId {
        let id = self.alloc_block_id();
        self.blocks.push(Block::new(id));
        id
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().map(|b| b.id)
    }

    pub fn block_index(&self, id: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub fn insts(&self) -> impl Iterator<Item = &Inst> {
        self.blocks.iter().flat_map(|b| b.insts.iter())
    }

    pub fn inst_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }

    /// Locate an instruction as (block index, instruction index).
    pub fn find_inst(&self, id: InstId) -> Option<(usize, usize)> {
        for (bi, block) in self.blocks.iter().enumerate() {
            if let Some(ii) = block.insts.iter().position(|i| i.id == id) {
                return Some((bi, ii));
            }
        }
        None
    }

    pub fn inst(&self, id: InstId) -> Option<&Inst> {
        self.find_inst(id).map(|(b, i)| &self.blocks[b].insts[i])
    }

    pub fn inst_mut(&mut self, id: InstId) -> Option<&mut Inst> {
        let (b, i) = self.find_inst(id)?;
        Some(&mut self.blocks[b].insts[i])
    }

    /// Block that contains the instruction.
    pub fn block_of(&self, id: InstId) -> Option<BlockId> {
        self.find_inst(id).map(|(b, _)| self.blocks[b].id)
    }

    /// Push an instruction at the end of `block`.
    pub fn push_inst(&mut self, block: BlockId, ty: Type, op: Op) -> InstId {
        let id = self.alloc_inst_id();
        if let Some(b) = self.block_mut(block) {
            b.insts.push(Inst { id, ty, op });
        }
        id
    }

    /// Insert a fresh instruction immediately before `before`.
    pub fn insert_before(&mut self, before: InstId, ty: Type, op: Op) -> Option<InstId> {
        let (b, i) = self.find_inst(before)?;
        let id = self.alloc_inst_id();
        self.blocks[b].insts.insert(i, Inst { id, ty, op });
        Some(id)
    }

    /// Insert a fresh instruction immediately after `after`.
    pub fn insert_after(&mut self, after: InstId, ty: Type, op: Op) -> Option<InstId> {
        let (b, i) = self.find_inst(after)?;
        let id = self.alloc_inst_id();
        self.blocks[b].insts.insert(i + 1, Inst { id, ty, op });
        Some(id)
    }

    /// Instructions that read the result of `id`.
    pub fn uses_of_inst(&self, id: InstId) -> Vec<InstId> {
        self.insts()
            .filter(|i| i.op.operands().iter().any(|o| o.as_inst() == Some(id)))
            .map(|i| i.id)
            .collect()
    }

    pub fn uses_of_arg(&self, index: u32) -> Vec<InstId> {
        self.insts()
            .filter(|i| i.op.operands().iter().any(|o| matches!(o, Operand::Arg(a) if *a == index)))
            .map(|i| i.id)
            .collect()
    }

    /// Redirect every use of `of` to `with`.
    pub fn replace_all_uses(&mut self, of: InstId, with: &Operand) -> usize {
        let mut replaced = 0;
        for block in self.blocks.iter_mut() {
            for inst in block.insts.iter_mut() {
                for operand in inst.op.operands_mut() {
                    if operand.as_inst() == Some(of) {
                        *operand = with.clone();
                        replaced += 1;
                    }
                }
            }
        }
        replaced
    }

    /// Remove an instruction. Callers redirect its uses first.
    pub fn erase_inst(&mut self, id: InstId) -> Option<Inst> {
        let (b, i) = self.find_inst(id)?;
        Some(self.blocks[b].insts.remove(i))
    }

    /// Replace all uses with `with`, then erase.
    pub fn replace_and_erase(&mut self, id: InstId, with: &Operand) -> Option<Inst> {
        self.replace_all_uses(id, with);
        self.erase_inst(id)
    }

    /// Type of an operand in the context of this function.
    pub fn type_of(&self, operand: &Operand) -> Option<Type> {
        match operand {
            Operand::Inst(id) => self.inst(*id).map(|i| i.ty),
            Operand::Arg(index) => self.params.get(*index as usize).copied(),
            Operand::Const(c) => Some(c.ty()),
            Operand::Func(_) | Operand::Global(_) => Some(Type::Ptr),
        }
    }

    /// Predecessor lists for every block, in block order.
    pub fn predecessors(&self) -> HashMap<BlockId, Vec<BlockId>> {
        let mut preds: HashMap<BlockId, Vec<BlockId>> =
            self.blocks.iter().map(|b| (b.id, Vec::new())).collect();
        for block in self.blocks.iter() {
            for succ in block.successors() {
                let entry = preds.entry(succ).or_default();
                if !entry.contains(&block.id) {
                    entry.push(block.id);
                }
            }
        }
        preds
    }

    /// Remove blocks, replacing any remaining uses of their values with undef.
    pub fn remove_blocks(&mut self, dead: &[BlockId]) {
        let mut removed: Vec<(InstId, Type)> = Vec::new();
        self.blocks.retain(|b| {
            if dead.contains(&b.id) {
                removed.extend(b.insts.iter().map(|i| (i.id, i.ty)));
                false
            } else {
                true
            }
        });
        for (id, ty) in removed {
            self.replace_all_uses(id, &Operand::Const(Constant::Undef(ty)));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub init: Option<Constant>,
    pub linkage: Linkage,
    #[serde(default)]
    pub constant: bool,
}

impl Global {
    pub fn new(name: impl Into<String>, ty: Type, init: Option<Constant>) -> Self {
        Global { name: name.into(), ty, init, linkage: Linkage::External, constant: false }
    }
}

/// Concrete type that implements methods through dynamic dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    /// Method name -> implementing function name.
    pub methods: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
    #[serde(default)]
    pub types: Vec<TypeDescriptor>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module { name: name.into(), functions: Vec::new(), globals: Vec::new(), types: Vec::new() }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let mut module: Module = serde_json::from_str(text)?;
        for f in module.functions.iter_mut() {
            f.refresh_counters();
        }
        Ok(module)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn add_function(&mut self, mut function: Function) -> FuncId {
        function.refresh_counters();
        self.functions.push(function);
        FuncId(self.functions.len() as u32 - 1)
    }

    pub fn add_global(&mut self, global: Global) -> GlobalId {
        self.globals.push(global);
        GlobalId(self.globals.len() as u32 - 1)
    }

    pub fn func_ids(&self) -> impl Iterator<Item = FuncId> + use<> {
        (0..self.functions.len() as u32).map(FuncId)
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn get_function(&self, id: FuncId) -> Option<&Function> {
        self.functions.get(id.0 as usize)
    }

    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.0 as usize]
    }

    pub fn named_function(&self, name: &str) -> Option<FuncId> {
        self.functions.iter().position(|f| f.name == name).map(|i| FuncId(i as u32))
    }

    pub fn named_global(&self, name: &str) -> Option<GlobalId> {
        self.globals.iter().position(|g| g.name == name).map(|i| GlobalId(i as u32))
    }

    pub fn inst(&self, at: &InstRef) -> Option<&Inst> {
        self.get_function(at.func)?.inst(at.inst)
    }

    /// Every instruction referring to `func`, in module order.
    pub fn uses_of_func(&self, func: FuncId) -> Vec<InstRef> {
        let mut uses = Vec::new();
        for (fi, f) in self.functions.iter().enumerate() {
            for block in f.blocks.iter() {
                for inst in block.insts.iter() {
                    if inst.op.func_refs().contains(&func) {
                        uses.push(InstRef { func: FuncId(fi as u32), block: block.id, inst: inst.id });
                    }
                }
            }
        }
        uses
    }

    pub fn uses_of_global(&self, global: GlobalId) -> Vec<InstRef> {
        let mut uses = Vec::new();
        for (fi, f) in self.functions.iter().enumerate() {
            for block in f.blocks.iter() {
                for inst in block.insts.iter() {
                    if inst.op.operands().iter().any(|o| matches!(o, Operand::Global(g) if *g == global)) {
                        uses.push(InstRef { func: FuncId(fi as u32), block: block.id, inst: inst.id });
                    }
                }
            }
        }
        uses
    }

    /// Look up a well-known runtime function, declaring it when absent.
    pub fn get_or_declare_runtime(&mut self, name: &str) -> Option<FuncId> {
        if let Some(id) = self.named_function(name) {
            return Some(id);
        }
        let sig = runtime::signature(name)?;
        let mut decl = Function::new(name, sig.params.clone(), sig.ret);
        decl.attrs.extend(sig.attrs.iter().copied());
        Some(self.add_function(decl))
    }

    /// Count instructions matching `pred` across the module.
    pub fn count_insts(&self, pred: impl Fn(&Inst) -> bool) -> usize {
        self.functions.iter().flat_map(|f| f.insts()).filter(|i| pred(i)).count()
    }

    /// Whether any dynamic-dispatch, function-value or task construct remains.
    pub fn has_high_level_constructs(&self) -> bool {
        self.count_insts(|i| i.op.is_high_level()) > 0
            || self.functions.iter().any(|f| {
                f.ret == Type::Iface
                    || f.ret == Type::FuncVal
                    || f.params.iter().any(|p| matches!(p, Type::Iface | Type::FuncVal))
            })
    }

    /// Drop functions for which `keep` returns false, renumbering every
    /// remaining `FuncId` reference. Callers make sure dropped functions are
    /// unreferenced.
    pub fn retain_functions(&mut self, keep: impl Fn(FuncId, &Function) -> bool) -> usize {
        let before = self.functions.len();
        let mut remap: HashMap<FuncId, FuncId> = HashMap::new();
        let mut kept: Vec<Function> = Vec::with_capacity(before);
        for (i, f) in self.functions.drain(..).enumerate() {
            let old = FuncId(i as u32);
            if keep(old, &f) {
                remap.insert(old, FuncId(kept.len() as u32));
                kept.push(f);
            }
        }
        let removed = before - kept.len();
        self.functions = kept;
        for f in self.functions.iter_mut() {
            for block in f.blocks.iter_mut() {
                for inst in block.insts.iter_mut() {
                    for r in inst.op.func_refs_mut() {
                        if let Some(new) = remap.get(r) {
                            *r = *new;
                        }
                    }
                }
            }
        }
        removed
    }

    /// Drop globals for which `keep` returns false, renumbering references.
    pub fn retain_globals(&mut self, keep: impl Fn(GlobalId, &Global) -> bool) -> usize {
        let before = self.globals.len();
        let mut remap: HashMap<GlobalId, GlobalId> = HashMap::new();
        let mut kept: Vec<Global> = Vec::with_capacity(before);
        for (i, g) in self.globals.drain(..).enumerate() {
            let old = GlobalId(i as u32);
            if keep(old, &g) {
                remap.insert(old, GlobalId(kept.len() as u32));
                kept.push(g);
            }
        }
        self.globals = kept;
        for f in self.functions.iter_mut() {
            for block in f.blocks.iter_mut() {
                for inst in block.insts.iter_mut() {
                    for operand in inst.op.operands_mut() {
                        if let Operand::Global(g) = operand {
                            if let Some(new) = remap.get(g) {
                                *g = *new;
                            }
                        }
                    }
                }
            }
        }
        before - self.globals.len()
    }
}
