//! file: core/src/ir/text/parse.rs
//! description: reads `.kir` text into a `Module`.
//!
//! Parsing happens in two passes over the pest tree. The first pass
//! creates globals, type descriptors and function headers so that symbol
//! references can be resolved in any order; the second pass fills in
//! function bodies.

use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;
use std::collections::BTreeMap;

use super::err::TextError;
use crate::ir::{
    Attribute, BinKind, Block, BlockId, Constant, FuncId, Function, Global, IcmpPred, Inst, InstId,
    Linkage, Module, Op, Operand, StackMap, Type, TypeDescriptor,
};
use crate::location::Location;

#[derive(Parser)]
#[grammar = "ir/text/kir.pest"]
pub struct KirParser;

/// Parse a module from text. `file` only feeds error locations.
pub fn parse_module(text: &str, file: &str) -> Result<Module, TextError> {
    let mut pairs = KirParser::parse(Rule::module, text).map_err(|e| TextError::from_pest(e, file))?;
    let reader = Reader { file };
    let root = match pairs.next() {
        Some(root) => root,
        None => return Err(TextError::new("empty input".into(), "kiln.ir.text.parse".into(), None)),
    };
    reader.read_module(root)
}

struct Reader<'f> {
    file: &'f str,
}

impl<'f> Reader<'f> {
    fn location(&self, pair: &Pair<Rule>) -> Location {
        let (line, column) = pair.as_span().start_pos().line_col();
        Location::new(self.file.to_string(), line, column)
    }

    fn error(&self, pair: &Pair<Rule>, message: String) -> TextError {
        TextError::new(message, "kiln.ir.text.parse".to_string(), Some(self.location(pair)))
    }

    fn next<'i>(&self, pairs: &mut Pairs<'i, Rule>, parent: &Pair<'i, Rule>) -> Result<Pair<'i, Rule>, TextError> {
        pairs
            .next()
            .ok_or_else(|| self.error(parent, format!("incomplete {:?}", parent.as_rule())))
    }

    fn read_module(&self, root: Pair<Rule>) -> Result<Module, TextError> {
        let mut inner = root.clone().into_inner();
        let name = self.next(&mut inner, &root)?.as_str().to_string();
        let mut module = Module::new(name);

        let mut type_defs = Vec::new();
        let mut bodies: Vec<(FuncId, Pair<Rule>)> = Vec::new();
        for item in inner {
            match item.as_rule() {
                Rule::global_def => {
                    let global = self.read_global(item)?;
                    module.add_global(global);
                }
                Rule::type_def => type_defs.push(item),
                Rule::function => {
                    let (func, body) = self.read_header(item)?;
                    let id = module.add_function(func);
                    if let Some(body) = body {
                        bodies.push((id, body));
                    }
                }
                Rule::EOI => {}
                other => return Err(self.error(&item, format!("unexpected {:?}", other))),
            }
        }

        for def in type_defs {
            let descriptor = self.read_type_def(&module, def)?;
            module.types.push(descriptor);
        }
        for (id, body) in bodies {
            let blocks = self.read_body(&module, body)?;
            let func = module.function_mut(id);
            func.blocks = blocks;
            func.refresh_counters();
        }
        Ok(module)
    }

    fn read_global(&self, pair: Pair<Rule>) -> Result<Global, TextError> {
        let mut inner = pair.clone().into_inner();
        let name = symbol_name(&self.next(&mut inner, &pair)?);
        let ty = self.read_type(self.next(&mut inner, &pair)?)?;
        let mut global = Global::new(name, ty, None);
        for part in inner {
            match part.as_rule() {
                Rule::constant => global.init = Some(self.read_constant(part)?),
                Rule::linkage => global.linkage = read_linkage(&part),
                Rule::const_flag => global.constant = true,
                other => return Err(self.error(&part, format!("unexpected {:?} in global", other))),
            }
        }
        Ok(global)
    }

    fn read_type_def(&self, module: &Module, pair: Pair<Rule>) -> Result<TypeDescriptor, TextError> {
        let mut inner = pair.clone().into_inner();
        let name = self.next(&mut inner, &pair)?.as_str().to_string();
        let mut methods = BTreeMap::new();
        for entry in inner {
            let mut parts = entry.clone().into_inner();
            let method = self.next(&mut parts, &entry)?.as_str().to_string();
            let target = self.next(&mut parts, &entry)?;
            let target_name = symbol_name(&target);
            if module.named_function(&target_name).is_none() {
                return Err(self.error(&target, format!("unknown function @{}", target_name)));
            }
            methods.insert(method, target_name);
        }
        Ok(TypeDescriptor { name, methods })
    }

    fn read_header<'i>(&self, pair: Pair<'i, Rule>) -> Result<(Function, Option<Pair<'i, Rule>>), TextError> {
        let mut inner = pair.clone().into_inner();
        let kind = self.next(&mut inner, &pair)?;
        let mut part = self.next(&mut inner, &pair)?;
        let mut linkage = Linkage::External;
        if part.as_rule() == Rule::linkage {
            linkage = read_linkage(&part);
            part = self.next(&mut inner, &pair)?;
        }
        let name = symbol_name(&part);

        let mut params = Vec::new();
        let mut part = self.next(&mut inner, &pair)?;
        if part.as_rule() == Rule::param_list {
            for ty in part.into_inner() {
                params.push(self.read_type(ty)?);
            }
            part = self.next(&mut inner, &pair)?;
        }
        let ret = self.read_type(part)?;

        let mut func = Function::new(name, params, ret);
        func.linkage = linkage;
        let mut body = None;
        for part in inner {
            match part.as_rule() {
                Rule::fn_attr => self.read_fn_attr(&mut func, part)?,
                Rule::body => body = Some(part),
                other => return Err(self.error(&part, format!("unexpected {:?} in function header", other))),
            }
        }
        let is_declare = kind.as_rule() == Rule::declare_kw;
        if let (true, Some(b)) = (is_declare, body.as_ref()) {
            return Err(self.error(b, format!("declaration @{} has a body", func.name)));
        }
        if !is_declare && body.is_none() {
            return Err(self.error(&kind, format!("definition @{} has no body", func.name)));
        }
        Ok((func, body))
    }

    fn read_fn_attr(&self, func: &mut Function, pair: Pair<Rule>) -> Result<(), TextError> {
        let attr = self.next(&mut pair.clone().into_inner(), &pair)?;
        match attr.as_rule() {
            Rule::attr_kw => {
                let parsed = match attr.as_str() {
                    "optsize" => Attribute::OptSize,
                    "readnone" => Attribute::ReadNone,
                    "readonly" => Attribute::ReadOnly,
                    "noyield" => Attribute::NoYield,
                    _ => Attribute::NoReturn,
                };
                func.attrs.insert(parsed);
            }
            Rule::attr_framesize => {
                let n = self.read_uint(self.next(&mut attr.clone().into_inner(), &attr)?)?;
                func.frame_size = Some(n);
            }
            Rule::attr_stackmap => {
                let n = self.read_uint(self.next(&mut attr.clone().into_inner(), &attr)?)?;
                func.stack_map = Some(StackMap { slots: n as u32 });
            }
            other => return Err(self.error(&attr, format!("unexpected {:?} attribute", other))),
        }
        Ok(())
    }

    fn read_body(&self, module: &Module, pair: Pair<Rule>) -> Result<Vec<Block>, TextError> {
        let mut blocks = Vec::new();
        // Void instructions carry no id in text; they are numbered after
        // the largest explicit id of the function.
        let mut pending: Vec<(usize, usize)> = Vec::new();
        let mut max_id: Option<u32> = None;

        for block_pair in pair.into_inner() {
            let mut inner = block_pair.clone().into_inner();
            let label = self.next(&mut inner, &block_pair)?;
            let mut block = Block::new(self.read_label(&label)?);
            for inst_pair in inner {
                let inst = self.next(&mut inst_pair.clone().into_inner(), &inst_pair)?;
                match inst.as_rule() {
                    Rule::valued_inst => {
                        let mut parts = inst.clone().into_inner();
                        let id = self.read_value_ref(&self.next(&mut parts, &inst)?)?;
                        let ty = self.read_type(self.next(&mut parts, &inst)?)?;
                        let op = self.read_op(module, self.next(&mut parts, &inst)?)?;
                        max_id = Some(max_id.map_or(id.0, |m| m.max(id.0)));
                        block.insts.push(Inst { id, ty, op });
                    }
                    _ => {
                        let op = self.read_op(module, self.next(&mut inst.clone().into_inner(), &inst)?)?;
                        pending.push((blocks.len(), block.insts.len()));
                        block.insts.push(Inst { id: InstId(0), ty: Type::Void, op });
                    }
                }
            }
            blocks.push(block);
        }

        let mut next = max_id.map_or(0, |m| m + 1);
        for (b, i) in pending {
            blocks[b].insts[i].id = InstId(next);
            next += 1;
        }
        Ok(blocks)
    }

    fn read_op(&self, module: &Module, pair: Pair<Rule>) -> Result<Op, TextError> {
        let rule = pair.as_rule();
        let mut inner = pair.clone().into_inner();
        let op = match rule {
            Rule::bin_op => {
                let kind = match self.next(&mut inner, &pair)?.as_str() {
                    "add" => BinKind::Add,
                    "sub" => BinKind::Sub,
                    "mul" => BinKind::Mul,
                    "and" => BinKind::And,
                    "or" => BinKind::Or,
                    _ => BinKind::Xor,
                };
                let lhs = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let rhs = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                Op::Bin { kind, lhs, rhs }
            }
            Rule::icmp_op => {
                let pred = match self.next(&mut inner, &pair)?.as_str() {
                    "eq" => IcmpPred::Eq,
                    "ne" => IcmpPred::Ne,
                    "slt" => IcmpPred::Slt,
                    "sle" => IcmpPred::Sle,
                    "sgt" => IcmpPred::Sgt,
                    _ => IcmpPred::Sge,
                };
                let lhs = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let rhs = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                Op::ICmp { pred, lhs, rhs }
            }
            Rule::bitcast_op => Op::Bitcast { value: self.read_operand(module, self.next(&mut inner, &pair)?)? },
            Rule::alloc_op => Op::Alloc { size: self.read_operand(module, self.next(&mut inner, &pair)?)? },
            Rule::stackalloc_op => Op::StackAlloc { size: self.read_uint(self.next(&mut inner, &pair)?)? },
            Rule::load_op => Op::Load { ptr: self.read_operand(module, self.next(&mut inner, &pair)?)? },
            Rule::store_op => {
                let ptr = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let value = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                Op::Store { ptr, value }
            }
            Rule::gep_op => {
                let ptr = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let offset = self.read_uint(self.next(&mut inner, &pair)?)?;
                Op::Gep { ptr, offset }
            }
            Rule::call_op => {
                let callee = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let args = self.read_operand_list(module, inner)?;
                Op::Call { callee, args }
            }
            Rule::trap_op => Op::Trap,
            Rule::framesize_op => Op::FrameSize { func: self.read_func_symbol(module, self.next(&mut inner, &pair)?)? },
            Rule::map_make_op => Op::MapMake,
            Rule::map_update_op => {
                let map = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let key = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let value = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                Op::MapUpdate { map, key, value }
            }
            Rule::map_lookup_op => {
                let map = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let key = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                Op::MapLookup { map, key }
            }
            Rule::string_tobytes_op => {
                Op::StringToBytes { value: self.read_operand(module, self.next(&mut inner, &pair)?)? }
            }
            Rule::iface_make_op => {
                let type_name = self.next(&mut inner, &pair)?.as_str().to_string();
                let value = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                Op::MakeInterface { type_name, value }
            }
            Rule::iface_invoke_op => {
                let receiver = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let method = self.next(&mut inner, &pair)?.as_str().to_string();
                let args = self.read_operand_list(module, inner)?;
                Op::InvokeMethod { receiver, method, args }
            }
            Rule::iface_assert_op => {
                let receiver = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let type_name = self.next(&mut inner, &pair)?.as_str().to_string();
                Op::TypeAssert { receiver, type_name }
            }
            Rule::func_make_op => {
                let func = self.read_func_symbol(module, self.next(&mut inner, &pair)?)?;
                let context = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                Op::MakeFuncValue { func, context }
            }
            Rule::func_call_op => {
                let callee = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let args = self.read_operand_list(module, inner)?;
                Op::CallFuncValue { callee, args }
            }
            Rule::spawn_op => {
                let func = self.read_func_symbol(module, self.next(&mut inner, &pair)?)?;
                let args = self.read_operand_list(module, inner)?;
                Op::Spawn { func, args }
            }
            Rule::yield_op => Op::Yield,
            Rule::ret_op => match inner.next() {
                Some(value) => Op::Ret { value: Some(self.read_operand(module, value)?) },
                None => Op::Ret { value: None },
            },
            Rule::br_op => Op::Br { target: self.read_label(&self.next(&mut inner, &pair)?)? },
            Rule::condbr_op => {
                let cond = self.read_operand(module, self.next(&mut inner, &pair)?)?;
                let then_block = self.read_label(&self.next(&mut inner, &pair)?)?;
                let else_block = self.read_label(&self.next(&mut inner, &pair)?)?;
                Op::CondBr { cond, then_block, else_block }
            }
            Rule::unreachable_op => Op::Unreachable,
            other => return Err(self.error(&pair, format!("unexpected {:?} instruction", other))),
        };
        Ok(op)
    }

    fn read_operand_list(&self, module: &Module, mut rest: Pairs<Rule>) -> Result<Vec<Operand>, TextError> {
        match rest.next() {
            Some(list) => list.into_inner().map(|o| self.read_operand(module, o)).collect(),
            None => Ok(Vec::new()),
        }
    }

    fn read_operand(&self, module: &Module, pair: Pair<Rule>) -> Result<Operand, TextError> {
        let inner = self.next(&mut pair.clone().into_inner(), &pair)?;
        match inner.as_rule() {
            Rule::value_ref => Ok(Operand::Inst(self.read_value_ref(&inner)?)),
            Rule::arg_ref => {
                let index = inner.as_str()[1..]
                    .parse::<u32>()
                    .map_err(|e| self.error(&inner, format!("bad argument index: {}", e)))?;
                Ok(Operand::Arg(index))
            }
            Rule::symbol => {
                let name = symbol_name(&inner);
                if let Some(f) = module.named_function(&name) {
                    Ok(Operand::Func(f))
                } else if let Some(g) = module.named_global(&name) {
                    Ok(Operand::Global(g))
                } else {
                    Err(self.error(&inner, format!("unknown symbol @{}", name)))
                }
            }
            _ => Ok(Operand::Const(self.read_constant(inner)?)),
        }
    }

    fn read_func_symbol(&self, module: &Module, pair: Pair<Rule>) -> Result<FuncId, TextError> {
        let name = symbol_name(&pair);
        module
            .named_function(&name)
            .ok_or_else(|| self.error(&pair, format!("unknown function @{}", name)))
    }

    fn read_constant(&self, pair: Pair<Rule>) -> Result<Constant, TextError> {
        let c = self.next(&mut pair.clone().into_inner(), &pair)?;
        match c.as_rule() {
            Rule::int_const => {
                let mut parts = c.clone().into_inner();
                let digits = self.next(&mut parts, &c)?;
                let value = digits
                    .as_str()
                    .parse::<i64>()
                    .map_err(|e| self.error(&digits, format!("bad integer: {}", e)))?;
                let ty = self.read_type(self.next(&mut parts, &c)?)?;
                if !ty.is_int() {
                    return Err(self.error(&c, format!("integer constant of type {}", ty)));
                }
                Ok(Constant::int(ty, value))
            }
            Rule::bool_const => Ok(Constant::bool(c.as_str() == "true")),
            Rule::null_const => Ok(Constant::Null),
            Rule::undef_const => {
                let ty = self.read_type(self.next(&mut c.clone().into_inner(), &c)?)?;
                Ok(Constant::Undef(ty))
            }
            Rule::bytes_const => {
                let hex = self.next(&mut c.clone().into_inner(), &c)?;
                let text = hex.as_str();
                if text.len() % 2 != 0 {
                    return Err(self.error(&hex, "odd number of hex digits".to_string()));
                }
                let bytes = (0..text.len())
                    .step_by(2)
                    .map(|i| u8::from_str_radix(&text[i..i + 2], 16))
                    .collect::<Result<Vec<u8>, _>>()
                    .map_err(|e| self.error(&hex, format!("bad hex byte: {}", e)))?;
                Ok(Constant::Bytes(bytes))
            }
            other => Err(self.error(&c, format!("unexpected {:?} constant", other))),
        }
    }

    fn read_type(&self, pair: Pair<Rule>) -> Result<Type, TextError> {
        let inner = self.next(&mut pair.clone().into_inner(), &pair)?;
        match inner.as_rule() {
            Rule::bytes_ty => {
                let n = self.read_uint(self.next(&mut inner.clone().into_inner(), &inner)?)?;
                Ok(Type::Bytes(n as u32))
            }
            _ => Ok(match inner.as_str() {
                "void" => Type::Void,
                "i1" => Type::I1,
                "i8" => Type::I8,
                "i32" => Type::I32,
                "i64" => Type::I64,
                "ptr" => Type::Ptr,
                "iface" => Type::Iface,
                _ => Type::FuncVal,
            }),
        }
    }

    fn read_uint(&self, pair: Pair<Rule>) -> Result<u64, TextError> {
        pair.as_str()
            .parse::<u64>()
            .map_err(|e| self.error(&pair, format!("bad number: {}", e)))
    }

    fn read_label(&self, pair: &Pair<Rule>) -> Result<BlockId, TextError> {
        pair.as_str()[2..]
            .parse::<u32>()
            .map(BlockId)
            .map_err(|e| self.error(pair, format!("bad block label: {}", e)))
    }

    fn read_value_ref(&self, pair: &Pair<Rule>) -> Result<InstId, TextError> {
        pair.as_str()[1..]
            .parse::<u32>()
            .map(InstId)
            .map_err(|e| self.error(pair, format!("bad value id: {}", e)))
    }
}

fn symbol_name(pair: &Pair<Rule>) -> String {
    pair.as_str().trim_start_matches('@').to_string()
}

fn read_linkage(pair: &Pair<Rule>) -> Linkage {
    if pair.as_str() == "internal" { Linkage::Internal } else { Linkage::External }
}
