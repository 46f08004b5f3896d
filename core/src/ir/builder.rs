use super::module::{Attribute, BlockId, Function, InstId, Linkage};
use super::op::{BinKind, IcmpPred, Op};
use super::value::{Operand, Type};

/// A per-function construction helper: owns the function under
/// construction and an insertion block. Call `finish` to get the function.
pub struct FunctionBuilder {
    func: Function,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        FunctionBuilder { func: Function::new(name, params, ret), current: None }
    }

    pub fn linkage(mut self, linkage: Linkage) -> Self {
        self.func.linkage = linkage;
        self
    }

    pub fn attr(mut self, attr: Attribute) -> Self {
        self.func.attrs.insert(attr);
        self
    }

    /// Create a block and make it the insertion point.
    pub fn block(&mut self) -> BlockId {
        let id = self.func.add_block();
        self.current = Some(id);
        id
    }

    /// Create a block without moving the insertion point.
    pub fn new_block(&mut self) -> BlockId {
        self.func.add_block()
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    pub fn emit(&mut self, ty: Type, op: Op) -> InstId {
        let block = match self.current {
            Some(b) => b,
            None => self.block(),
        };
        self.func.push_inst(block, ty, op)
    }

    pub fn bin(&mut self, kind: BinKind, ty: Type, lhs: Operand, rhs: Operand) -> Operand {
        self.emit(ty, Op::Bin { kind, lhs, rhs }).into()
    }

    pub fn icmp(&mut self, pred: IcmpPred, lhs: Operand, rhs: Operand) -> Operand {
        self.emit(Type::I1, Op::ICmp { pred, lhs, rhs }).into()
    }

    pub fn alloc(&mut self, size: u64) -> Operand {
        self.emit(Type::Ptr, Op::Alloc { size: Operand::int(Type::I64, size as i64) }).into()
    }

    pub fn load(&mut self, ty: Type, ptr: Operand) -> Operand {
        self.emit(ty, Op::Load { ptr }).into()
    }

    pub fn store(&mut self, ptr: Operand, value: Operand) {
        self.emit(Type::Void, Op::Store { ptr, value });
    }

    pub fn gep(&mut self, ptr: Operand, offset: u64) -> Operand {
        if offset == 0 {
            return ptr;
        }
        self.emit(Type::Ptr, Op::Gep { ptr, offset }).into()
    }

    pub fn call(&mut self, ret: Type, callee: Operand, args: Vec<Operand>) -> InstId {
        self.emit(ret, Op::Call { callee, args })
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.emit(Type::Void, Op::Ret { value });
    }

    pub fn br(&mut self, target: BlockId) {
        self.emit(Type::Void, Op::Br { target });
    }

    pub fn cond_br(&mut self, cond: Operand, then_block: BlockId, else_block: BlockId) {
        self.emit(Type::Void, Op::CondBr { cond, then_block, else_block });
    }

    pub fn unreachable(&mut self) {
        self.emit(Type::Void, Op::Unreachable);
    }

    pub fn finish(self) -> Function {
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_places_instructions_in_current_block() {
        let mut b = FunctionBuilder::new("f", vec![Type::I64], Type::I64).linkage(Linkage::Internal);
        let entry = b.block();
        let exit = b.new_block();
        let sum = b.bin(BinKind::Add, Type::I64, Operand::Arg(0), Operand::int(Type::I64, 1));
        b.br(exit);
        b.switch_to(exit);
        b.ret(Some(sum));
        let f = b.finish();

        assert_eq!(f.linkage, Linkage::Internal);
        assert_eq!(f.block(entry).map(|b| b.insts.len()), Some(2));
        assert!(f.block(exit).and_then(|b| b.terminator()).is_some());
        assert_eq!(f.inst_count(), 3);
    }

    #[test]
    fn zero_offset_gep_is_folded() {
        let mut b = FunctionBuilder::new("g", vec![Type::Ptr], Type::Void);
        b.block();
        let p = b.gep(Operand::Arg(0), 0);
        assert_eq!(p, Operand::Arg(0));
        b.ret(None);
        assert_eq!(b.finish().inst_count(), 1);
    }
}
