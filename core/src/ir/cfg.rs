//! Control-flow queries over a function body.

use std::collections::{HashMap, HashSet};

use super::module::{BlockId, Function};

/// Blocks in reverse post-order from the entry. Unreachable blocks are omitted.
pub fn reverse_post_order(func: &Function) -> Vec<BlockId> {
    let Some(entry) = func.entry() else {
        return Vec::new();
    };
    let mut visited: HashSet<BlockId> = HashSet::new();
    let mut post: Vec<BlockId> = Vec::new();
    // (block, next successor index)
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    visited.insert(entry);
    while let Some((block, idx)) = stack.pop() {
        let succs = func.block(block).map(|b| b.successors()).unwrap_or_default();
        if idx < succs.len() {
            stack.push((block, idx + 1));
            let next = succs[idx];
            if func.block(next).is_some() && visited.insert(next) {
                stack.push((next, 0));
            }
        } else {
            post.push(block);
        }
    }
    post.reverse();
    post
}

pub fn reachable(func: &Function) -> HashSet<BlockId> {
    reverse_post_order(func).into_iter().collect()
}

/// Immediate dominators of reachable blocks, after Cooper, Harvey and Kennedy.
pub struct DomTree {
    idom: HashMap<BlockId, BlockId>,
    order: HashMap<BlockId, usize>,
}

impl DomTree {
    pub fn compute(func: &Function) -> Self {
        let rpo = reverse_post_order(func);
        let order: HashMap<BlockId, usize> = rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let preds = func.predecessors();
        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        let Some(&entry) = rpo.first() else {
            return DomTree { idom, order };
        };
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for pred in preds.get(&block).into_iter().flatten() {
                    if !idom.contains_key(pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => *pred,
                        Some(cur) => intersect(&idom, &order, *pred, cur),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }
        DomTree { idom, order }
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.order.contains_key(&block)
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied().filter(|d| *d != block)
    }

    /// Whether `a` dominates `b`. Every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(next) => cur = next,
                None => return false,
            }
        }
    }
}

fn intersect(
    idom: &HashMap<BlockId, BlockId>,
    order: &HashMap<BlockId, usize>,
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while order[&a] > order[&b] {
            a = idom[&a];
        }
        while order[&b] > order[&a] {
            b = idom[&b];
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Op, Operand, Type};

    fn diamond() -> Function {
        let mut f = Function::new("diamond", vec![Type::I1], Type::Void);
        let b0 = f.add_block();
        let b1 = f.add_block();
        let b2 = f.add_block();
        let b3 = f.add_block();
        let b4 = f.add_block();
        f.push_inst(b0, Type::Void, Op::CondBr { cond: Operand::Arg(0), then_block: b1, else_block: b2 });
        f.push_inst(b1, Type::Void, Op::Br { target: b3 });
        f.push_inst(b2, Type::Void, Op::Br { target: b3 });
        f.push_inst(b3, Type::Void, Op::Ret { value: None });
        f.push_inst(b4, Type::Void, Op::Br { target: b3 });
        f
    }

    #[test]
    fn diamond_join_is_dominated_by_entry_only() {
        let f = diamond();
        let dom = DomTree::compute(&f);
        assert_eq!(dom.idom(BlockId(3)), Some(BlockId(0)));
        assert!(dom.dominates(BlockId(0), BlockId(3)));
        assert!(!dom.dominates(BlockId(1), BlockId(3)));
        assert!(dom.dominates(BlockId(2), BlockId(2)));
    }

    #[test]
    fn unreachable_blocks_are_excluded() {
        let f = diamond();
        let reach = reachable(&f);
        assert_eq!(reach.len(), 4);
        assert!(!reach.contains(&BlockId(4)));
        assert_eq!(reverse_post_order(&f).first(), Some(&BlockId(0)));
    }
}
