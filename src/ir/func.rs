use serde::Serialize;

use super::block::Block;
use super::inst::{BlockId, Inst, ValueId};
use super::ty::Ty;

#[derive(Debug, Clone, Serialize)]
pub struct Func {
    name: String,
    params: Vec<(ValueId, Ty)>,
    ret: Ty,
    blocks: Vec<Block>,
    value_counter: ValueId,
    block_counter: BlockId,
}

impl Func {
    pub fn new(name: String, params: Vec<(ValueId, Ty)>, ret: Ty) -> Self {
        Self {
            name,
            params,
            ret,
            blocks: vec![],
            value_counter: 0,
            block_counter: 0,
        }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_params(&self) -> &Vec<(ValueId, Ty)> {
        &self.params
    }

    pub fn get_ret(&self) -> Ty {
        self.ret
    }

    pub fn get_blocks(&self) -> &Vec<Block> {
        &self.blocks
    }

    pub fn get_blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.blocks
    }

    pub fn get_entry_block(&self) -> &Block {
        self.blocks.first().expect("function has no blocks")
    }

    pub fn get_block(&self, block_id: BlockId) -> &Block {
        self.try_get_block(block_id).expect("unknown block id")
    }

    pub fn try_get_block(&self, block_id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|block| block.get_id() == block_id)
    }

    pub fn get_block_mut(&mut self, block_id: BlockId) -> &mut Block {
        self.try_get_block_mut(block_id).expect("unknown block id")
    }

    pub fn try_get_block_mut(&mut self, block_id: BlockId) -> Option<&mut Block> {
        self.blocks
            .iter_mut()
            .find(|block| block.get_id() == block_id)
    }

    pub fn new_reg(&mut self) -> ValueId {
        let r = self.value_counter;
        self.value_counter += 1;
        r
    }

    pub fn set_value_counter(&mut self, n: ValueId) {
        if n > self.value_counter {
            self.value_counter = n;
        }
    }

    pub fn new_block_id(&mut self) -> BlockId {
        let id = self.block_counter;
        self.block_counter += 1;
        id
    }

    pub fn set_block_counter(&mut self, n: BlockId) {
        if n > self.block_counter {
            self.block_counter = n;
        }
    }

    pub fn push_block(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Insert `block` immediately after the block with id `after`,
    /// preserving the linear enumeration order around it.
    pub fn insert_block_after(&mut self, after: BlockId, block: Block) {
        let pos = self
            .blocks
            .iter()
            .position(|b| b.get_id() == after)
            .expect("unknown block id");

        self.blocks.insert(pos + 1, block);
    }

    /// Number of instructions in the linear enumeration.
    pub fn linear_len(&self) -> usize {
        self.blocks.iter().map(|b| b.get_instrs().len()).sum()
    }

    /// Map a linear instruction position onto `(block_id, offset)`.
    pub fn locate_linear(&self, n: usize) -> Option<(BlockId, usize)> {
        let mut cur = 0;

        for block in self.blocks.iter() {
            let len = block.get_instrs().len();
            if n < cur + len {
                return Some((block.get_id(), n - cur));
            }
            cur += len;
        }

        None
    }

    /// Rewrite phi incomings naming `old` as their predecessor to name
    /// `new` instead. Needed after a block split moves a terminator.
    pub fn replace_phi_pred(&mut self, old: BlockId, new: BlockId) {
        for block in self.blocks.iter_mut() {
            for instr in block.get_instrs_mut().iter_mut() {
                if let Inst::Phi { incomings, .. } = instr {
                    for (pred, _) in incomings.iter_mut() {
                        if *pred == old {
                            *pred = new;
                        }
                    }
                }
            }
        }
    }
}
