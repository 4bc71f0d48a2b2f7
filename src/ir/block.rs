use serde::Serialize;

use super::inst::{BlockId, Inst};

#[derive(Debug, Clone, Serialize)]
pub struct Block {
    id: BlockId,
    label: String,
    instrs: Vec<Inst>,
}

impl Block {
    pub fn new(id: BlockId, label: String) -> Self {
        Self {
            id,
            label,
            instrs: vec![],
        }
    }

    pub fn get_id(&self) -> BlockId {
        self.id
    }

    pub fn get_label(&self) -> &str {
        &self.label
    }

    pub fn get_instrs(&self) -> &Vec<Inst> {
        &self.instrs
    }

    pub fn get_instrs_mut(&mut self) -> &mut Vec<Inst> {
        &mut self.instrs
    }

    pub fn push_instr(&mut self, instr: Inst) {
        self.instrs.push(instr);
    }

    pub fn terminator(&self) -> Option<&Inst> {
        self.instrs.last().filter(|i| i.is_terminator())
    }

    /// Split off everything from `at` onward into a new block. The
    /// original block keeps `[0, at)`.
    pub fn split_off(&mut self, at: usize, tail_id: BlockId, tail_label: String) -> Block {
        let rest = self.instrs.split_off(at);

        Block {
            id: tail_id,
            label: tail_label,
            instrs: rest,
        }
    }
}
