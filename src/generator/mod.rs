use crate::catalog::{Catalog, MutKind, Mutation};
use crate::ir::{Func, Inst, IntTy, Module, OpFamily, Opcode, Operand, Pred, Ty, CALL_OP_TAG, STORE_OP_TAG};

/// Walks IR and emits the complete candidate-mutation set, one catalog
/// entry per candidate. Ids are dense and module-global; all mutations
/// of one instruction are emitted before moving to the next, so each
/// site owns a contiguous id run.
pub struct MutationGen {
    next_id: u32,
    muts: Vec<Mutation>,
}

impl MutationGen {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            muts: vec![],
        }
    }

    pub fn run_on_module(&mut self, module: &Module) {
        for func in module.get_funcs().iter() {
            self.run_on_func(func);
        }
    }

    pub fn run_on_func(&mut self, func: &Func) {
        // Never mutate the runtime's own entry points.
        if func.get_name().starts_with("__") {
            return;
        }

        let mut index = 0u32;
        for block in func.get_blocks().iter() {
            for instr in block.get_instrs().iter() {
                self.gen_for_inst(func.get_name(), index, instr);
                index += 1;
            }
        }
    }

    pub fn mutations(&self) -> &Vec<Mutation> {
        &self.muts
    }

    pub fn into_catalog(self) -> Catalog {
        Catalog::from_mutations(self.muts)
    }

    // Kinds are emitted in the fixed order AOR, LOR, ROR, SOR, COR,
    // STD, LVR so a site's run is deterministic.
    fn gen_for_inst(&mut self, fname: &str, index: u32, instr: &Inst) {
        match instr {
            Inst::BinOp { op, lhs, rhs, .. } => {
                match op.family() {
                    OpFamily::Numeric | OpFamily::Shift => self.gen_aor(fname, index, *op),
                    OpFamily::Logical => self.gen_lor(fname, index, *op),
                }
                self.gen_sor();
                self.gen_cor();
                self.gen_lvr(fname, index, op.tag(), &[*lhs, *rhs]);
            }
            Inst::ICmp { pred, lhs, rhs, .. } => {
                self.gen_ror(fname, index, *pred);
                self.gen_lvr(fname, index, pred.tag(), &[*lhs, *rhs]);
            }
            Inst::Store { val, .. } => {
                if val.is_const() {
                    self.gen_lvr(fname, index, STORE_OP_TAG, &[*val]);
                }
            }
            Inst::Call { ret, callee, .. } => {
                if !callee.starts_with("__") {
                    self.gen_std(fname, index, *ret);
                }
            }
            _ => {}
        }
    }

    fn emit(&mut self, fname: &str, index: u32, kind: MutKind) {
        let id = self.next_id;
        self.next_id += 1;

        self.muts.push(Mutation {
            id,
            func: fname.to_string(),
            index,
            kind,
        });
    }

    /// Arithmetic-operator replacement within the opcode's family, in
    /// replacement-tag order.
    fn gen_aor(&mut self, fname: &str, index: u32, op: Opcode) {
        for t_op in op.family_members() {
            if *t_op == op {
                continue;
            }

            self.emit(fname, index, MutKind::Aor { s_op: op, t_op: *t_op });
        }
    }

    /// Logical-operator replacement among and/or/xor.
    fn gen_lor(&mut self, fname: &str, index: u32, op: Opcode) {
        for t_op in op.family_members() {
            if *t_op == op {
                continue;
            }

            self.emit(fname, index, MutKind::Lor { s_op: op, t_op: *t_op });
        }
    }

    /// Relational-operator replacement within the predicate's
    /// signedness class; cross-class replacements are never emitted.
    fn gen_ror(&mut self, fname: &str, index: u32, pred: Pred) {
        for t_pre in pred.class_members() {
            if *t_pre == pred {
                continue;
            }

            self.emit(
                fname,
                index,
                MutKind::Ror {
                    op: crate::ir::ICMP_OP_TAG,
                    s_pre: pred,
                    t_pre: *t_pre,
                },
            );
        }
    }

    /// Reserved: shift-operator replacement is not part of the current
    /// taxonomy (shift opcodes are covered by AOR's shift family).
    fn gen_sor(&mut self) {}

    /// Reserved: conditional-operator replacement.
    fn gen_cor(&mut self) {}

    /// Statement deletion of a call with a void/i32/i64 return.
    fn gen_std(&mut self, fname: &str, index: u32, ret: Ty) {
        let f_tp = match ret {
            Ty::Void | Ty::Int(IntTy::I32) | Ty::Int(IntTy::I64) => {
                ret.type_tag().expect("call return type has a tag")
            }
            _ => return,
        };

        self.emit(fname, index, MutKind::Std { op: CALL_OP_TAG, f_tp });
    }

    /// Literal-value replacement for each constant integer operand.
    /// `site_tag` is what the record persists in its `op` field: the
    /// opcode at arithmetic sites, the predicate at comparison sites,
    /// the store tag at store sites.
    fn gen_lvr(&mut self, fname: &str, index: u32, site_tag: i32, operands: &[Operand]) {
        for (op_index, operand) in operands.iter().enumerate() {
            let s_con = match operand.as_const() {
                Some(c) => c,
                None => continue,
            };

            for t_con in lvr_candidates(s_con) {
                self.emit(
                    fname,
                    index,
                    MutKind::Lvr {
                        op: site_tag,
                        op_index: op_index as u32,
                        s_con,
                        t_con,
                    },
                );
            }
        }
    }
}

impl Default for MutationGen {
    fn default() -> Self {
        Self::new()
    }
}

/// `{c-1, c+1, 0, 1, -1}`, duplicates and the original value removed,
/// in that order.
fn lvr_candidates(c: i64) -> Vec<i64> {
    let mut out = vec![];

    for cand in [c.wrapping_sub(1), c.wrapping_add(1), 0, 1, -1] {
        if cand != c && !out.contains(&cand) {
            out.push(cand);
        }
    }

    out
}
