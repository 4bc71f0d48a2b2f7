mod error;

pub use error::InstrumentError;

use hashbrown::HashMap;

use crate::catalog::{Catalog, Mutation};
use crate::config::MAX_MUT_NUM_PER_LOCATION;
use crate::ir::{Block, BlockId, Func, Inst, IntTy, Module, Operand, Pred, Ty, ValueId};

/// Rewrites every mutable instruction into a dispatch call carrying the
/// `[from, to]` id range of its site. When no mutant is active the
/// rewritten function computes exactly what the original did.
pub fn instrument_module(module: &mut Module, catalog: &Catalog) -> Result<(), InstrumentError> {
    let by_func = catalog.by_func();

    // Callee signatures, for typing hoisted constant call arguments.
    let mut sigs: HashMap<String, Vec<Ty>> = HashMap::new();
    for func in module.get_funcs().iter() {
        let params = func.get_params().iter().map(|(_, ty)| *ty).collect();
        sigs.insert(func.get_name().to_string(), params);
    }

    for func in module.get_funcs_mut().iter_mut() {
        if func.get_name().starts_with("__") {
            continue;
        }

        let muts = match by_func.get(func.get_name()) {
            Some(muts) if !muts.is_empty() => muts,
            _ => continue,
        };

        FuncInstrumenter::new(func, &sigs).run(muts)?;
    }

    Ok(())
}

struct FuncInstrumenter<'a> {
    func: &'a mut Func,
    sigs: &'a HashMap<String, Vec<Ty>>,
    // Count of instructions this pass has inserted so far. Catalog
    // indices are pre-instrumentation, so the n-th original instruction
    // now lives at linear position n + instrumented_insts. Every
    // insertion path below must bump this by exactly what it added.
    instrumented_insts: usize,
}

impl<'a> FuncInstrumenter<'a> {
    fn new(func: &'a mut Func, sigs: &'a HashMap<String, Vec<Ty>>) -> Self {
        Self {
            func,
            sigs,
            instrumented_insts: 0,
        }
    }

    fn run(&mut self, muts: &[&Mutation]) -> Result<(), InstrumentError> {
        let mut i = 0;

        while i < muts.len() {
            let index = muts[i].index;
            let mut j = i + 1;
            while j < muts.len() && muts[j].index == index {
                j += 1;
            }

            self.instrument_site(&muts[i..j])?;
            i = j;
        }

        Ok(())
    }

    fn err_site(&self, index: u32) -> InstrumentError {
        InstrumentError::SiteNotFound {
            func: self.func.get_name().to_string(),
            index,
        }
    }

    fn instrument_site(&mut self, site: &[&Mutation]) -> Result<(), InstrumentError> {
        let index = site[0].index;
        let from = site.first().unwrap().id;
        let to = site.last().unwrap().id;

        if site.len() >= MAX_MUT_NUM_PER_LOCATION {
            return Err(InstrumentError::TooManyMutations {
                func: self.func.get_name().to_string(),
                index,
                count: site.len(),
            });
        }

        let (block_id, offset) = self
            .func
            .locate_linear(index as usize + self.instrumented_insts)
            .ok_or_else(|| self.err_site(index))?;

        let instr = self.func.get_block(block_id).get_instrs()[offset].clone();

        match instr {
            Inst::BinOp { dest, ty, lhs, rhs, .. } => {
                self.rewrite_binop(block_id, offset, dest, ty, lhs, rhs, from, to);
                Ok(())
            }
            Inst::ICmp { dest, ty, lhs, rhs, .. } => {
                self.rewrite_icmp(block_id, offset, dest, ty, lhs, rhs, from, to);
                Ok(())
            }
            Inst::Store { ty, val, addr } => {
                self.rewrite_store(block_id, offset, ty, val, addr, from, to);
                Ok(())
            }
            Inst::Call { dest, ret, callee, args } => {
                self.rewrite_call(block_id, offset, index, dest, ret, callee, args, from, to)
            }
            _ => Err(InstrumentError::WrongInstruction {
                func: self.func.get_name().to_string(),
                index,
            }),
        }
    }

    // %d = add i32 a, b   ==>   %d = call i32 @__process_i32_arith(from, to, a, b)
    #[allow(clippy::too_many_arguments)]
    fn rewrite_binop(
        &mut self,
        block_id: BlockId,
        offset: usize,
        dest: ValueId,
        ty: IntTy,
        lhs: Operand,
        rhs: Operand,
        from: u32,
        to: u32,
    ) {
        let call = Inst::Call {
            dest: Some(dest),
            ret: Ty::Int(ty),
            callee: format!("__process_{}_arith", ty.name()),
            args: vec![
                Operand::Const(from as i64),
                Operand::Const(to as i64),
                lhs,
                rhs,
            ],
        };

        self.func.get_block_mut(block_id).get_instrs_mut()[offset] = call;
    }

    // %d = icmp sgt i32 a, b   ==>
    //   %t = call i32 @__process_i32_cmp(from, to, a, b)
    //   %d = trunc %t to i1
    #[allow(clippy::too_many_arguments)]
    fn rewrite_icmp(
        &mut self,
        block_id: BlockId,
        offset: usize,
        dest: ValueId,
        ty: IntTy,
        lhs: Operand,
        rhs: Operand,
        from: u32,
        to: u32,
    ) {
        let wide = self.func.new_reg();

        let call = Inst::Call {
            dest: Some(wide),
            ret: Ty::Int(IntTy::I32),
            callee: format!("__process_{}_cmp", ty.name()),
            args: vec![
                Operand::Const(from as i64),
                Operand::Const(to as i64),
                lhs,
                rhs,
            ],
        };
        let trunc = Inst::Trunc {
            dest,
            to: Ty::I1,
            src: Operand::Reg(wide),
        };

        let instrs = self.func.get_block_mut(block_id).get_instrs_mut();
        instrs[offset] = call;
        instrs.insert(offset + 1, trunc);

        self.instrumented_insts += 1;
    }

    /// Hoist a constant through alloca + store + load so the value has
    /// a loadable address, returning the load's register.
    fn hoist_const(&mut self, block_id: BlockId, offset: usize, ty: IntTy, c: i64) -> ValueId {
        let slot = self.func.new_reg();
        let loaded = self.func.new_reg();

        let instrs = self.func.get_block_mut(block_id).get_instrs_mut();
        instrs.insert(offset, Inst::Alloca { dest: slot, ty });
        instrs.insert(
            offset + 1,
            Inst::Store {
                ty,
                val: Operand::Const(c),
                addr: Operand::Reg(slot),
            },
        );
        instrs.insert(
            offset + 2,
            Inst::Load {
                dest: loaded,
                ty,
                addr: Operand::Reg(slot),
            },
        );

        self.instrumented_insts += 3;
        loaded
    }

    // store i32 v, p   ==>
    //   %r = call i32 @__prepare_st_i32(from, to, v, p)
    //   %g = icmp ne i32 %r, 0
    //   condbr %g, st.then.N, st.end.N
    // st.then.N:           ; original store still required
    //   store i32 v, p
    //   br st.end.N
    // st.end.N:
    //   ...rest of the block
    #[allow(clippy::too_many_arguments)]
    fn rewrite_store(
        &mut self,
        block_id: BlockId,
        mut offset: usize,
        ty: IntTy,
        mut val: Operand,
        addr: Operand,
        from: u32,
        to: u32,
    ) {
        if let Some(c) = val.as_const() {
            let loaded = self.hoist_const(block_id, offset, ty, c);
            val = Operand::Reg(loaded);
            offset += 3;
        }

        let pre = self.func.new_reg();
        let guard = self.func.new_reg();
        let then_id = self.func.new_block_id();
        let cont_id = self.func.new_block_id();

        let block = self.func.get_block_mut(block_id);
        let mut rest = block.get_instrs_mut().split_off(offset);
        rest.remove(0);

        block.push_instr(Inst::Call {
            dest: Some(pre),
            ret: Ty::Int(IntTy::I32),
            callee: format!("__prepare_st_{}", ty.name()),
            args: vec![
                Operand::Const(from as i64),
                Operand::Const(to as i64),
                val,
                addr,
            ],
        });
        block.push_instr(Inst::ICmp {
            dest: guard,
            pred: Pred::Ne,
            ty: IntTy::I32,
            lhs: Operand::Reg(pre),
            rhs: Operand::Const(0),
        });
        block.push_instr(Inst::CondBr {
            cond: Operand::Reg(guard),
            then_dest: then_id,
            else_dest: cont_id,
        });

        // the retained original store, value operand rewritten to the
        // hoisted load when one was made
        let mut then_block = Block::new(then_id, format!("st.then.{}", then_id));
        then_block.push_instr(Inst::Store { ty, val, addr });
        then_block.push_instr(Inst::Br { target: cont_id });

        let mut cont_block = Block::new(cont_id, format!("st.end.{}", cont_id));
        for instr in rest {
            cont_block.push_instr(instr);
        }

        self.func.insert_block_after(block_id, then_block);
        self.func.insert_block_after(then_id, cont_block);
        self.func.replace_phi_pred(block_id, cont_id);

        self.instrumented_insts += 4;
    }

    // %d = call i32 @f(a, b)   ==>
    //   %p = call i32 @__prepare_call(from, to, n, tag, ptr, ...)
    //   %g = icmp eq i32 %p, 0
    //   condbr %g, call.then.N, call.else.N
    // call.then.N:          ; argument loads move in here
    //   %o = call i32 @f(a, b)
    //   br call.end.N
    // call.else.N:
    //   %s = call i32 @__stdcall_i32()
    //   br call.end.N
    // call.end.N:
    //   %d = phi i32 [ %o, call.then.N ], [ %s, call.else.N ]
    #[allow(clippy::too_many_arguments)]
    fn rewrite_call(
        &mut self,
        block_id: BlockId,
        mut offset: usize,
        index: u32,
        dest: Option<ValueId>,
        ret: Ty,
        callee: String,
        mut args: Vec<Operand>,
        from: u32,
        to: u32,
    ) -> Result<(), InstrumentError> {
        // Hoist constant integer arguments so every integer operand the
        // dispatcher may rewrite has an address.
        for i in 0..args.len() {
            if let Some(c) = args[i].as_const() {
                let ty = self.const_arg_ty(&callee, i);
                let loaded = self.hoist_const(block_id, offset, ty, c);
                args[i] = Operand::Reg(loaded);
                offset += 3;
            }
        }

        // Operand records: (type_tag << 8 | arg_index, address) per
        // integer argument. Integer arguments must be load results by
        // now; global addresses are pointer arguments and carry no
        // record.
        let mut records: Vec<(i64, Operand)> = vec![];
        for (i, arg) in args.iter().enumerate() {
            let reg = match arg {
                Operand::Reg(r) => *r,
                Operand::Global(_) => continue,
                Operand::Const(_) => {
                    return Err(InstrumentError::NotAPointer {
                        func: self.func.get_name().to_string(),
                        index,
                    });
                }
            };

            match self.defining_inst(reg) {
                Some(Inst::Load { ty, addr, .. }) => {
                    let tag = ((ty.type_tag() as i64) << 8) | i as i64;
                    records.push((tag, *addr));
                }
                Some(Inst::Alloca { .. }) => {
                    // pointer argument, nothing for the dispatcher
                }
                _ => {
                    return Err(InstrumentError::NotAPointer {
                        func: self.func.get_name().to_string(),
                        index,
                    });
                }
            }
        }

        let pre = self.func.new_reg();
        let guard = self.func.new_reg();
        let then_id = self.func.new_block_id();
        let else_id = self.func.new_block_id();
        let cont_id = self.func.new_block_id();

        let mut pre_args = vec![
            Operand::Const(from as i64),
            Operand::Const(to as i64),
            Operand::Const(records.len() as i64),
        ];
        for (tag, ptr) in records {
            pre_args.push(Operand::Const(tag));
            pre_args.push(ptr);
        }

        let arg_regs: Vec<ValueId> = args.iter().filter_map(|a| a.as_reg()).collect();

        let block = self.func.get_block_mut(block_id);
        let mut rest = block.get_instrs_mut().split_off(offset);
        let mut call = rest.remove(0);

        // the retained call must read hoisted constants through their
        // loads, so its operands match the records handed to the
        // dispatcher
        if let Inst::Call { args: call_args, .. } = &mut call {
            *call_args = args.clone();
        }

        // Move the argument-feeding loads into the guarded block so
        // they only run when the original call does.
        let mut moved = vec![];
        block.get_instrs_mut().retain(|instr| {
            let is_arg_load = matches!(
                instr,
                Inst::Load { dest, .. } if arg_regs.contains(dest)
            );
            if is_arg_load {
                moved.push(instr.clone());
            }
            !is_arg_load
        });

        block.push_instr(Inst::Call {
            dest: Some(pre),
            ret: Ty::Int(IntTy::I32),
            callee: "__prepare_call".to_string(),
            args: pre_args,
        });
        block.push_instr(Inst::ICmp {
            dest: guard,
            pred: Pred::Eq,
            ty: IntTy::I32,
            lhs: Operand::Reg(pre),
            rhs: Operand::Const(0),
        });
        block.push_instr(Inst::CondBr {
            cond: Operand::Reg(guard),
            then_dest: then_id,
            else_dest: else_id,
        });

        // then: original call (result into a fresh register when the
        // continuation needs a phi)
        let ori_reg = match dest {
            Some(_) => {
                let r = self.func.new_reg();
                if let Inst::Call { dest, .. } = &mut call {
                    *dest = Some(r);
                }
                Some(r)
            }
            None => None,
        };

        let mut then_block = Block::new(then_id, format!("call.then.{}", then_id));
        for ld in moved {
            then_block.push_instr(ld);
        }
        then_block.push_instr(call);
        then_block.push_instr(Inst::Br { target: cont_id });

        // else: fetch the substitute the dispatcher parked
        let sub_reg = dest.map(|_| self.func.new_reg());
        let std_callee = match ret {
            Ty::Int(ity) => format!("__stdcall_{}", ity.name()),
            _ => "__stdcall_void".to_string(),
        };

        let mut else_block = Block::new(else_id, format!("call.else.{}", else_id));
        else_block.push_instr(Inst::Call {
            dest: sub_reg,
            ret,
            callee: std_callee,
            args: vec![],
        });
        else_block.push_instr(Inst::Br { target: cont_id });

        let mut cont_block = Block::new(cont_id, format!("call.end.{}", cont_id));
        if let Some(d) = dest {
            cont_block.push_instr(Inst::Phi {
                dest: d,
                ty: ret,
                incomings: vec![
                    (then_id, Operand::Reg(ori_reg.unwrap())),
                    (else_id, Operand::Reg(sub_reg.unwrap())),
                ],
            });
        }
        for instr in rest {
            cont_block.push_instr(instr);
        }

        self.func.insert_block_after(block_id, then_block);
        self.func.insert_block_after(then_id, else_block);
        self.func.insert_block_after(else_id, cont_block);
        self.func.replace_phi_pred(block_id, cont_id);

        self.instrumented_insts += if dest.is_some() { 7 } else { 6 };
        Ok(())
    }

    fn defining_inst(&self, reg: ValueId) -> Option<&Inst> {
        for block in self.func.get_blocks().iter() {
            for instr in block.get_instrs().iter() {
                if instr.dest_reg() == Some(reg) {
                    return Some(instr);
                }
            }
        }

        None
    }

    fn const_arg_ty(&self, callee: &str, arg_index: usize) -> IntTy {
        match self.sigs.get(callee).and_then(|params| params.get(arg_index)) {
            Some(Ty::Int(ity)) => *ity,
            _ => IntTy::I64,
        }
    }
}
