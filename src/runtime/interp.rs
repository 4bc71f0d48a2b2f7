use std::io::Write;

use hashbrown::HashMap;

use crate::ir::{BlockId, Func, Inst, IntTy, Module, Operand, Ty, ValueId};

use super::ctx::RuntimeCtx;
use super::error::RuntimeError;
use super::eval::{cal_i32_arith, cal_i32_bool, cal_i64_arith, cal_i64_bool};

/// Flat integer memory: allocas and globals are one cell each,
/// addressed by index. Cells store sign-extended i64; width is applied
/// by the access.
pub struct Mem {
    cells: Vec<i64>,
}

impl Mem {
    pub fn new() -> Self {
        Self { cells: vec![] }
    }

    pub fn alloc(&mut self) -> i64 {
        self.cells.push(0);
        (self.cells.len() - 1) as i64
    }

    fn cell(&self, addr: i64) -> Result<usize, RuntimeError> {
        let idx = addr as usize;
        if addr < 0 || idx >= self.cells.len() {
            return Err(RuntimeError::BadAddress(addr));
        }

        Ok(idx)
    }

    pub fn load_i32(&self, addr: i64) -> Result<i32, RuntimeError> {
        Ok(self.cells[self.cell(addr)?] as i32)
    }

    pub fn load_i64(&self, addr: i64) -> Result<i64, RuntimeError> {
        Ok(self.cells[self.cell(addr)?])
    }

    pub fn store_i32(&mut self, addr: i64, v: i32) -> Result<(), RuntimeError> {
        let idx = self.cell(addr)?;
        self.cells[idx] = v as i64;
        Ok(())
    }

    pub fn store_i64(&mut self, addr: i64, v: i64) -> Result<(), RuntimeError> {
        let idx = self.cell(addr)?;
        self.cells[idx] = v;
        Ok(())
    }
}

impl Default for Mem {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes a module from `@main`. Calls into `__`-prefixed entry
/// points are routed to the runtime context; everything else resolves
/// to module functions or the printing builtins.
pub struct Interp<'a> {
    module: &'a Module,
    ctx: Option<&'a mut RuntimeCtx>,
    mem: Mem,
    out: Box<dyn Write>,
}

impl<'a> Interp<'a> {
    pub fn new(module: &'a Module, ctx: Option<&'a mut RuntimeCtx>, out: Box<dyn Write>) -> Self {
        let mut mem = Mem::new();

        // globals occupy the first cells, in declaration order
        for g in module.get_globals().iter() {
            let addr = mem.alloc();
            mem.store_i64(addr, g.init).expect("fresh cell");
        }

        Self {
            module,
            ctx,
            mem,
            out,
        }
    }

    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let module = self.module;
        let main = module.get_func("main").ok_or(RuntimeError::NoMain)?;
        self.call_func(main, &[])?;
        Ok(())
    }

    pub fn mem(&self) -> &Mem {
        &self.mem
    }

    pub fn global_addr(&self, name: &str) -> Option<i64> {
        self.module
            .get_globals()
            .iter()
            .position(|g| g.name == name)
            .map(|i| i as i64)
    }

    /// True when a fork inside a dispatch call made this process a
    /// mutant child; the embedding driver must exit instead of
    /// returning control to its caller.
    pub fn is_forked_child(&self) -> bool {
        self.ctx.as_ref().map(|c| c.is_forked()).unwrap_or(false)
    }

    fn operand(
        &self,
        regs: &HashMap<ValueId, i64>,
        op: &Operand,
    ) -> Result<i64, RuntimeError> {
        match op {
            Operand::Reg(r) => regs.get(r).copied().ok_or(RuntimeError::UndefinedRegister(*r)),
            Operand::Const(c) => Ok(*c),
            Operand::Global(g) => Ok(*g as i64),
        }
    }

    fn call_func(&mut self, func: &'a Func, args: &[i64]) -> Result<Option<i64>, RuntimeError> {
        let mut regs: HashMap<ValueId, i64> = HashMap::new();
        for ((id, _), v) in func.get_params().iter().zip(args.iter()) {
            regs.insert(*id, *v);
        }

        let mut block = func.get_entry_block();
        let mut prev: Option<BlockId> = None;
        let mut ip = 0usize;

        loop {
            let instr = block.get_instrs().get(ip).ok_or_else(|| {
                RuntimeError::BadDispatch(format!(
                    "@{}: fell off the end of block {}",
                    func.get_name(),
                    block.get_label()
                ))
            })?;

            match instr {
                Inst::Alloca { dest, .. } => {
                    let addr = self.mem.alloc();
                    regs.insert(*dest, addr);
                    ip += 1;
                }
                Inst::Load { dest, ty, addr } => {
                    let addr = self.operand(&regs, addr)?;
                    let v = match ty {
                        IntTy::I32 => self.mem.load_i32(addr)? as i64,
                        IntTy::I64 => self.mem.load_i64(addr)?,
                    };
                    regs.insert(*dest, v);
                    ip += 1;
                }
                Inst::Store { ty, val, addr } => {
                    let v = self.operand(&regs, val)?;
                    let addr = self.operand(&regs, addr)?;
                    match ty {
                        IntTy::I32 => self.mem.store_i32(addr, v as i32)?,
                        IntTy::I64 => self.mem.store_i64(addr, v)?,
                    }
                    ip += 1;
                }
                Inst::BinOp { dest, op, ty, lhs, rhs } => {
                    let l = self.operand(&regs, lhs)?;
                    let r = self.operand(&regs, rhs)?;
                    let v = match ty {
                        IntTy::I32 => cal_i32_arith(op.tag(), l as i32, r as i32)? as i64,
                        IntTy::I64 => cal_i64_arith(op.tag(), l, r)?,
                    };
                    regs.insert(*dest, v);
                    ip += 1;
                }
                Inst::ICmp { dest, pred, ty, lhs, rhs } => {
                    let l = self.operand(&regs, lhs)?;
                    let r = self.operand(&regs, rhs)?;
                    let v = match ty {
                        IntTy::I32 => cal_i32_bool(pred.tag(), l as i32, r as i32)?,
                        IntTy::I64 => cal_i64_bool(pred.tag(), l, r)?,
                    };
                    regs.insert(*dest, v as i64);
                    ip += 1;
                }
                Inst::Trunc { dest, to, src } => {
                    let v = self.operand(&regs, src)?;
                    let v = match to {
                        Ty::I1 => v & 1,
                        Ty::Int(IntTy::I32) => v as i32 as i64,
                        _ => v,
                    };
                    regs.insert(*dest, v);
                    ip += 1;
                }
                Inst::Call { dest, callee, args, .. } => {
                    let mut vals = Vec::with_capacity(args.len());
                    for a in args.iter() {
                        vals.push(self.operand(&regs, a)?);
                    }

                    let res = self.do_call(callee, &vals)?;
                    if let Some(d) = dest {
                        let v = res.ok_or_else(|| {
                            RuntimeError::BadDispatch(format!(
                                "@{} returned no value",
                                callee
                            ))
                        })?;
                        regs.insert(*d, v);
                    }
                    ip += 1;
                }
                Inst::Br { target } => {
                    prev = Some(block.get_id());
                    block = func.get_block(*target);
                    ip = 0;
                }
                Inst::CondBr { cond, then_dest, else_dest } => {
                    let c = self.operand(&regs, cond)?;
                    prev = Some(block.get_id());
                    block = func.get_block(if c != 0 { *then_dest } else { *else_dest });
                    ip = 0;
                }
                Inst::Phi { dest, incomings, .. } => {
                    let p = prev.ok_or_else(|| {
                        RuntimeError::BadDispatch("phi in an entry block".to_string())
                    })?;
                    let (_, op) = incomings.iter().find(|(b, _)| *b == p).ok_or_else(|| {
                        RuntimeError::BadDispatch("phi has no incoming for predecessor".to_string())
                    })?;
                    let v = self.operand(&regs, op)?;
                    regs.insert(*dest, v);
                    ip += 1;
                }
                Inst::Ret { val } => {
                    return match val {
                        Some(op) => Ok(Some(self.operand(&regs, op)?)),
                        None => Ok(None),
                    };
                }
            }
        }
    }

    fn do_call(&mut self, callee: &str, args: &[i64]) -> Result<Option<i64>, RuntimeError> {
        if callee.starts_with("__") {
            return self.runtime_call(callee, args);
        }

        let module = self.module;
        if let Some(func) = module.get_func(callee) {
            return self.call_func(func, args);
        }

        match callee {
            "print_i32" => {
                let v = args.first().copied().unwrap_or(0) as i32;
                writeln!(self.out, "{}", v)?;
                self.out.flush()?;
                Ok(None)
            }
            "print_i64" => {
                let v = args.first().copied().unwrap_or(0);
                writeln!(self.out, "{}", v)?;
                self.out.flush()?;
                Ok(None)
            }
            _ => Err(RuntimeError::UnknownFunction(callee.to_string())),
        }
    }

    fn runtime_call(&mut self, name: &str, args: &[i64]) -> Result<Option<i64>, RuntimeError> {
        let arg = |i: usize| -> Result<i64, RuntimeError> {
            args.get(i).copied().ok_or_else(|| {
                RuntimeError::BadDispatch(format!("@{}: missing argument {}", name, i))
            })
        };

        let ctx = match self.ctx.as_deref_mut() {
            Some(ctx) => ctx,
            None => return Err(RuntimeError::NoRuntimeCtx),
        };

        match name {
            "__process_i32_arith" => {
                let v = ctx.process_i32_arith(
                    arg(0)? as u32,
                    arg(1)? as u32,
                    arg(2)? as i32,
                    arg(3)? as i32,
                )?;
                Ok(Some(v as i64))
            }
            "__process_i64_arith" => {
                let v = ctx.process_i64_arith(arg(0)? as u32, arg(1)? as u32, arg(2)?, arg(3)?)?;
                Ok(Some(v))
            }
            "__process_i32_cmp" => {
                let v = ctx.process_i32_cmp(
                    arg(0)? as u32,
                    arg(1)? as u32,
                    arg(2)? as i32,
                    arg(3)? as i32,
                )?;
                Ok(Some(v as i64))
            }
            "__process_i64_cmp" => {
                let v = ctx.process_i64_cmp(arg(0)? as u32, arg(1)? as u32, arg(2)?, arg(3)?)?;
                Ok(Some(v as i64))
            }
            "__prepare_st_i32" => {
                let v = ctx.prepare_st_i32(
                    arg(0)? as u32,
                    arg(1)? as u32,
                    arg(2)? as i32,
                    arg(3)?,
                    &mut self.mem,
                )?;
                Ok(Some(v as i64))
            }
            "__prepare_st_i64" => {
                let v = ctx.prepare_st_i64(
                    arg(0)? as u32,
                    arg(1)? as u32,
                    arg(2)?,
                    arg(3)?,
                    &mut self.mem,
                )?;
                Ok(Some(v as i64))
            }
            "__prepare_call" => {
                let records = arg(2)? as usize;
                if args.len() != 3 + 2 * records {
                    return Err(RuntimeError::BadDispatch(
                        "prepare_call record count does not match arguments".to_string(),
                    ));
                }

                let v = ctx.prepare_call(arg(0)? as u32, arg(1)? as u32)?;
                Ok(Some(v as i64))
            }
            "__stdcall_i32" => Ok(Some(ctx.stdcall_i32()? as i64)),
            "__stdcall_i64" => Ok(Some(ctx.stdcall_i64()?)),
            "__stdcall_void" => {
                ctx.stdcall_void()?;
                Ok(None)
            }
            _ => Err(RuntimeError::UnknownFunction(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::generator::MutationGen;
    use crate::instrumenter::instrument_module;
    use crate::parser::parse_module;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl SharedBuf {
        fn new() -> Self {
            Self(Rc::new(RefCell::new(vec![])))
        }

        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run_plain(src: &str) -> String {
        let module = parse_module(src).unwrap();
        let buf = SharedBuf::new();
        let mut interp = Interp::new(&module, None, Box::new(buf.clone()));
        interp.run().unwrap();
        buf.contents()
    }

    fn run_mutant(src: &str, id: u32) -> String {
        let mut module = parse_module(src).unwrap();
        let mut gen = MutationGen::new();
        gen.run_on_module(&module);
        let catalog = gen.into_catalog();
        instrument_module(&mut module, &catalog).unwrap();

        let mut ctx = RuntimeCtx::init(&catalog);
        if id == 0 {
            ctx.clear_active();
        } else {
            ctx.set_single_mutant(id);
        }

        let buf = SharedBuf::new();
        let mut interp = Interp::new(&module, Some(&mut ctx), Box::new(buf.clone()));
        interp.run().unwrap();
        buf.contents()
    }

    const ADD_PROG: &str = "\
func @main() -> void {
entry:
  %0 = alloca i32
  %1 = alloca i32
  store i32 6, %0
  %2 = load i32, %0
  %3 = add i32 %2, 2
  store i32 %3, %1
  %4 = load i32, %1
  call void @print_i32(%4)
  ret
}
";

    #[test]
    fn straight_line_program_prints_its_sum() {
        assert_eq!(run_plain(ADD_PROG), "8\n");
    }

    #[test]
    fn control_flow_and_compare() {
        let src = "\
func @main() -> void {
entry:
  %0 = alloca i32
  store i32 10, %0
  %1 = load i32, %0
  %2 = icmp sgt i32 %1, 10
  condbr %2, yes, no
yes:
  call void @print_i32(1)
  br done
no:
  call void @print_i32(0)
  br done
done:
  ret
}
";
        assert_eq!(run_plain(src), "0\n");
    }

    #[test]
    fn globals_are_addressable() {
        let src = "\
global @g: i64 = 5

func @main() -> void {
entry:
  %0 = load i64, @g
  %1 = mul i64 %0, 3
  store i64 %1, @g
  %2 = load i64, @g
  call void @print_i64(%2)
  ret
}
";
        assert_eq!(run_plain(src), "15\n");
    }

    #[test]
    fn function_calls_pass_arguments() {
        let src = "\
func @double(%0: i32) -> i32 {
entry:
  %1 = add i32 %0, %0
  ret %1
}

func @main() -> void {
entry:
  %0 = call i32 @double(21)
  call void @print_i32(%0)
  ret
}
";
        assert_eq!(run_plain(src), "42\n");
    }

    #[test]
    fn instrumented_baseline_is_a_no_op() {
        assert_eq!(run_mutant(ADD_PROG, 0), "8\n");
    }

    #[test]
    fn single_mutant_runs_match_hand_applied_variants() {
        // ids 1..=5: LVR on `store i32 6`: 5, 7, 0, 1, -1
        assert_eq!(run_mutant(ADD_PROG, 1), "7\n");
        assert_eq!(run_mutant(ADD_PROG, 3), "2\n");
        assert_eq!(run_mutant(ADD_PROG, 5), "1\n");
        // ids 6..=11: AOR on `add %1, 2` with %1 = 6:
        // sub, mul, udiv, sdiv, urem, srem
        assert_eq!(run_mutant(ADD_PROG, 6), "4\n");
        assert_eq!(run_mutant(ADD_PROG, 7), "12\n");
        assert_eq!(run_mutant(ADD_PROG, 9), "3\n");
        assert_eq!(run_mutant(ADD_PROG, 11), "0\n");
        // ids 12..=15: LVR on the add's operand 1: 1, 3, 0, -1
        assert_eq!(run_mutant(ADD_PROG, 12), "7\n");
        assert_eq!(run_mutant(ADD_PROG, 13), "9\n");
        assert_eq!(run_mutant(ADD_PROG, 14), "6\n");
        assert_eq!(run_mutant(ADD_PROG, 15), "5\n");
        // id 16: STD of the print call
        assert_eq!(run_mutant(ADD_PROG, 16), "");
    }

    #[test]
    fn std_mutant_deletes_the_call() {
        let src = "\
func @tell() -> void {
entry:
  call void @print_i32(7)
  ret
}

func @main() -> void {
entry:
  call void @tell()
  call void @print_i32(1)
  ret
}
";
        // catalog order: @tell's print site first, then @main's sites
        // id 1: STD of print_i32 inside @tell
        // id 2..: LVR on the hoisted constant? (constants only get LVR
        //         at binop/cmp/store sites, so no)
        // id 2: STD of @tell call, id 3: STD of print_i32(1)
        assert_eq!(run_mutant(src, 1), "1\n");
        assert_eq!(run_mutant(src, 2), "1\n");
        assert_eq!(run_mutant(src, 3), "7\n");
    }

    #[test]
    fn store_mutant_is_visible_through_the_global() {
        let src = "\
global @g: i32 = 0

func @main() -> void {
entry:
  store i32 42, @g
  %0 = load i32, @g
  call void @print_i32(%0)
  ret
}
";
        // ids 1..=5: LVR 41, 43, 0, 1, -1
        assert_eq!(run_mutant(src, 0), "42\n");
        assert_eq!(run_mutant(src, 1), "41\n");
        assert_eq!(run_mutant(src, 2), "43\n");
        assert_eq!(run_mutant(src, 5), "-1\n");
    }

    #[test]
    fn division_by_zero_mutant_survives_with_sentinel() {
        let src = "\
func @main() -> void {
entry:
  %0 = alloca i32
  %1 = alloca i32
  store i32 4, %0
  %2 = load i32, %0
  %3 = mul i32 %2, 0
  store i32 %3, %1
  %4 = load i32, %1
  call void @print_i32(%4)
  ret
}
";
        // ids 1..=5 are LVR on `store i32 4`; the mul site's AOR run is
        // ids 6..=11: add, sub, udiv, sdiv, urem, srem. sdiv (id 9)
        // divides 4 by 0.
        assert_eq!(run_mutant(src, 0), "0\n");
        assert_eq!(run_mutant(src, 9), format!("{}\n", i32::MAX));
    }

    #[test]
    fn catalog_file_round_trip_drives_execution() {
        let mut module = parse_module(ADD_PROG).unwrap();
        let mut gen = MutationGen::new();
        gen.run_on_module(&module);
        let catalog = gen.into_catalog();
        instrument_module(&mut module, &catalog).unwrap();

        let mut buf = vec![];
        catalog.write_to(&mut buf).unwrap();
        let reloaded = Catalog::read_from(&buf[..]).unwrap();

        let mut ctx = RuntimeCtx::init(&reloaded);
        ctx.set_single_mutant(7); // add -> mul

        let out = SharedBuf::new();
        let mut interp = Interp::new(&module, Some(&mut ctx), Box::new(out.clone()));
        interp.run().unwrap();
        assert_eq!(out.contents(), "12\n");
    }
}
