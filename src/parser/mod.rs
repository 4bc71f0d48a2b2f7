mod error;

pub use error::{ParseError, ParseErrorItem};

use hashbrown::HashMap;

use crate::ir::{Block, BlockId, Func, Global, Inst, IntTy, Module, Opcode, Operand, Pred, Ty, ValueId};

// Loader for the textual IR form the printer emits. Registers are
// numeric (%0, %1, ...), block labels are names, `phi` is not accepted
// here (only the instrumenter creates phis).

pub fn parse_module(source: &str) -> Result<Module, ParseError> {
    Parser::new(source).parse()
}

struct Parser<'a> {
    lines: Vec<(usize, &'a str)>,
    pos: usize,
    global_names: Vec<String>,
}

struct FuncCtx {
    func: Func,
    globals: Vec<String>,
    labels: HashMap<String, BlockId>,
    current: Option<Block>,
    max_reg: ValueId,
}

impl FuncCtx {
    fn new(func: Func, globals: Vec<String>) -> Self {
        Self {
            func,
            globals,
            labels: HashMap::new(),
            current: None,
            max_reg: 0,
        }
    }

    fn label_id(&mut self, label: &str) -> BlockId {
        if let Some(id) = self.labels.get(label) {
            *id
        } else {
            let id = self.func.new_block_id();
            self.labels.insert(label.to_string(), id);
            id
        }
    }

    fn saw_reg(&mut self, reg: ValueId) {
        if reg + 1 > self.max_reg {
            self.max_reg = reg + 1;
        }
    }

    fn finish_block(&mut self, line: usize) -> Result<(), ParseError> {
        if let Some(block) = self.current.take() {
            if block.terminator().is_none() {
                return Err(ParseError::new(
                    line,
                    ParseErrorItem::MissingTerminator(block.get_label().to_string()),
                ));
            }

            self.func.push_block(block);
        }

        Ok(())
    }
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        let lines = source
            .lines()
            .enumerate()
            .map(|(n, l)| {
                let l = match l.find('#') {
                    Some(i) => &l[..i],
                    None => l,
                };
                (n + 1, l.trim())
            })
            .filter(|(_, l)| !l.is_empty())
            .collect();

        Self {
            lines,
            pos: 0,
            global_names: vec![],
        }
    }

    fn parse(mut self) -> Result<Module, ParseError> {
        let mut module = Module::new();

        while self.pos < self.lines.len() {
            let (line, text) = self.lines[self.pos];

            if let Some(rest) = text.strip_prefix("global ") {
                let global = parse_global(line, rest)?;
                self.global_names.push(global.name.clone());
                module.push_global(global);
                self.pos += 1;
            } else if text.starts_with("func ") {
                let func = self.parse_func()?;
                module.push_func(func);
            } else {
                return Err(expected(line, "`global` or `func`", text));
            }
        }

        Ok(module)
    }

    fn parse_func(&mut self) -> Result<Func, ParseError> {
        let (line, header) = self.lines[self.pos];
        self.pos += 1;

        let mut ctx = FuncCtx::new(parse_func_header(line, header)?, self.global_names.clone());

        for (reg, _) in ctx.func.get_params().clone() {
            ctx.saw_reg(reg);
        }

        loop {
            if self.pos >= self.lines.len() {
                return Err(expected(line, "closing `}`", "end of input"));
            }

            let (line, text) = self.lines[self.pos];
            self.pos += 1;

            if text == "}" {
                ctx.finish_block(line)?;
                break;
            }

            if let Some(label) = text.strip_suffix(':') {
                ctx.finish_block(line)?;
                let id = ctx.label_id(label);
                ctx.current = Some(Block::new(id, label.to_string()));
                continue;
            }

            let instr = parse_inst(line, text, &mut ctx)?;

            match ctx.current.as_mut() {
                Some(block) => block.push_instr(instr),
                None => return Err(ParseError::new(line, ParseErrorItem::StrayInstruction)),
            }
        }

        let max_reg = ctx.max_reg;
        ctx.func.set_value_counter(max_reg);

        Ok(ctx.func)
    }
}

fn expected(line: usize, msg: &str, found: &str) -> ParseError {
    ParseError::new(
        line,
        ParseErrorItem::Expected {
            msg: msg.to_string(),
            found: found.to_string(),
        },
    )
}

fn parse_int(line: usize, s: &str) -> Result<i64, ParseError> {
    s.trim()
        .parse::<i64>()
        .map_err(|_| ParseError::new(line, ParseErrorItem::BadInteger(s.to_string())))
}

fn parse_reg(line: usize, s: &str) -> Result<ValueId, ParseError> {
    s.trim()
        .strip_prefix('%')
        .and_then(|r| r.parse::<ValueId>().ok())
        .ok_or_else(|| ParseError::new(line, ParseErrorItem::BadOperand(s.to_string())))
}

fn parse_operand(line: usize, s: &str, ctx: &mut FuncCtx) -> Result<Operand, ParseError> {
    let s = s.trim();

    if s.starts_with('%') {
        let reg = parse_reg(line, s)?;
        ctx.saw_reg(reg);
        Ok(Operand::Reg(reg))
    } else if let Some(name) = s.strip_prefix('@') {
        let idx = ctx
            .globals
            .iter()
            .position(|g| g == name)
            .ok_or_else(|| ParseError::new(line, ParseErrorItem::UnknownGlobal(name.to_string())))?;

        Ok(Operand::Global(idx as u32))
    } else {
        Ok(Operand::Const(parse_int(line, s)?))
    }
}

fn parse_int_ty(line: usize, s: &str) -> Result<IntTy, ParseError> {
    IntTy::from_name(s.trim())
        .ok_or_else(|| ParseError::new(line, ParseErrorItem::UnknownType(s.to_string())))
}

fn parse_ty(line: usize, s: &str) -> Result<Ty, ParseError> {
    Ty::from_name(s.trim())
        .ok_or_else(|| ParseError::new(line, ParseErrorItem::UnknownType(s.to_string())))
}

// global @g: i32 = 0
fn parse_global(line: usize, rest: &str) -> Result<Global, ParseError> {
    let rest = rest.trim();
    let (name, tail) = rest
        .strip_prefix('@')
        .and_then(|r| r.split_once(':'))
        .ok_or_else(|| expected(line, "`@name: ty = init`", rest))?;
    let (ty, init) = tail
        .split_once('=')
        .ok_or_else(|| expected(line, "`= <init>`", tail))?;

    Ok(Global {
        name: name.trim().to_string(),
        ty: parse_int_ty(line, ty)?,
        init: parse_int(line, init)?,
    })
}

// func @main(%0: i32, %1: i64) -> void {
fn parse_func_header(line: usize, header: &str) -> Result<Func, ParseError> {
    let rest = header
        .strip_prefix("func ")
        .and_then(|r| r.trim().strip_prefix('@'))
        .ok_or_else(|| expected(line, "`func @name(...)`", header))?;
    let rest = rest
        .strip_suffix('{')
        .ok_or_else(|| expected(line, "opening `{`", header))?
        .trim();

    let open = rest
        .find('(')
        .ok_or_else(|| expected(line, "parameter list", rest))?;
    let close = rest
        .rfind(')')
        .ok_or_else(|| expected(line, "closing `)`", rest))?;

    let name = rest[..open].trim().to_string();
    let params_src = &rest[open + 1..close];
    let ret_src = rest[close + 1..]
        .trim()
        .strip_prefix("->")
        .ok_or_else(|| expected(line, "`-> <ret-ty>`", rest))?;

    let mut params = vec![];
    for p in params_src.split(',') {
        let p = p.trim();
        if p.is_empty() {
            continue;
        }

        let (reg, ty) = p
            .split_once(':')
            .ok_or_else(|| expected(line, "`%reg: ty`", p))?;
        params.push((parse_reg(line, reg)?, parse_ty(line, ty)?));
    }

    Ok(Func::new(name, params, parse_ty(line, ret_src)?))
}

fn parse_inst(line: usize, text: &str, ctx: &mut FuncCtx) -> Result<Inst, ParseError> {
    if let Some((dest, rhs)) = split_assign(text) {
        let dest = parse_reg(line, dest)?;
        ctx.saw_reg(dest);
        return parse_value_inst(line, dest, rhs.trim(), ctx);
    }

    if let Some(rest) = text.strip_prefix("store ") {
        // store i32 <val>, <addr>
        let (ty, rest) = rest
            .trim()
            .split_once(' ')
            .ok_or_else(|| expected(line, "`store ty val, addr`", text))?;
        let (val, addr) = rest
            .split_once(',')
            .ok_or_else(|| expected(line, "`val, addr`", rest))?;

        return Ok(Inst::Store {
            ty: parse_int_ty(line, ty)?,
            val: parse_operand(line, val, ctx)?,
            addr: parse_operand(line, addr, ctx)?,
        });
    }

    if let Some(rest) = text.strip_prefix("call ") {
        let (ret, callee, args) = parse_call_tail(line, rest, ctx)?;
        if ret != Ty::Void {
            return Err(expected(line, "void call without destination", text));
        }

        return Ok(Inst::Call {
            dest: None,
            ret,
            callee,
            args,
        });
    }

    if let Some(rest) = text.strip_prefix("br ") {
        return Ok(Inst::Br {
            target: ctx.label_id(rest.trim()),
        });
    }

    if let Some(rest) = text.strip_prefix("condbr ") {
        let mut parts = rest.split(',');
        let cond = parts
            .next()
            .ok_or_else(|| expected(line, "`condbr cond, then, else`", text))?;
        let then_l = parts
            .next()
            .ok_or_else(|| expected(line, "then label", text))?;
        let else_l = parts
            .next()
            .ok_or_else(|| expected(line, "else label", text))?;

        return Ok(Inst::CondBr {
            cond: parse_operand(line, cond, ctx)?,
            then_dest: ctx.label_id(then_l.trim()),
            else_dest: ctx.label_id(else_l.trim()),
        });
    }

    if text == "ret" {
        return Ok(Inst::Ret { val: None });
    }

    if let Some(rest) = text.strip_prefix("ret ") {
        return Ok(Inst::Ret {
            val: Some(parse_operand(line, rest, ctx)?),
        });
    }

    Err(expected(line, "an instruction", text))
}

fn parse_value_inst(
    line: usize,
    dest: ValueId,
    rhs: &str,
    ctx: &mut FuncCtx,
) -> Result<Inst, ParseError> {
    if let Some(rest) = rhs.strip_prefix("alloca ") {
        return Ok(Inst::Alloca {
            dest,
            ty: parse_int_ty(line, rest)?,
        });
    }

    if let Some(rest) = rhs.strip_prefix("load ") {
        let (ty, addr) = rest
            .split_once(',')
            .ok_or_else(|| expected(line, "`load ty, addr`", rhs))?;

        return Ok(Inst::Load {
            dest,
            ty: parse_int_ty(line, ty)?,
            addr: parse_operand(line, addr, ctx)?,
        });
    }

    if let Some(rest) = rhs.strip_prefix("icmp ") {
        // icmp sgt i32 a, b
        let mut parts = rest.splitn(3, ' ');
        let pred = parts
            .next()
            .ok_or_else(|| expected(line, "predicate", rhs))?;
        let ty = parts.next().ok_or_else(|| expected(line, "type", rhs))?;
        let ops = parts
            .next()
            .ok_or_else(|| expected(line, "operands", rhs))?;
        let (lhs_s, rhs_s) = ops
            .split_once(',')
            .ok_or_else(|| expected(line, "`lhs, rhs`", ops))?;

        let pred = Pred::from_mnemonic(pred)
            .ok_or_else(|| ParseError::new(line, ParseErrorItem::UnknownPred(pred.to_string())))?;

        return Ok(Inst::ICmp {
            dest,
            pred,
            ty: parse_int_ty(line, ty)?,
            lhs: parse_operand(line, lhs_s, ctx)?,
            rhs: parse_operand(line, rhs_s, ctx)?,
        });
    }

    if let Some(rest) = rhs.strip_prefix("trunc ") {
        let (src, to) = rest
            .split_once(" to ")
            .ok_or_else(|| expected(line, "`trunc src to ty`", rhs))?;

        return Ok(Inst::Trunc {
            dest,
            to: parse_ty(line, to)?,
            src: parse_operand(line, src, ctx)?,
        });
    }

    if let Some(rest) = rhs.strip_prefix("call ") {
        let (ret, callee, args) = parse_call_tail(line, rest, ctx)?;
        if ret == Ty::Void {
            return Err(expected(line, "non-void call", rhs));
        }

        return Ok(Inst::Call {
            dest: Some(dest),
            ret,
            callee,
            args,
        });
    }

    // binop: `add i32 a, b`
    let mut parts = rhs.splitn(3, ' ');
    let op_s = parts
        .next()
        .ok_or_else(|| expected(line, "an opcode", rhs))?;
    let op = Opcode::from_mnemonic(op_s)
        .ok_or_else(|| ParseError::new(line, ParseErrorItem::UnknownOp(op_s.to_string())))?;
    let ty = parts.next().ok_or_else(|| expected(line, "type", rhs))?;
    let ops = parts
        .next()
        .ok_or_else(|| expected(line, "operands", rhs))?;
    let (lhs_s, rhs_s) = ops
        .split_once(',')
        .ok_or_else(|| expected(line, "`lhs, rhs`", ops))?;

    Ok(Inst::BinOp {
        dest,
        op,
        ty: parse_int_ty(line, ty)?,
        lhs: parse_operand(line, lhs_s, ctx)?,
        rhs: parse_operand(line, rhs_s, ctx)?,
    })
}

// `ret-ty @callee(arg, arg, ...)`
fn parse_call_tail(
    line: usize,
    rest: &str,
    ctx: &mut FuncCtx,
) -> Result<(Ty, String, Vec<Operand>), ParseError> {
    let rest = rest.trim();
    let (ty, rest) = rest
        .split_once(' ')
        .ok_or_else(|| expected(line, "`call ty @callee(...)`", rest))?;
    let rest = rest
        .trim()
        .strip_prefix('@')
        .ok_or_else(|| expected(line, "`@callee`", rest))?;
    let open = rest
        .find('(')
        .ok_or_else(|| expected(line, "argument list", rest))?;
    let close = rest
        .rfind(')')
        .ok_or_else(|| expected(line, "closing `)`", rest))?;

    let callee = rest[..open].trim().to_string();
    let mut args = vec![];

    for a in rest[open + 1..close].split(',') {
        let a = a.trim();
        if a.is_empty() {
            continue;
        }
        args.push(parse_operand(line, a, ctx)?);
    }

    Ok((parse_ty(line, ty)?, callee, args))
}

fn split_assign(text: &str) -> Option<(&str, &str)> {
    let (lhs, rhs) = text.split_once('=')?;
    let lhs = lhs.trim();

    // `icmp eq` lines also contain '=' inside no operand, so only treat
    // a leading register followed by '=' as an assignment.
    if lhs.starts_with('%') && !lhs.contains(' ') {
        Some((lhs, rhs))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::module_to_string;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_through_printer() {
        let src = "\
global @g: i32 = 0

func @main() -> void {
entry:
  %0 = alloca i32
  store i32 6, %0
  %1 = load i32, %0
  %2 = add i32 %1, 2
  %3 = icmp sgt i32 %2, 10
  condbr %3, big, small
big:
  call void @print_i32(%2)
  br exit
small:
  %4 = sub i64 9, 3
  br exit
exit:
  ret
}
";

        let module = parse_module(src).unwrap();
        assert_eq!(module_to_string(&module), src);
    }

    #[test]
    fn parses_globals_and_params() {
        let src = "\
global @counter: i64 = -3

func @f(%0: i32, %1: i64) -> i32 {
entry:
  ret %0
}
";
        let module = parse_module(src).unwrap();

        assert!(module.get_globals().len() == 1);
        assert!(module.get_globals()[0].init == -3);

        let f = module.get_func("f").unwrap();
        assert!(f.get_params().len() == 2);
        assert!(f.get_ret() == Ty::Int(IntTy::I32));
    }

    #[test]
    fn global_operands_resolve_by_name() {
        let src = "\
global @a: i32 = 1
global @b: i32 = 2

func @main() -> void {
entry:
  %0 = load i32, @b
  store i32 %0, @a
  ret
}
";
        let module = parse_module(src).unwrap();
        assert_eq!(module_to_string(&module), src);

        let f = module.get_func("main").unwrap();
        match f.get_entry_block().get_instrs()[0] {
            Inst::Load { addr: Operand::Global(1), .. } => {}
            ref other => panic!("expected load of @b, got {:?}", other),
        }
    }

    #[test]
    fn unknown_global_is_an_error() {
        let src = "\
func @main() -> void {
entry:
  store i32 1, @nope
  ret
}
";
        let err = parse_module(src).unwrap_err();
        assert!(matches!(err.item, ParseErrorItem::UnknownGlobal(_)));
    }

    #[test]
    fn rejects_unterminated_block() {
        let src = "\
func @f() -> void {
entry:
  %0 = add i32 1, 2
}
";
        let err = parse_module(src).unwrap_err();
        assert!(matches!(err.item, ParseErrorItem::MissingTerminator(_)));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let src = "\
func @f() -> void {
entry:
  %0 = fadd i32 1, 2
  ret
}
";
        let err = parse_module(src).unwrap_err();
        assert!(matches!(err.item, ParseErrorItem::UnknownOp(_)));
        assert!(err.line == 3);
    }

    #[test]
    fn forward_branch_targets_resolve() {
        let src = "\
func @f() -> void {
entry:
  br later
later:
  ret
}
";
        let module = parse_module(src).unwrap();
        let f = module.get_func("f").unwrap();
        let entry = f.get_entry_block();

        match entry.get_instrs()[0] {
            Inst::Br { target } => {
                assert!(f.get_block(target).get_label() == "later");
            }
            _ => panic!("expected br"),
        }
    }
}
