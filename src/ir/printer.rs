use std::fmt::Write;

use super::block::Block;
use super::func::Func;
use super::inst::{BlockId, Inst, Operand};
use super::module::{Global, Module};

// The printed form is the same surface syntax the parser reads back,
// so golden tests can compare instrumented IR as plain text.

pub fn module_to_string(module: &Module) -> String {
    let mut out = String::new();
    let globals = module.get_globals();

    for g in globals.iter() {
        writeln!(out, "global @{}: {} = {}", g.name, g.ty.name(), g.init).unwrap();
    }

    if !globals.is_empty() {
        out.push('\n');
    }

    for (i, func) in module.get_funcs().iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&func_to_string(func, globals));
    }

    out
}

pub fn func_to_string(func: &Func, globals: &[Global]) -> String {
    let mut out = String::new();

    let params: Vec<String> = func
        .get_params()
        .iter()
        .map(|(id, ty)| format!("%{}: {}", id, ty.name()))
        .collect();

    writeln!(
        out,
        "func @{}({}) -> {} {{",
        func.get_name(),
        params.join(", "),
        func.get_ret().name()
    )
    .unwrap();

    for block in func.get_blocks().iter() {
        writeln!(out, "{}:", block.get_label()).unwrap();

        for instr in block.get_instrs().iter() {
            writeln!(out, "  {}", inst_to_string(instr, func, globals)).unwrap();
        }
    }

    out.push_str("}\n");
    out
}

fn label_of(func: &Func, id: BlockId) -> String {
    match func.try_get_block(id) {
        Some(b) => b.get_label().to_string(),
        None => format!("bb{}", id),
    }
}

fn operand(op: &Operand, globals: &[Global]) -> String {
    match op {
        Operand::Reg(r) => format!("%{}", r),
        Operand::Const(c) => format!("{}", c),
        Operand::Global(g) => match globals.get(*g as usize) {
            Some(global) => format!("@{}", global.name),
            None => format!("@{}", g),
        },
    }
}

pub fn inst_to_string(instr: &Inst, func: &Func, globals: &[Global]) -> String {
    let op = |o: &Operand| operand(o, globals);

    match instr {
        Inst::Alloca { dest, ty } => format!("%{} = alloca {}", dest, ty.name()),
        Inst::Load { dest, ty, addr } => {
            format!("%{} = load {}, {}", dest, ty.name(), op(addr))
        }
        Inst::Store { ty, val, addr } => {
            format!("store {} {}, {}", ty.name(), op(val), op(addr))
        }
        Inst::BinOp { dest, op: opcode, ty, lhs, rhs } => format!(
            "%{} = {} {} {}, {}",
            dest,
            opcode.mnemonic(),
            ty.name(),
            op(lhs),
            op(rhs)
        ),
        Inst::ICmp { dest, pred, ty, lhs, rhs } => format!(
            "%{} = icmp {} {} {}, {}",
            dest,
            pred.mnemonic(),
            ty.name(),
            op(lhs),
            op(rhs)
        ),
        Inst::Trunc { dest, to, src } => {
            format!("%{} = trunc {} to {}", dest, op(src), to.name())
        }
        Inst::Call { dest, ret, callee, args } => {
            let args: Vec<String> = args.iter().map(op).collect();
            let call = format!("call {} @{}({})", ret.name(), callee, args.join(", "));

            match dest {
                Some(d) => format!("%{} = {}", d, call),
                None => call,
            }
        }
        Inst::Br { target } => format!("br {}", label_of(func, *target)),
        Inst::CondBr { cond, then_dest, else_dest } => format!(
            "condbr {}, {}, {}",
            op(cond),
            label_of(func, *then_dest),
            label_of(func, *else_dest)
        ),
        Inst::Phi { dest, ty, incomings } => {
            let arms: Vec<String> = incomings
                .iter()
                .map(|(pred, o)| format!("[ {}, {} ]", op(o), label_of(func, *pred)))
                .collect();

            format!("%{} = phi {} {}", dest, ty.name(), arms.join(", "))
        }
        Inst::Ret { val } => match val {
            Some(o) => format!("ret {}", op(o)),
            None => "ret".to_string(),
        },
    }
}

#[allow(dead_code)]
pub fn block_to_string(block: &Block, func: &Func, globals: &[Global]) -> String {
    let mut out = String::new();

    writeln!(out, "{}:", block.get_label()).unwrap();
    for instr in block.get_instrs().iter() {
        writeln!(out, "  {}", inst_to_string(instr, func, globals)).unwrap();
    }

    out
}
