mod block;
mod func;
mod inst;
mod module;
mod opcode;
mod printer;
mod ty;

pub use block::Block;
pub use func::Func;
pub use inst::{BlockId, GlobalId, Inst, Operand, ValueId};
pub use module::{Global, Module};
pub use opcode::{OpFamily, Opcode, Pred, PredClass, CALL_OP_TAG, ICMP_OP_TAG, STORE_OP_TAG};
pub use printer::{func_to_string, inst_to_string, module_to_string};
pub use ty::{IntTy, Ty, CHAR_TP, INT_TP, LONG_TP, SHORT_TP, VOID_TP};
