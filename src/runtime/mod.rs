mod ctx;
mod error;
mod eval;
mod interp;

pub use ctx::RuntimeCtx;
pub use error::RuntimeError;
pub use eval::{cal_i32_arith, cal_i32_bool, cal_i64_arith, cal_i64_bool};
pub use interp::{Interp, Mem};
