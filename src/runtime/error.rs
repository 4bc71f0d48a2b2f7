use crate::config::{FORK_ERR, OPCD_ERR};
use crate::ir::ValueId;

#[derive(Debug, PartialEq)]
pub enum RuntimeError {
    UnknownOpcode(i32),
    UnknownPred(i32),
    ForkFailed,
    UnknownFunction(String),
    UndefinedRegister(ValueId),
    BadAddress(i64),
    MissingMutation(u32),
    BadDispatch(String),
    NoMain,
    NoRuntimeCtx,
    Io(String),
}

impl RuntimeError {
    pub fn render(&self) -> String {
        match self {
            RuntimeError::UnknownOpcode(tag) => format!("runtime error: unknown opcode {}", tag),
            RuntimeError::UnknownPred(tag) => format!("runtime error: unknown predicate {}", tag),
            RuntimeError::ForkFailed => "runtime error: fork failed".to_string(),
            RuntimeError::UnknownFunction(name) => {
                format!("runtime error: call to unknown function @{}", name)
            }
            RuntimeError::UndefinedRegister(reg) => {
                format!("runtime error: read of undefined register %{}", reg)
            }
            RuntimeError::BadAddress(addr) => {
                format!("runtime error: access outside memory at {}", addr)
            }
            RuntimeError::MissingMutation(id) => {
                format!("runtime error: no catalog entry for mutation {}", id)
            }
            RuntimeError::BadDispatch(msg) => format!("runtime error: {}", msg),
            RuntimeError::NoMain => "runtime error: module has no @main".to_string(),
            RuntimeError::NoRuntimeCtx => {
                "runtime error: dispatch call reached an uninitialised runtime".to_string()
            }
            RuntimeError::Io(msg) => format!("runtime error: {}", msg),
        }
    }

    /// Process exit code the driver uses when this error escapes.
    pub fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::UnknownOpcode(_) | RuntimeError::UnknownPred(_) => OPCD_ERR,
            RuntimeError::ForkFailed => FORK_ERR,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}
