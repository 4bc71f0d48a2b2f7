use crate::catalog::CatalogError;
use crate::config::CONFIG_ERR;
use crate::instrumenter::InstrumentError;
use crate::parser::ParseError;
use crate::runtime::RuntimeError;

#[derive(Debug)]
pub enum DriverError {
    Parse(ParseError),
    Catalog(CatalogError),
    Instrument(InstrumentError),
    Runtime(RuntimeError),
    Io(String),
}

impl DriverError {
    pub fn render(&self) -> String {
        match self {
            DriverError::Parse(err) => err.render(),
            DriverError::Catalog(err) => err.render(),
            DriverError::Instrument(err) => err.render(),
            DriverError::Runtime(err) => err.render(),
            DriverError::Io(msg) => format!("io error: {}", msg),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            DriverError::Catalog(_) => CONFIG_ERR,
            DriverError::Runtime(err) => err.exit_code(),
            _ => 1,
        }
    }
}

impl From<ParseError> for DriverError {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

impl From<CatalogError> for DriverError {
    fn from(value: CatalogError) -> Self {
        Self::Catalog(value)
    }
}

impl From<InstrumentError> for DriverError {
    fn from(value: InstrumentError) -> Self {
        Self::Instrument(value)
    }
}

impl From<RuntimeError> for DriverError {
    fn from(value: RuntimeError) -> Self {
        Self::Runtime(value)
    }
}
