mod config;
#[allow(clippy::module_inception)]
mod driver;
mod error;

pub use config::Config;
pub use driver::Driver;
pub use error::DriverError;
