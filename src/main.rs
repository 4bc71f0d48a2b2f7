use clap::Parser as CliParser;
use irmut::{Config, Driver};

fn main() {
    let config = Config::parse();
    let driver = Driver::new(config);

    std::process::exit(driver.run());
}
