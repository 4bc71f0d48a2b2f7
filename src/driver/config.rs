use std::io::Write;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Generate the mutation catalog and stop
    #[clap(short = 'g', long)]
    pub gen_only: bool,

    /// Run the module uninstrumented (differential baseline)
    #[clap(long, conflicts_with_all = &["gen_only", "mutant", "baseline"])]
    pub original: bool,

    /// Run instrumented with the active set emptied: every dispatch
    /// takes the original path
    #[clap(long, conflicts_with = "mutant")]
    pub baseline: bool,

    /// Run as the fork that carries exactly this mutant id
    #[clap(short = 'm', long)]
    pub mutant: Option<u32>,

    /// Catalog file path (defaults to $HOME/tmp/accmut/mutations.txt)
    #[clap(long = "mutation-file")]
    pub mutation_file: Option<String>,

    /// Optionally dump the generated catalog to stdout or to a file if provided
    #[clap(short = 'c', long = "catalog_output")]
    pub catalog_output_path: Option<Option<String>>,

    /// Optionally dump the instrumented IR to stdout or to a file if provided
    #[clap(short = 'r', long = "ir_output")]
    pub ir_output_path: Option<Option<String>>,

    /// Instrument but do not execute
    #[clap(short = 'd', long)]
    pub dry_run: bool,

    /// File to be run
    pub file: String,

    // only meant to be used by tests in order to provide a way to
    // redirect output for testing purposes
    #[clap(skip)]
    pub __output_override: Option<String>,
}

impl Config {
    pub fn get_output(&self) -> Box<dyn Write> {
        if let Some(ref path) = self.__output_override {
            Box::new(std::fs::File::create(path).expect("Failed to open file."))
        } else {
            Box::new(std::io::stdout())
        }
    }
}

impl TryFrom<Vec<&str>> for Config {
    type Error = String;

    fn try_from(args: Vec<&str>) -> Result<Self, Self::Error> {
        match Config::try_parse_from(args) {
            Ok(config) => Ok(config),
            Err(e) => Err(e.to_string()),
        }
    }
}
