use std::path::PathBuf;

use colored::Colorize;

use crate::catalog::{default_catalog_path, Catalog};
use crate::generator::MutationGen;
use crate::instrumenter::instrument_module;
use crate::ir::module_to_string;
use crate::parser::parse_module;
use crate::runtime::{Interp, RuntimeCtx, RuntimeError};

use super::config::Config;
use super::error::DriverError;

// INPUT: IR MODULE
// STEP 1: WALK IR -> MUTATION CATALOG (persisted)
// STEP 2: CATALOG + IR -> INSTRUMENTED IR
// STEP 3: EXECUTE, FORKING PER SURVIVING EQUIVALENCE CLASS
pub struct Driver {
    config: Config,
}

impl Driver {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Returns the process exit code.
    pub fn run(&self) -> i32 {
        match self.execute() {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("{} {}", "ERROR:".red(), err.render());
                err.exit_code()
            }
        }
    }

    fn execute(&self) -> Result<(), DriverError> {
        let source = std::fs::read_to_string(&self.config.file)
            .map_err(|e| DriverError::Io(format!("{}: {}", self.config.file, e)))?;
        let mut module = parse_module(&source)?;

        if self.config.original {
            let mut interp = Interp::new(&module, None, self.config.get_output());
            interp.run()?;
            return Ok(());
        }

        let mut gen = MutationGen::new();
        gen.run_on_module(&module);
        let catalog = gen.into_catalog();

        if let Some(path) = &self.config.catalog_output_path {
            self.output_catalog(&catalog, path.clone())?;
        }

        let catalog_path = match &self.config.mutation_file {
            Some(path) => PathBuf::from(path),
            None => default_catalog_path()?,
        };
        catalog.save(&catalog_path)?;

        if self.config.gen_only {
            return Ok(());
        }

        instrument_module(&mut module, &catalog)?;

        if let Some(path) = &self.config.ir_output_path {
            output_string(module_to_string(&module), path.clone())?;
        }

        if self.config.dry_run {
            return Ok(());
        }

        // the runtime reads the persisted catalog, not the in-memory
        // one, so every run exercises the file round trip
        let mut ctx = RuntimeCtx::from_file(&catalog_path)?;

        if self.config.baseline {
            ctx.clear_active();
        }
        if let Some(id) = self.config.mutant {
            if id == 0 || id > ctx.max_id() {
                return Err(DriverError::Runtime(RuntimeError::MissingMutation(id)));
            }

            // a single-mutant run is the fork that would carry this id,
            // runaway protection included
            ctx.set_single_mutant(id);
            ctx.arm_timer();
        }

        let single_mode = ctx.is_forked();

        let result = {
            let mut interp = Interp::new(&module, Some(&mut ctx), self.config.get_output());
            interp.run()
        };

        if single_mode {
            ctx.disarm_timer();
        }

        // A fork made inside a dispatch call must never return control
        // to whatever embeds the driver; it is done once the module
        // finishes.
        if !single_mode && ctx.is_forked() {
            match result {
                Ok(()) => std::process::exit(0),
                Err(err) => {
                    eprintln!("{} {}", "ERROR:".red(), err.render());
                    std::process::exit(err.exit_code());
                }
            }
        }

        result?;
        Ok(())
    }

    fn output_catalog(&self, catalog: &Catalog, path: Option<String>) -> Result<(), DriverError> {
        let mut buf = vec![];
        catalog
            .write_to(&mut buf)
            .map_err(|e| DriverError::Io(e.to_string()))?;

        let text = String::from_utf8(buf).expect("catalog text is utf8");
        output_string(text, path)
    }
}

fn output_string(content: String, path: Option<String>) -> Result<(), DriverError> {
    match path {
        Some(path) => std::fs::write(&path, content)
            .map_err(|e| DriverError::Io(format!("{}: {}", path, e))),
        None => {
            println!("{}", content);
            Ok(())
        }
    }
}
