use serde::Serialize;

use super::func::Func;
use super::ty::IntTy;

#[derive(Debug, Clone, Serialize)]
pub struct Global {
    pub name: String,
    pub ty: IntTy,
    pub init: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Module {
    globals: Vec<Global>,
    funcs: Vec<Func>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            globals: vec![],
            funcs: vec![],
        }
    }

    pub fn get_globals(&self) -> &Vec<Global> {
        &self.globals
    }

    pub fn get_funcs(&self) -> &Vec<Func> {
        &self.funcs
    }

    pub fn get_funcs_mut(&mut self) -> &mut Vec<Func> {
        &mut self.funcs
    }

    pub fn push_global(&mut self, global: Global) {
        self.globals.push(global);
    }

    pub fn push_func(&mut self, func: Func) {
        self.funcs.push(func);
    }

    pub fn get_func(&self, name: &str) -> Option<&Func> {
        self.funcs.iter().find(|f| f.get_name() == name)
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}
