use std::io::Write;
use std::path::Path;

use crate::catalog::{Catalog, CatalogError, MutKind, Mutation};
use crate::config::{
    INTERVAL_SEC, INTERVAL_USEC, TIMEOUT_EXIT, VALUE_SEC, VALUE_USEC,
};
use crate::ir::{INT_TP, LONG_TP, VOID_TP};

use super::error::RuntimeError;
use super::eval::{cal_i32_arith, cal_i32_bool, cal_i64_arith, cal_i64_bool};
use super::interp::Mem;

extern "C" fn timeout_handler(_: libc::c_int) {
    const MSG: &[u8] = b"MUTANT TIMEOUT\n";

    unsafe {
        libc::write(2, MSG.as_ptr() as *const libc::c_void, MSG.len());
        libc::_exit(TIMEOUT_EXIT);
    }
}

/// Substitute return value parked by `__prepare_call` for the adjacent
/// `__stdcall_*`.
#[derive(Debug, Copy, Clone, PartialEq)]
enum SubValue {
    I32(i32),
    I64(i64),
    Void,
}

struct Eqclass<T> {
    value: T,
    ids: Vec<u32>,
}

enum Dispatched {
    /// The dispatch degenerated to the original result on this
    /// process's path; nothing was restricted.
    Original(i64),
    /// The dispatcher resolved a value (possibly after forking).
    Resolved(i64),
}

/// Per-process runtime state: the loaded catalog, this process's
/// identity, and its active sets. `fork()` hands every child its own
/// copy-on-write instance; nothing here is shared between mutant
/// processes.
pub struct RuntimeCtx {
    muts: Vec<Option<Mutation>>,
    max_id: u32,
    mutation_id: u32,
    test_id: i64,
    // root lineage: alive flags, dense by id
    default_active: Vec<bool>,
    // forked lineage: the equivalence class this process carries
    forked_active: Vec<u32>,
    pending_sub: Option<SubValue>,
}

impl RuntimeCtx {
    pub fn init(catalog: &Catalog) -> Self {
        let max_id = catalog.max_id();
        let mut muts = vec![None; max_id as usize + 1];

        for m in catalog.iter() {
            muts[m.id as usize] = Some(m.clone());
        }

        let test_id = std::env::var("TEST_ID")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        unsafe {
            libc::signal(
                libc::SIGPROF,
                timeout_handler as extern "C" fn(libc::c_int) as libc::sighandler_t,
            );
        }

        Self {
            muts,
            max_id,
            mutation_id: 0,
            test_id,
            default_active: vec![true; max_id as usize + 1],
            forked_active: vec![],
            pending_sub: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let catalog = Catalog::load(path)?;
        Ok(Self::init(&catalog))
    }

    pub fn mutation_id(&self) -> u32 {
        self.mutation_id
    }

    pub fn test_id(&self) -> i64 {
        self.test_id
    }

    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    pub fn is_forked(&self) -> bool {
        self.mutation_id != 0
    }

    /// Run as if this process were the fork carrying exactly `{id}`:
    /// single-mutant mode never forks.
    pub fn set_single_mutant(&mut self, id: u32) {
        self.mutation_id = id;
        self.forked_active = vec![id];
    }

    /// Empty the root active set; every dispatch then degenerates to
    /// the original result (baseline sanity runs).
    pub fn clear_active(&mut self) {
        for flag in self.default_active.iter_mut() {
            *flag = false;
        }
    }

    fn mutation(&self, id: u32) -> Result<&Mutation, RuntimeError> {
        self.muts
            .get(id as usize)
            .and_then(|m| m.as_ref())
            .ok_or(RuntimeError::MissingMutation(id))
    }

    /// The original opcode/predicate tag of the site covering
    /// `[from, to]`, recovered from any record in the range.
    fn site_tag(&self, from: u32, to: u32) -> Result<i32, RuntimeError> {
        for id in from..=to {
            if let Some(tag) = self.mutation(id)?.kind.site_tag() {
                return Ok(tag);
            }
        }

        Err(RuntimeError::BadDispatch(format!(
            "no operation tag recorded in range {}..={}",
            from, to
        )))
    }

    /// Arm the runaway-mutant timer. Forked children re-arm it right
    /// after the fork; single-mutant runs arm it on entry.
    pub fn arm_timer(&self) {
        let tick = libc::itimerval {
            it_value: libc::timeval {
                tv_sec: VALUE_SEC,
                tv_usec: VALUE_USEC,
            },
            it_interval: libc::timeval {
                tv_sec: INTERVAL_SEC,
                tv_usec: INTERVAL_USEC,
            },
        };

        unsafe {
            libc::setitimer(libc::ITIMER_PROF, &tick, std::ptr::null_mut());
        }
    }

    pub fn disarm_timer(&self) {
        let off = libc::itimerval {
            it_value: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            it_interval: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
        };

        unsafe {
            libc::setitimer(libc::ITIMER_PROF, &off, std::ptr::null_mut());
        }
    }

    /// Members this dispatch must consider, paired with their candidate
    /// values. `None` means the whole dispatch degenerates to the
    /// original. In a forked process, members outside `[from, to]` take
    /// the original value as their candidate so they ride whichever
    /// class shares it.
    fn candidates<T, F>(
        &self,
        from: u32,
        to: u32,
        ori: T,
        eval: F,
    ) -> Result<Option<Vec<(u32, T)>>, RuntimeError>
    where
        T: Copy,
        F: Fn(&Mutation) -> Result<T, RuntimeError>,
    {
        // dispatch ranges come from instrumented IR; a range the
        // catalog does not cover means the two are out of sync
        if from == 0 || to < from || to > self.max_id {
            return Err(RuntimeError::BadDispatch(format!(
                "dispatch range {}..={} outside the catalog",
                from, to
            )));
        }

        if self.mutation_id == 0 {
            let mut cands = vec![(0, ori)];

            for id in from..=to {
                if self.default_active[id as usize] {
                    cands.push((id, eval(self.mutation(id)?)?));
                }
            }

            Ok(Some(cands))
        } else {
            if !self
                .forked_active
                .iter()
                .any(|id| (from..=to).contains(id))
            {
                return Ok(None);
            }

            let mut cands = vec![];
            for id in self.forked_active.iter() {
                if (from..=to).contains(id) {
                    cands.push((*id, eval(self.mutation(*id)?)?));
                } else {
                    cands.push((*id, ori));
                }
            }

            Ok(Some(cands))
        }
    }

    fn restrict_to_class(&mut self, from: u32, to: u32, ids: &[u32]) {
        if ids[0] == 0 {
            // root lineage: narrow the default set within the range
            for id in from..=to {
                self.default_active[id as usize] = false;
            }
            for id in ids.iter() {
                if *id != 0 {
                    self.default_active[*id as usize] = true;
                }
            }
        } else {
            self.forked_active = ids.to_vec();
        }
    }

    /// Fork one child per non-primary class. Children restrict to their
    /// class, take a member id as identity, re-arm the timer, and
    /// continue; the parent reaps each child to completion, restricts
    /// to the primary class, and continues. Returns the index of the
    /// class this process goes on with.
    fn fork_eqclass<T>(
        &mut self,
        from: u32,
        to: u32,
        classes: &[Eqclass<T>],
    ) -> Result<usize, RuntimeError> {
        for (i, class) in classes.iter().enumerate().skip(1) {
            std::io::stdout().flush().ok();

            let pid = unsafe { libc::fork() };
            if pid < 0 {
                return Err(RuntimeError::ForkFailed);
            }

            if pid == 0 {
                self.restrict_to_class(from, to, &class.ids);
                self.mutation_id = class.ids[0];
                self.arm_timer();
                return Ok(i);
            }

            let mut status: libc::c_int = 0;
            unsafe {
                libc::waitpid(pid, &mut status, 0);
            }
        }

        self.restrict_to_class(from, to, &classes[0].ids);
        Ok(0)
    }

    fn dispatch_value<F>(
        &mut self,
        from: u32,
        to: u32,
        ori: i64,
        eval: F,
    ) -> Result<Dispatched, RuntimeError>
    where
        F: Fn(&Mutation) -> Result<i64, RuntimeError>,
    {
        let cands = match self.candidates(from, to, ori, eval)? {
            None => return Ok(Dispatched::Original(ori)),
            Some(cands) => cands,
        };

        if cands.len() == 1 && cands[0].0 == 0 {
            return Ok(Dispatched::Original(ori));
        }

        let classes = divide_eqclass(&cands);
        if classes.len() == 1 {
            return Ok(Dispatched::Resolved(classes[0].value));
        }

        let idx = self.fork_eqclass(from, to, &classes)?;
        Ok(Dispatched::Resolved(classes[idx].value))
    }

    // entry points

    pub fn process_i32_arith(
        &mut self,
        from: u32,
        to: u32,
        l: i32,
        r: i32,
    ) -> Result<i32, RuntimeError> {
        let op = self.site_tag(from, to)?;
        let ori = cal_i32_arith(op, l, r)? as i64;

        match self.dispatch_value(from, to, ori, |m| arith_candidate_i32(m, l, r))? {
            Dispatched::Original(v) | Dispatched::Resolved(v) => Ok(v as i32),
        }
    }

    pub fn process_i64_arith(
        &mut self,
        from: u32,
        to: u32,
        l: i64,
        r: i64,
    ) -> Result<i64, RuntimeError> {
        let op = self.site_tag(from, to)?;
        let ori = cal_i64_arith(op, l, r)?;

        match self.dispatch_value(from, to, ori, |m| arith_candidate_i64(m, l, r))? {
            Dispatched::Original(v) | Dispatched::Resolved(v) => Ok(v),
        }
    }

    pub fn process_i32_cmp(
        &mut self,
        from: u32,
        to: u32,
        l: i32,
        r: i32,
    ) -> Result<i32, RuntimeError> {
        let pre = self.site_tag(from, to)?;
        let ori = cal_i32_bool(pre, l, r)? as i64;

        match self.dispatch_value(from, to, ori, |m| cmp_candidate_i32(m, pre, l, r))? {
            Dispatched::Original(v) | Dispatched::Resolved(v) => Ok(v as i32),
        }
    }

    pub fn process_i64_cmp(
        &mut self,
        from: u32,
        to: u32,
        l: i64,
        r: i64,
    ) -> Result<i32, RuntimeError> {
        let pre = self.site_tag(from, to)?;
        let ori = cal_i64_bool(pre, l, r)? as i64;

        match self.dispatch_value(from, to, ori, |m| cmp_candidate_i64(m, pre, l, r))? {
            Dispatched::Original(v) | Dispatched::Resolved(v) => Ok(v as i32),
        }
    }

    /// Store dispatch: nonzero means the caller must still perform the
    /// original store; 0 means the resolved value has been written
    /// through `addr` on this process's path.
    pub fn prepare_st_i32(
        &mut self,
        from: u32,
        to: u32,
        val: i32,
        addr: i64,
        mem: &mut Mem,
    ) -> Result<i32, RuntimeError> {
        match self.dispatch_value(from, to, val as i64, |m| {
            store_candidate(m).map(|v| (v as i32) as i64)
        })? {
            Dispatched::Original(_) => Ok(1),
            Dispatched::Resolved(v) => {
                mem.store_i32(addr, v as i32)?;
                Ok(0)
            }
        }
    }

    pub fn prepare_st_i64(
        &mut self,
        from: u32,
        to: u32,
        val: i64,
        addr: i64,
        mem: &mut Mem,
    ) -> Result<i32, RuntimeError> {
        match self.dispatch_value(from, to, val, store_candidate)? {
            Dispatched::Original(_) => Ok(1),
            Dispatched::Resolved(v) => {
                mem.store_i64(addr, v)?;
                Ok(0)
            }
        }
    }

    /// Call dispatch: 0 means "perform the original call", 1 means a
    /// substitute return value is parked for `__stdcall_*`. Statement
    /// deletion happens here: the substitute for an active STD mutant
    /// is 0, typed per the record's return-type tag.
    pub fn prepare_call(&mut self, from: u32, to: u32) -> Result<i32, RuntimeError> {
        let eval = |m: &Mutation| match &m.kind {
            MutKind::Std { .. } => Ok(Some(0i64)),
            other => Err(RuntimeError::BadDispatch(format!(
                "{} mutation at a call site",
                other.tag()
            ))),
        };

        let cands = match self.candidates(from, to, None, eval)? {
            None => return Ok(0),
            Some(cands) => cands,
        };

        if cands.len() == 1 && cands[0].0 == 0 {
            return Ok(0);
        }

        let classes = divide_eqclass(&cands);
        let idx = if classes.len() == 1 {
            0
        } else {
            self.fork_eqclass(from, to, &classes)?
        };

        match classes[idx].value {
            None => Ok(0),
            Some(v) => {
                let rep = classes[idx].ids[0];
                let f_tp = match &self.mutation(rep)?.kind {
                    MutKind::Std { f_tp, .. } => *f_tp,
                    other => {
                        return Err(RuntimeError::BadDispatch(format!(
                            "{} mutation at a call site",
                            other.tag()
                        )));
                    }
                };

                self.pending_sub = Some(match f_tp {
                    INT_TP => SubValue::I32(v as i32),
                    LONG_TP => SubValue::I64(v),
                    VOID_TP => SubValue::Void,
                    _ => {
                        return Err(RuntimeError::BadDispatch(format!(
                            "return-type tag {} on STD record",
                            f_tp
                        )));
                    }
                });

                Ok(1)
            }
        }
    }

    pub fn stdcall_i32(&mut self) -> Result<i32, RuntimeError> {
        match self.pending_sub.take() {
            Some(SubValue::I32(v)) => Ok(v),
            other => Err(RuntimeError::BadDispatch(format!(
                "stdcall_i32 without a parked i32 substitute ({:?})",
                other
            ))),
        }
    }

    pub fn stdcall_i64(&mut self) -> Result<i64, RuntimeError> {
        match self.pending_sub.take() {
            Some(SubValue::I64(v)) => Ok(v),
            other => Err(RuntimeError::BadDispatch(format!(
                "stdcall_i64 without a parked i64 substitute ({:?})",
                other
            ))),
        }
    }

    pub fn stdcall_void(&mut self) -> Result<(), RuntimeError> {
        match self.pending_sub.take() {
            Some(SubValue::Void) => Ok(()),
            other => Err(RuntimeError::BadDispatch(format!(
                "stdcall_void without a parked void substitute ({:?})",
                other
            ))),
        }
    }
}

/// Group candidates sharing a value, first-appearance order. The class
/// of the first candidate is the primary class: in the root that is the
/// original-valued one, since the root's first candidate is id 0.
fn divide_eqclass<T: Copy + PartialEq>(cands: &[(u32, T)]) -> Vec<Eqclass<T>> {
    let mut classes: Vec<Eqclass<T>> = vec![];

    for (id, value) in cands.iter() {
        match classes.iter_mut().find(|c| c.value == *value) {
            Some(class) => class.ids.push(*id),
            None => classes.push(Eqclass {
                value: *value,
                ids: vec![*id],
            }),
        }
    }

    classes
}

fn arith_candidate_i32(m: &Mutation, l: i32, r: i32) -> Result<i64, RuntimeError> {
    match &m.kind {
        MutKind::Aor { t_op, .. } | MutKind::Lor { t_op, .. } => {
            Ok(cal_i32_arith(t_op.tag(), l, r)? as i64)
        }
        MutKind::Lvr { op, op_index, t_con, .. } => {
            let (a, b) = if *op_index == 0 {
                (*t_con as i32, r)
            } else {
                (l, *t_con as i32)
            };
            Ok(cal_i32_arith(*op, a, b)? as i64)
        }
        other => Err(RuntimeError::BadDispatch(format!(
            "{} mutation at an arithmetic site",
            other.tag()
        ))),
    }
}

fn arith_candidate_i64(m: &Mutation, l: i64, r: i64) -> Result<i64, RuntimeError> {
    match &m.kind {
        MutKind::Aor { t_op, .. } | MutKind::Lor { t_op, .. } => cal_i64_arith(t_op.tag(), l, r),
        MutKind::Lvr { op, op_index, t_con, .. } => {
            let (a, b) = if *op_index == 0 { (*t_con, r) } else { (l, *t_con) };
            cal_i64_arith(*op, a, b)
        }
        other => Err(RuntimeError::BadDispatch(format!(
            "{} mutation at an arithmetic site",
            other.tag()
        ))),
    }
}

fn cmp_candidate_i32(m: &Mutation, site_pre: i32, l: i32, r: i32) -> Result<i64, RuntimeError> {
    match &m.kind {
        MutKind::Ror { t_pre, .. } => Ok(cal_i32_bool(t_pre.tag(), l, r)? as i64),
        MutKind::Lvr { op_index, t_con, .. } => {
            let (a, b) = if *op_index == 0 {
                (*t_con as i32, r)
            } else {
                (l, *t_con as i32)
            };
            Ok(cal_i32_bool(site_pre, a, b)? as i64)
        }
        other => Err(RuntimeError::BadDispatch(format!(
            "{} mutation at a comparison site",
            other.tag()
        ))),
    }
}

fn cmp_candidate_i64(m: &Mutation, site_pre: i32, l: i64, r: i64) -> Result<i64, RuntimeError> {
    match &m.kind {
        MutKind::Ror { t_pre, .. } => Ok(cal_i64_bool(t_pre.tag(), l, r)? as i64),
        MutKind::Lvr { op_index, t_con, .. } => {
            let (a, b) = if *op_index == 0 { (*t_con, r) } else { (l, *t_con) };
            Ok(cal_i64_bool(site_pre, a, b)? as i64)
        }
        other => Err(RuntimeError::BadDispatch(format!(
            "{} mutation at a comparison site",
            other.tag()
        ))),
    }
}

fn store_candidate(m: &Mutation) -> Result<i64, RuntimeError> {
    match &m.kind {
        MutKind::Lvr { t_con, .. } => Ok(*t_con),
        other => Err(RuntimeError::BadDispatch(format!(
            "{} mutation at a store site",
            other.tag()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::generator::MutationGen;
    use crate::parser::parse_module;

    fn ctx_for(src: &str) -> RuntimeCtx {
        let module = parse_module(src).unwrap();
        let mut gen = MutationGen::new();
        gen.run_on_module(&module);
        RuntimeCtx::init(&gen.into_catalog())
    }

    fn add_site_ctx() -> RuntimeCtx {
        // one add site: 6 AOR mutations, ids 1..=6
        ctx_for(
            "func @main() -> void {\n\
             entry:\n  %0 = add i32 %1, %2\n  ret\n}\n",
        )
    }

    #[test]
    fn root_with_empty_set_returns_original() {
        let mut ctx = add_site_ctx();
        ctx.clear_active();

        assert!(ctx.process_i32_arith(1, 6, 6, 2).unwrap() == 8);
        assert!(ctx.mutation_id() == 0);
    }

    #[test]
    fn single_mutant_mode_applies_its_mutation_without_forking() {
        // id 1 = add->sub
        let mut ctx = add_site_ctx();
        ctx.set_single_mutant(1);

        assert!(ctx.process_i32_arith(1, 6, 6, 2).unwrap() == 4);
        assert!(ctx.mutation_id() == 1);
    }

    #[test]
    fn forked_process_outside_range_returns_original() {
        let mut ctx = add_site_ctx();
        ctx.set_single_mutant(3);

        // a sub-range that excludes id 3: this lineage takes the
        // original value and keeps its identity
        assert!(ctx.process_i32_arith(1, 2, 6, 2).unwrap() == 8);
        assert!(ctx.mutation_id() == 3);
        assert!(ctx.forked_active == vec![3]);
    }

    #[test]
    fn equivalent_mutants_collapse_into_one_class() {
        // sdiv and udiv of 6/2 both yield 3: candidates for a single
        // class must not fork
        let mut ctx = add_site_ctx();
        ctx.set_single_mutant(3); // placeholder identity
        ctx.forked_active = vec![3, 4]; // udiv, sdiv

        assert!(ctx.process_i32_arith(1, 6, 6, 2).unwrap() == 3);
        // both stayed in this lineage
        assert!(ctx.forked_active == vec![3, 4]);
    }

    #[test]
    fn store_dispatch_protocol() {
        let mut ctx = ctx_for(
            "func @main() -> void {\n\
             entry:\n  %0 = alloca i32\n  store i32 42, %0\n  ret\n}\n",
        );
        let mut mem = Mem::new();
        let addr = mem.alloc();

        // baseline root: original store still required
        ctx.clear_active();
        assert!(ctx.prepare_st_i32(1, 5, 42, addr, &mut mem).unwrap() == 1);

        // single-mutant fork: dispatcher writes t_con (id 1 -> 41)
        ctx.set_single_mutant(1);
        assert!(ctx.prepare_st_i32(1, 5, 42, addr, &mut mem).unwrap() == 0);
        assert!(mem.load_i32(addr).unwrap() == 41);
    }

    #[test]
    fn call_dispatch_parks_typed_substitute() {
        let mut ctx = ctx_for(
            "func @main() -> void {\n\
             entry:\n  %0 = call i32 @get()\n  ret\n}\n",
        );

        // root with the STD mutant inactive: do the original call
        ctx.clear_active();
        assert!(ctx.prepare_call(1, 1).unwrap() == 0);

        // fork owning the STD mutant: substitute ready
        ctx.set_single_mutant(1);
        assert!(ctx.prepare_call(1, 1).unwrap() == 1);
        assert!(ctx.stdcall_i32().unwrap() == 0);

        // substitute is consumed
        assert!(ctx.stdcall_i32().is_err());
    }

    #[test]
    fn cmp_lvr_uses_site_predicate_with_substituted_operand() {
        let mut ctx = ctx_for(
            "func @main() -> void {\n\
             entry:\n  %0 = icmp sgt i32 %1, 10\n  ret\n}\n",
        );

        // ROR targets: sge(1), slt(2), sle(3); LVR on operand 1:
        // 9(4), 11(5), 0(6), 1(7), -1(8)
        assert!(ctx.max_id() == 8);

        // x = 10: original sgt 10 -> false; LVR -> 9 makes it true
        ctx.set_single_mutant(4);
        assert!(ctx.process_i32_cmp(1, 8, 10, 10).unwrap() == 1);

        // LVR -> 11 keeps it false
        let mut ctx2 = ctx_for(
            "func @main() -> void {\n\
             entry:\n  %0 = icmp sgt i32 %1, 10\n  ret\n}\n",
        );
        ctx2.set_single_mutant(5);
        assert!(ctx2.process_i32_cmp(1, 8, 10, 10).unwrap() == 0);
    }

    #[test]
    fn divide_eqclass_groups_by_value() {
        let cands = vec![(0u32, 8i64), (1, 4), (2, 12), (3, 3), (4, 3), (5, 0), (6, 0)];
        let classes = divide_eqclass(&cands);

        assert!(classes.len() == 5);
        assert!(classes[0].ids == vec![0]);
        assert!(classes[3].value == 3);
        assert!(classes[3].ids == vec![3, 4]);
        assert!(classes[4].ids == vec![5, 6]);
    }

    #[test]
    fn site_tag_recovered_from_lvr_only_ranges() {
        let ctx = ctx_for(
            "func @main() -> void {\n\
             entry:\n  %0 = alloca i32\n  store i32 42, %0\n  ret\n}\n",
        );

        // store sites carry only LVR records; the recorded tag is the
        // store tag
        assert!(ctx.site_tag(1, 5).unwrap() == crate::ir::STORE_OP_TAG);
    }

    #[test]
    fn unknown_mutation_id_in_range_is_fatal() {
        let ctx = add_site_ctx();
        assert!(ctx.mutation(9).is_err());
    }

    #[test]
    fn catalog_round_trip_feeds_the_runtime() {
        let module = parse_module(
            "func @main() -> void {\n\
             entry:\n  %0 = add i32 %1, %2\n  ret\n}\n",
        )
        .unwrap();
        let mut gen = MutationGen::new();
        gen.run_on_module(&module);
        let catalog = gen.into_catalog();

        let mut buf = vec![];
        catalog.write_to(&mut buf).unwrap();
        let reloaded = Catalog::read_from(&buf[..]).unwrap();

        let mut ctx = RuntimeCtx::init(&reloaded);
        ctx.set_single_mutant(2); // add -> mul
        assert!(ctx.process_i32_arith(1, 6, 6, 2).unwrap() == 12);
    }
}
