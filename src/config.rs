// Crate-wide tuning constants. The numeric values are load-bearing:
// MAXMUTNUM bounds catalog parsing, the timer values arm ITIMER_PROF in
// forked children, and the exit codes are how the enclosing harness
// tells apart the ways a mutant process can die.

pub const MAXMUTNUM: usize = 10000;
pub const MAX_MUT_NUM_PER_LOCATION: usize = 32;

// ITIMER_PROF period for forked children: first fire and re-fire.
pub const VALUE_SEC: i64 = 2;
pub const VALUE_USEC: i64 = 0;
pub const INTERVAL_SEC: i64 = 2;
pub const INTERVAL_USEC: i64 = 0;

pub const CONFIG_ERR: i32 = 65;
pub const OPCD_ERR: i32 = 66;
pub const FORK_ERR: i32 = 67;
pub const TIMEOUT_EXIT: i32 = 68;
