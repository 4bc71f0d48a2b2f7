use super::error::RuntimeError;

// Candidate evaluation is two's-complement wrapping throughout, and a
// zero divisor yields the width's max value instead of a fault: a
// mutant that divides by zero must stay observable, not crash the
// process, and the original path gets the same sentinel so the two are
// comparable.

pub fn cal_i32_arith(op: i32, a: i32, b: i32) -> Result<i32, RuntimeError> {
    let r = match op {
        14 => a.wrapping_add(b),
        16 => a.wrapping_sub(b),
        18 => a.wrapping_mul(b),
        20 => {
            if b == 0 {
                return Ok(i32::MAX);
            }
            ((a as u32) / (b as u32)) as i32
        }
        21 => {
            if b == 0 {
                return Ok(i32::MAX);
            }
            a.wrapping_div(b)
        }
        23 => {
            if b == 0 {
                return Ok(i32::MAX);
            }
            ((a as u32) % (b as u32)) as i32
        }
        24 => {
            if b == 0 {
                return Ok(i32::MAX);
            }
            a.wrapping_rem(b)
        }
        26 => a.wrapping_shl(b as u32),
        27 => ((a as u32).wrapping_shr(b as u32)) as i32,
        28 => a.wrapping_shr(b as u32),
        29 => a & b,
        30 => a | b,
        31 => a ^ b,
        _ => return Err(RuntimeError::UnknownOpcode(op)),
    };

    Ok(r)
}

pub fn cal_i64_arith(op: i32, a: i64, b: i64) -> Result<i64, RuntimeError> {
    let r = match op {
        14 => a.wrapping_add(b),
        16 => a.wrapping_sub(b),
        18 => a.wrapping_mul(b),
        20 => {
            if b == 0 {
                return Ok(i64::MAX);
            }
            ((a as u64) / (b as u64)) as i64
        }
        21 => {
            if b == 0 {
                return Ok(i64::MAX);
            }
            a.wrapping_div(b)
        }
        23 => {
            if b == 0 {
                return Ok(i64::MAX);
            }
            ((a as u64) % (b as u64)) as i64
        }
        24 => {
            if b == 0 {
                return Ok(i64::MAX);
            }
            a.wrapping_rem(b)
        }
        26 => a.wrapping_shl(b as u32),
        27 => ((a as u64).wrapping_shr(b as u32)) as i64,
        28 => a.wrapping_shr(b as u32),
        29 => a & b,
        30 => a | b,
        31 => a ^ b,
        _ => return Err(RuntimeError::UnknownOpcode(op)),
    };

    Ok(r)
}

pub fn cal_i32_bool(pre: i32, a: i32, b: i32) -> Result<i32, RuntimeError> {
    let r = match pre {
        32 => a == b,
        33 => a != b,
        34 => (a as u32) > (b as u32),
        35 => (a as u32) >= (b as u32),
        36 => (a as u32) < (b as u32),
        37 => (a as u32) <= (b as u32),
        38 => a > b,
        39 => a >= b,
        40 => a < b,
        41 => a <= b,
        _ => return Err(RuntimeError::UnknownPred(pre)),
    };

    Ok(r as i32)
}

pub fn cal_i64_bool(pre: i32, a: i64, b: i64) -> Result<i32, RuntimeError> {
    let r = match pre {
        32 => a == b,
        33 => a != b,
        34 => (a as u64) > (b as u64),
        35 => (a as u64) >= (b as u64),
        36 => (a as u64) < (b as u64),
        37 => (a as u64) <= (b as u64),
        38 => a > b,
        39 => a >= b,
        40 => a < b,
        41 => a <= b,
        _ => return Err(RuntimeError::UnknownPred(pre)),
    };

    Ok(r as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_follows_the_tag_table() {
        assert!(cal_i32_arith(14, 6, 2).unwrap() == 8);
        assert!(cal_i32_arith(16, 6, 2).unwrap() == 4);
        assert!(cal_i32_arith(18, 6, 2).unwrap() == 12);
        assert!(cal_i32_arith(21, 6, 2).unwrap() == 3);
        assert!(cal_i32_arith(24, 6, 2).unwrap() == 0);
        assert!(cal_i32_arith(26, 1, 4).unwrap() == 16);
        assert!(cal_i32_arith(29, 6, 3).unwrap() == 2);
    }

    #[test]
    fn division_by_zero_is_sentinel_not_signal() {
        assert!(cal_i32_arith(20, 4, 0).unwrap() == i32::MAX);
        assert!(cal_i32_arith(21, 4, 0).unwrap() == i32::MAX);
        assert!(cal_i32_arith(23, 4, 0).unwrap() == i32::MAX);
        assert!(cal_i32_arith(24, 4, 0).unwrap() == i32::MAX);
        assert!(cal_i64_arith(21, 4, 0).unwrap() == i64::MAX);
        assert!(cal_i64_arith(24, 4, 0).unwrap() == i64::MAX);
    }

    #[test]
    fn overflow_wraps() {
        assert!(cal_i32_arith(14, i32::MAX, 1).unwrap() == i32::MIN);
        assert!(cal_i32_arith(21, i32::MIN, -1).unwrap() == i32::MIN);
        assert!(cal_i64_arith(18, i64::MAX, 2).unwrap() == -2);
    }

    #[test]
    fn unsigned_and_signed_compares_differ() {
        assert!(cal_i32_bool(38, -1, 1).unwrap() == 0); // sgt
        assert!(cal_i32_bool(34, -1, 1).unwrap() == 1); // ugt
        assert!(cal_i64_bool(40, -5, 3).unwrap() == 1); // slt
        assert!(cal_i64_bool(36, -5, 3).unwrap() == 0); // ult
    }

    #[test]
    fn unknown_tags_are_fatal() {
        assert!(cal_i32_arith(15, 1, 1) == Err(RuntimeError::UnknownOpcode(15)));
        assert!(cal_i32_bool(50, 1, 1) == Err(RuntimeError::UnknownPred(50)));
    }
}
