mod error;

pub use error::CatalogError;

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use serde::Serialize;

use crate::config::MAXMUTNUM;
use crate::ir::{Opcode, Pred};

/// One point perturbation, tagged by operator kind. The variant carries
/// exactly the fields its catalog tail persists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MutKind {
    Aor { s_op: Opcode, t_op: Opcode },
    Lor { s_op: Opcode, t_op: Opcode },
    Ror { op: i32, s_pre: Pred, t_pre: Pred },
    /// Reserved slot: shift-operator replacement is representable but
    /// never generated.
    Sor,
    /// Reserved slot: conditional-operator replacement.
    Cor,
    Std { op: i32, f_tp: i32 },
    Lvr { op: i32, op_index: u32, s_con: i64, t_con: i64 },
}

impl MutKind {
    pub fn tag(&self) -> &'static str {
        match self {
            MutKind::Aor { .. } => "AOR",
            MutKind::Lor { .. } => "LOR",
            MutKind::Ror { .. } => "ROR",
            MutKind::Sor => "SOR",
            MutKind::Cor => "COR",
            MutKind::Std { .. } => "STD",
            MutKind::Lvr { .. } => "LVR",
        }
    }

    /// The original instruction's opcode/predicate tag, as persisted by
    /// this record. Every record at a site carries it, so the runtime
    /// can recover the site's original operation from any of them.
    pub fn site_tag(&self) -> Option<i32> {
        match self {
            MutKind::Aor { s_op, .. } | MutKind::Lor { s_op, .. } => Some(s_op.tag()),
            MutKind::Ror { s_pre, .. } => Some(s_pre.tag()),
            MutKind::Std { op, .. } | MutKind::Lvr { op, .. } => Some(*op),
            MutKind::Sor | MutKind::Cor => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mutation {
    pub id: u32,
    pub func: String,
    pub index: u32,
    pub kind: MutKind,
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.id,
            self.kind.tag(),
            self.func,
            self.index
        )?;

        match &self.kind {
            MutKind::Aor { s_op, t_op } | MutKind::Lor { s_op, t_op } => {
                write!(f, ":{}:{}", s_op.tag(), t_op.tag())
            }
            MutKind::Ror { op, s_pre, t_pre } => {
                write!(f, ":{}:{}:{}", op, s_pre.tag(), t_pre.tag())
            }
            MutKind::Sor | MutKind::Cor => Ok(()),
            MutKind::Std { op, f_tp } => write!(f, ":{}:{}", op, f_tp),
            MutKind::Lvr { op, op_index, s_con, t_con } => {
                write!(f, ":{}:{}:{}:{}", op, op_index, s_con, t_con)
            }
        }
    }
}

impl Mutation {
    /// Parse one catalog line, `<id>:<KIND>:<func>:<index>:<tail>`.
    pub fn parse_line(line_no: usize, line: &str) -> Result<Self, CatalogError> {
        let malformed = |reason: &str| CatalogError::Malformed {
            line: line_no,
            reason: reason.to_string(),
        };

        let mut parts = line.trim().split(':');
        let id = parts
            .next()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| malformed("bad id"))?;

        if id == 0 || id as usize > MAXMUTNUM {
            return Err(CatalogError::IdOutOfRange { line: line_no, id });
        }

        let tag = parts.next().ok_or_else(|| malformed("missing kind"))?;
        let func = parts
            .next()
            .ok_or_else(|| malformed("missing function name"))?
            .to_string();
        let index = parts
            .next()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| malformed("bad instruction index"))?;

        fn next_i32<'s>(
            parts: &mut impl Iterator<Item = &'s str>,
            line: usize,
            what: &str,
        ) -> Result<i32, CatalogError> {
            parts
                .next()
                .and_then(|s| s.parse::<i32>().ok())
                .ok_or_else(|| CatalogError::Malformed {
                    line,
                    reason: what.to_string(),
                })
        }

        fn next_i64<'s>(
            parts: &mut impl Iterator<Item = &'s str>,
            line: usize,
            what: &str,
        ) -> Result<i64, CatalogError> {
            parts
                .next()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| CatalogError::Malformed {
                    line,
                    reason: what.to_string(),
                })
        }

        let kind = match tag {
            "AOR" | "LOR" => {
                let s_op = Opcode::from_tag(next_i32(&mut parts, line_no, "bad source opcode")?)
                    .ok_or_else(|| malformed("unknown source opcode"))?;
                let t_op = Opcode::from_tag(next_i32(&mut parts, line_no, "bad target opcode")?)
                    .ok_or_else(|| malformed("unknown target opcode"))?;

                if tag == "AOR" {
                    MutKind::Aor { s_op, t_op }
                } else {
                    MutKind::Lor { s_op, t_op }
                }
            }
            "ROR" => {
                let op = next_i32(&mut parts, line_no, "bad opcode")?;
                let s_pre =
                    Pred::from_tag(next_i32(&mut parts, line_no, "bad source predicate")?)
                        .ok_or_else(|| malformed("unknown source predicate"))?;
                let t_pre =
                    Pred::from_tag(next_i32(&mut parts, line_no, "bad target predicate")?)
                        .ok_or_else(|| malformed("unknown target predicate"))?;

                MutKind::Ror { op, s_pre, t_pre }
            }
            "SOR" => MutKind::Sor,
            "COR" => MutKind::Cor,
            "STD" => {
                let op = next_i32(&mut parts, line_no, "bad opcode")?;
                let f_tp = next_i32(&mut parts, line_no, "bad return-type tag")?;

                MutKind::Std { op, f_tp }
            }
            "LVR" => {
                let op = next_i32(&mut parts, line_no, "bad opcode")?;
                let op_index = next_i32(&mut parts, line_no, "bad operand index")? as u32;
                let s_con = next_i64(&mut parts, line_no, "bad source constant")?;
                let t_con = next_i64(&mut parts, line_no, "bad target constant")?;

                MutKind::Lvr { op, op_index, s_con, t_con }
            }
            _ => return Err(malformed("unknown mutation kind")),
        };

        if parts.next().is_some() {
            return Err(malformed("trailing fields"));
        }

        Ok(Mutation { id, func, index, kind })
    }
}

/// The full catalog for one compilation unit, in id order.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    muts: Vec<Mutation>,
}

impl Catalog {
    pub fn from_mutations(muts: Vec<Mutation>) -> Self {
        Self { muts }
    }

    pub fn len(&self) -> usize {
        self.muts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.muts.is_empty()
    }

    pub fn max_id(&self) -> u32 {
        self.muts.last().map(|m| m.id).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.muts.iter()
    }

    /// Lookup by id. Ids are dense starting at 1, so this is an index.
    pub fn get(&self, id: u32) -> Option<&Mutation> {
        if id == 0 {
            return None;
        }
        self.muts.get(id as usize - 1)
    }

    /// Group mutations by containing function, preserving catalog order
    /// within each group.
    pub fn by_func(&self) -> HashMap<&str, Vec<&Mutation>> {
        let mut map: HashMap<&str, Vec<&Mutation>> = HashMap::new();

        for m in self.muts.iter() {
            map.entry(m.func.as_str()).or_default().push(m);
        }

        map
    }

    pub fn write_to(&self, out: &mut impl Write) -> std::io::Result<()> {
        for m in self.muts.iter() {
            writeln!(out, "{}", m)?;
        }

        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| CatalogError::Io(format!("{}: {}", dir.display(), e)))?;
        }

        let mut file = File::create(path)
            .map_err(|e| CatalogError::Io(format!("{}: {}", path.display(), e)))?;

        self.write_to(&mut file)
            .map_err(|e| CatalogError::Io(format!("{}: {}", path.display(), e)))
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let file = File::open(path)
            .map_err(|e| CatalogError::Io(format!("{}: {}", path.display(), e)))?;

        Self::read_from(BufReader::new(file))
    }

    pub fn read_from(reader: impl BufRead) -> Result<Self, CatalogError> {
        let mut muts = vec![];

        for (n, line) in reader.lines().enumerate() {
            let line_no = n + 1;
            let line = line.map_err(|e| CatalogError::Io(e.to_string()))?;

            if line.trim().is_empty() {
                continue;
            }

            let m = Mutation::parse_line(line_no, &line)?;

            // Ids are dense in catalog order; anything else means the
            // file was not produced by the generator.
            if m.id as usize != muts.len() + 1 {
                return Err(CatalogError::Malformed {
                    line: line_no,
                    reason: format!("id {} breaks the dense sequence", m.id),
                });
            }

            muts.push(m);
        }

        Ok(Self { muts })
    }
}

/// `$HOME/tmp/accmut/mutations.txt`
pub fn default_catalog_path() -> Result<PathBuf, CatalogError> {
    let home = std::env::var("HOME").map_err(|_| CatalogError::NoHome)?;

    Ok(PathBuf::from(home).join("tmp").join("accmut").join("mutations.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ICMP_OP_TAG, INT_TP, STORE_OP_TAG};
    use pretty_assertions::assert_eq;

    fn sample() -> Vec<Mutation> {
        vec![
            Mutation {
                id: 1,
                func: "main".to_string(),
                index: 3,
                kind: MutKind::Aor { s_op: Opcode::Add, t_op: Opcode::Sub },
            },
            Mutation {
                id: 2,
                func: "main".to_string(),
                index: 3,
                kind: MutKind::Lvr { op: Opcode::Add.tag(), op_index: 1, s_con: 2, t_con: 0 },
            },
            Mutation {
                id: 3,
                func: "main".to_string(),
                index: 5,
                kind: MutKind::Ror { op: ICMP_OP_TAG, s_pre: Pred::Sgt, t_pre: Pred::Slt },
            },
            Mutation {
                id: 4,
                func: "helper".to_string(),
                index: 0,
                kind: MutKind::Std { op: 5, f_tp: INT_TP },
            },
            Mutation {
                id: 5,
                func: "helper".to_string(),
                index: 2,
                kind: MutKind::Lvr { op: STORE_OP_TAG, op_index: 0, s_con: 42, t_con: 41 },
            },
        ]
    }

    #[test]
    fn serialization_round_trips() {
        let catalog = Catalog::from_mutations(sample());
        let mut buf = vec![];
        catalog.write_to(&mut buf).unwrap();

        let reparsed = Catalog::read_from(&buf[..]).unwrap();
        assert_eq!(catalog, reparsed);
    }

    #[test]
    fn line_format_is_stable() {
        let muts = sample();

        assert_eq!(muts[0].to_string(), "1:AOR:main:3:14:16");
        assert_eq!(muts[1].to_string(), "2:LVR:main:3:14:1:2:0");
        assert_eq!(muts[2].to_string(), "3:ROR:main:5:11:38:40");
        assert_eq!(muts[3].to_string(), "4:STD:helper:0:5:2");
        assert_eq!(muts[4].to_string(), "5:LVR:helper:2:3:0:42:41");
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(Mutation::parse_line(1, "x:AOR:f:0:14:16").is_err());
        assert!(Mutation::parse_line(1, "1:XXX:f:0:14:16").is_err());
        assert!(Mutation::parse_line(1, "1:AOR:f:0:14").is_err());
        assert!(Mutation::parse_line(1, "1:AOR:f:0:14:16:99").is_err());
        assert!(Mutation::parse_line(1, "1:ROR:f:0:11:38:99").is_err());
    }

    #[test]
    fn rejects_out_of_range_ids() {
        assert!(matches!(
            Mutation::parse_line(1, "0:AOR:f:0:14:16"),
            Err(CatalogError::IdOutOfRange { .. })
        ));
        assert!(matches!(
            Mutation::parse_line(1, "10001:AOR:f:0:14:16"),
            Err(CatalogError::IdOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_gapped_ids() {
        let text = "1:AOR:f:0:14:16\n3:AOR:f:1:14:18\n";
        assert!(Catalog::read_from(text.as_bytes()).is_err());
    }

    #[test]
    fn by_func_preserves_order() {
        let catalog = Catalog::from_mutations(sample());
        let map = catalog.by_func();

        let main_ids: Vec<u32> = map["main"].iter().map(|m| m.id).collect();
        assert_eq!(main_ids, vec![1, 2, 3]);

        let helper_ids: Vec<u32> = map["helper"].iter().map(|m| m.id).collect();
        assert_eq!(helper_ids, vec![4, 5]);
    }
}
