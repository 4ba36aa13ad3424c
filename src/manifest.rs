//! Patch manifest (TOC) text format.
//!
//! ```text
//! blake3 <64 hex digits>
//! -<path>
//! +<id> <path>
//! c<id> <path>
//! C<id> <src_path> <dst_path>
//! ```
//!
//! The first line is the integrity line: BLAKE3 over the whole after tree as
//! computed by [`crate::tree::tree_digest`]. Every other line is one record;
//! `+`, `c` and `C` records own blob `f<id>` next to the manifest. Paths are
//! escaped so that spaces never appear inside a path field.
//!
//! All delta sources name before-tree content. Once every record is applied,
//! the source of a `C` record is deleted unless a `c` record names the same
//! path.

use std::fmt;

use crate::error::{PatchError, Result};

pub const MANIFEST_FILE: &str = "toc";
pub const INTEGRITY_TAG: &str = "blake3";

pub fn blob_name(id: u64) -> String {
    format!("f{id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TocRecord {
    Remove { path: String },
    Add { id: u64, path: String },
    ChangeInPlace { id: u64, path: String },
    Rename { id: u64, source: String, target: String },
}

impl TocRecord {
    pub fn id(&self) -> Option<u64> {
        match self {
            TocRecord::Remove { .. } => None,
            TocRecord::Add { id, .. }
            | TocRecord::ChangeInPlace { id, .. }
            | TocRecord::Rename { id, .. } => Some(*id),
        }
    }

    fn parse(line: &str, line_no: usize) -> Result<Self> {
        let err = |reason: String| PatchError::Manifest {
            line: line_no,
            reason,
        };

        let mut chars = line.chars();
        let tag = chars.next().ok_or_else(|| err("empty line".into()))?;
        let rest = chars.as_str();

        if tag == '-' {
            return Ok(TocRecord::Remove {
                path: unescape(rest).map_err(err)?,
            });
        }

        let mut fields = rest.split(' ');
        let id = fields
            .next()
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or_else(|| err(format!("record {tag:?} needs a numeric id")))?;
        let mut path = || -> Result<String> {
            let field = fields
                .next()
                .filter(|f| !f.is_empty())
                .ok_or_else(|| err("missing path".into()))?;
            unescape(field).map_err(err)
        };

        let record = match tag {
            '+' => TocRecord::Add { id, path: path()? },
            'c' => TocRecord::ChangeInPlace { id, path: path()? },
            'C' => {
                let source = path()?;
                let target = path()?;
                TocRecord::Rename { id, source, target }
            }
            other => return Err(err(format!("unknown record tag {other:?}"))),
        };
        if fields.next().is_some() {
            return Err(err("trailing fields".into()));
        }
        Ok(record)
    }
}

impl fmt::Display for TocRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TocRecord::Remove { path } => write!(f, "-{}", escape(path)),
            TocRecord::Add { id, path } => write!(f, "+{id} {}", escape(path)),
            TocRecord::ChangeInPlace { id, path } => write!(f, "c{id} {}", escape(path)),
            TocRecord::Rename { id, source, target } => {
                write!(f, "C{id} {} {}", escape(source), escape(target))
            }
        }
    }
}

/// Leading integrity line of the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Integrity {
    pub tree_digest: blake3::Hash,
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{INTEGRITY_TAG} {}", self.tree_digest.to_hex())
    }
}

impl Integrity {
    fn parse(line: &str) -> Result<Self> {
        let err = |reason: String| PatchError::Manifest { line: 1, reason };
        let (tag, hex) = line
            .split_once(' ')
            .ok_or_else(|| err("missing integrity line".into()))?;
        if tag != INTEGRITY_TAG {
            return Err(err(format!("unsupported digest algorithm {tag:?}")));
        }
        let tree_digest = blake3::Hash::from_hex(hex).map_err(|e| err(e.to_string()))?;
        Ok(Self { tree_digest })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub integrity: Integrity,
    pub records: Vec<TocRecord>,
}

impl Manifest {
    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.integrity);
        for record in &self.records {
            out.push_str(&record.to_string());
            out.push('\n');
        }
        out
    }

    /// Parse manifest text. Ids must run 0, 1, 2, ... in record order.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let integrity = Integrity::parse(lines.next().unwrap_or_default())?;

        let mut records = Vec::new();
        let mut next_id = 0;
        for (idx, line) in lines.enumerate() {
            let line_no = idx + 2;
            let record = TocRecord::parse(line, line_no)?;
            if let Some(id) = record.id() {
                if id != next_id {
                    return Err(PatchError::Manifest {
                        line: line_no,
                        reason: format!("expected id {next_id}, found {id}"),
                    });
                }
                next_id += 1;
            }
            records.push(record);
        }
        Ok(Self { integrity, records })
    }

    /// Number of blob files the package must hold.
    pub fn blob_count(&self) -> usize {
        self.records.iter().filter(|r| r.id().is_some()).count()
    }
}

fn escape(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ' ' => out.push_str("\\s"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(field: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(format!("bad escape \\{other} in {field:?}")),
            None => return Err(format!("dangling escape in {field:?}")),
        }
    }
    if out.is_empty() {
        return Err("empty path".into());
    }
    Ok(out)
}
