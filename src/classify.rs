use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::Result;
use crate::tree::FileEntry;

/// The same relative path in both trees.
#[derive(Debug, Clone, Copy)]
pub struct FilePair<'a> {
    pub before: &'a FileEntry,
    pub after: &'a FileEntry,
}

impl<'a> FilePair<'a> {
    pub fn path(&self) -> &'a str {
        &self.after.relative_path
    }
}

/// Regular files sorted into the four categories. `new`, `changed` and
/// `unchanged` follow the after-listing order; `removed` follows the
/// before-listing order.
#[derive(Debug, Default)]
pub struct Classification<'a> {
    pub new: Vec<&'a FileEntry>,
    pub removed: Vec<&'a FileEntry>,
    pub changed: Vec<FilePair<'a>>,
    pub unchanged: Vec<FilePair<'a>>,
}

/// Classify regular files of the before tree against the after tree.
/// `same_content` decides equality for paths present in both.
pub fn classify<'a, F>(
    before: &[&'a FileEntry],
    after: &[&'a FileEntry],
    mut same_content: F,
) -> Result<Classification<'a>>
where
    F: FnMut(&FileEntry, &FileEntry) -> Result<bool>,
{
    let before_map: HashMap<&str, &'a FileEntry> = before
        .iter()
        .map(|e| (e.relative_path.as_str(), *e))
        .collect();
    let after_paths: HashSet<&str> = after.iter().map(|e| e.relative_path.as_str()).collect();

    let mut out = Classification::default();

    for &entry in after {
        match before_map.get(entry.relative_path.as_str()) {
            None => out.new.push(entry),
            Some(&old) => {
                let pair = FilePair {
                    before: old,
                    after: entry,
                };
                if same_content(old, entry)? {
                    out.unchanged.push(pair);
                } else {
                    out.changed.push(pair);
                }
            }
        }
    }

    out.removed = before
        .iter()
        .copied()
        .filter(|e| !after_paths.contains(e.relative_path.as_str()))
        .collect();

    debug!(
        new = out.new.len(),
        removed = out.removed.len(),
        changed = out.changed.len(),
        unchanged = out.unchanged.len(),
        "classified regular files"
    );
    Ok(out)
}
