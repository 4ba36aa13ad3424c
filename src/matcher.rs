//! Shared-library matching.
//!
//! Build systems stamp version numbers into library file names, so a library
//! that keeps its path is diffed in place and one that doesn't is matched to
//! the before-tree library that yields the smallest delta.

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::classify::FilePair;
use crate::delta::DeltaEncoder;
use crate::error::Result;
use crate::partition::LibraryFilter;
use crate::tree::FileEntry;

/// A library found under a new name in the after tree.
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    pub source: &'a FileEntry,
    pub target: &'a FileEntry,
    pub probed_delta_size: u64,
}

impl<'a> MatchResult<'a> {
    pub fn source_path(&self) -> &'a str {
        &self.source.relative_path
    }

    pub fn target_path(&self) -> &'a str {
        &self.target.relative_path
    }
}

/// Outcome for every library of both trees.
#[derive(Debug, Default)]
pub struct LibraryMatches<'a> {
    /// Same path in both trees, always diffed in place.
    pub changed: Vec<FilePair<'a>>,
    pub renamed: Vec<MatchResult<'a>>,
    /// After-tree libraries with no eligible candidate.
    pub new: Vec<&'a FileEntry>,
    /// Before-tree libraries neither kept by path nor used as a rename source.
    pub removed: Vec<&'a FileEntry>,
}

/// Index and size of the smallest probe. The first minimum wins.
pub fn pick_best(sizes: &[u64]) -> Option<(usize, u64)> {
    let mut best: Option<(usize, u64)> = None;
    for (idx, &size) in sizes.iter().enumerate() {
        match best {
            Some((_, best_size)) if best_size <= size => {}
            _ => best = Some((idx, size)),
        }
    }
    best
}

pub fn match_libraries<'a>(
    before: &[&'a FileEntry],
    after: &[&'a FileEntry],
    filter: &LibraryFilter,
    encoder: &dyn DeltaEncoder,
    parallel: bool,
) -> Result<LibraryMatches<'a>> {
    let before_map: HashMap<&str, &'a FileEntry> = before
        .iter()
        .map(|e| (e.relative_path.as_str(), *e))
        .collect();

    let mut out = LibraryMatches::default();
    let mut unmatched = Vec::new();
    for &lib in after {
        match before_map.get(lib.relative_path.as_str()) {
            Some(&old) => out.changed.push(FilePair {
                before: old,
                after: lib,
            }),
            None => unmatched.push(lib),
        }
    }

    let mut eligible = Vec::with_capacity(before.len());
    for &candidate in before {
        if candidate.size()? > 0 {
            eligible.push(candidate);
        }
    }

    for lib in unmatched {
        let suffix = filter.suffix_of(&lib.relative_path);
        let candidates: Vec<&FileEntry> = eligible
            .iter()
            .copied()
            .filter(|c| filter.suffix_of(&c.relative_path) == suffix)
            .collect();

        let sizes = probe_all(&candidates, lib, encoder, parallel)?;
        match pick_best(&sizes) {
            Some((idx, size)) => {
                let source = candidates[idx];
                info!(
                    library = %lib.relative_path,
                    source = %source.relative_path,
                    delta_size = size,
                    probes = sizes.len(),
                    "matched renamed library"
                );
                out.renamed.push(MatchResult {
                    source,
                    target: lib,
                    probed_delta_size: size,
                });
            }
            None => {
                debug!(library = %lib.relative_path, "no candidate, treating as new");
                out.new.push(lib);
            }
        }
    }

    let after_paths: HashSet<&str> = after.iter().map(|e| e.relative_path.as_str()).collect();
    let sources: HashSet<&str> = out.renamed.iter().map(|m| m.source_path()).collect();
    out.removed = before
        .iter()
        .copied()
        .filter(|e| {
            let path = e.relative_path.as_str();
            !after_paths.contains(path) && !sources.contains(path)
        })
        .collect();

    Ok(out)
}

/// Probe every candidate against `target`, returning sizes in candidate order.
fn probe_all(
    candidates: &[&FileEntry],
    target: &FileEntry,
    encoder: &dyn DeltaEncoder,
    parallel: bool,
) -> Result<Vec<u64>> {
    let probe = |candidate: &&FileEntry| -> Result<u64> {
        let size = encoder.probe(&candidate.full_path, &target.full_path)?;
        debug!(
            source = %candidate.relative_path,
            target = %target.relative_path,
            size,
            "probed delta"
        );
        Ok(size)
    };

    if parallel {
        candidates.par_iter().map(probe).collect()
    } else {
        candidates.iter().map(probe).collect()
    }
}
