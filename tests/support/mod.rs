#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use treedelta::manifest::{blob_name, MANIFEST_FILE};
use treedelta::tree::{list_tree, tree_digest};
use treedelta::{BlockDelta, Manifest, PatchConfig, TocRecord};

pub fn create_dir_tree(root: &Path, files: &[(&str, &[u8])]) {
    fs::create_dir_all(root).unwrap();
    for (rel_path, content) in files {
        let full = root.join(rel_path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full, content).unwrap();
    }
}

/// Every regular file under `root` as (relative path, bytes), sorted by path.
pub fn collect_dir_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::new();
    collect_recursive(root, root, &mut entries);
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

fn collect_recursive(root: &Path, current: &Path, entries: &mut Vec<(String, Vec<u8>)>) {
    for entry in fs::read_dir(current).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_recursive(root, &path, entries);
        } else {
            let rel = path
                .strip_prefix(root)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_str().unwrap())
                .collect::<Vec<_>>()
                .join("/");
            entries.push((rel, fs::read(&path).unwrap()));
        }
    }
}

pub fn copy_dir_recursive(src: &Path, dst: &Path) {
    fs::create_dir_all(dst).unwrap();
    for entry in fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path);
        } else {
            fs::copy(&src_path, &dst_path).unwrap();
        }
    }
}

/// Deterministic pseudo-random bytes.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// `base` with a handful of bytes flipped and a short run inserted.
pub fn tweak(base: &[u8], seed: u8) -> Vec<u8> {
    let mut out = base.to_vec();
    for pos in [100, base.len() / 3, base.len() / 2] {
        out[pos] ^= 0x5A ^ seed;
    }
    let at = base.len() * 3 / 4;
    out.splice(at..at, vec![seed; 37]);
    out
}

pub fn read_manifest(package: &Path) -> Manifest {
    Manifest::parse(&fs::read_to_string(package.join(MANIFEST_FILE)).unwrap()).unwrap()
}

pub fn record_lines(manifest: &Manifest) -> Vec<String> {
    manifest.records.iter().map(ToString::to_string).collect()
}

fn remove_and_prune(root: &Path, rel: &str) {
    let full = root.join(rel);
    match fs::remove_file(&full) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => panic!("remove {}: {e}", full.display()),
    }
    let mut dir = full.parent();
    while let Some(d) = dir {
        if d == root || fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

/// Reference applier: rebuild the after tree from `before` and `package` into
/// `dest`, reading every delta source from the untouched `before` tree.
pub fn apply_package(before: &Path, package: &Path, dest: &Path) -> Manifest {
    let manifest = read_manifest(package);

    let blob_files = fs::read_dir(package)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name() != MANIFEST_FILE)
        .count();
    assert_eq!(blob_files, manifest.blob_count(), "blob count mismatch");

    copy_dir_recursive(before, dest);

    let write = |rel: &str, data: &[u8]| {
        let full = dest.join(rel);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, data).unwrap();
    };
    let patched = |source: &str, id: u64| -> Vec<u8> {
        let old = fs::read(before.join(source)).unwrap();
        let delta = fs::read(package.join(blob_name(id))).unwrap();
        BlockDelta::apply(&old, &delta).unwrap()
    };

    let mut changed_in_place = HashSet::new();
    let mut rename_sources = Vec::new();
    for record in &manifest.records {
        match record {
            TocRecord::Remove { path } => remove_and_prune(dest, path),
            TocRecord::Add { id, path } => {
                write(path, &fs::read(package.join(blob_name(*id))).unwrap())
            }
            TocRecord::ChangeInPlace { id, path } => {
                write(path, &patched(path, *id));
                changed_in_place.insert(path.clone());
            }
            TocRecord::Rename { id, source, target } => {
                write(target, &patched(source, *id));
                rename_sources.push(source.clone());
            }
        }
    }
    for source in rename_sources {
        if !changed_in_place.contains(&source) {
            remove_and_prune(dest, &source);
        }
    }

    let rebuilt = tree_digest(&list_tree(dest).unwrap()).unwrap();
    assert_eq!(
        rebuilt, manifest.integrity.tree_digest,
        "integrity line does not match the rebuilt tree"
    );
    manifest
}

/// Before/after trees plus an output location inside one temp dir.
pub struct Fixture {
    pub dir: TempDir,
    pub before: PathBuf,
    pub after: PathBuf,
    pub output: PathBuf,
}

impl Fixture {
    pub fn new(before: &[(&str, &[u8])], after: &[(&str, &[u8])]) -> Self {
        let dir = TempDir::new().unwrap();
        let before_dir = dir.path().join("before");
        let after_dir = dir.path().join("after");
        create_dir_tree(&before_dir, before);
        create_dir_tree(&after_dir, after);
        Self {
            output: dir.path().join("patch"),
            before: before_dir,
            after: after_dir,
            dir,
        }
    }

    pub fn config(&self) -> PatchConfig {
        PatchConfig::new(&self.output).with_library_suffixes([".so"])
    }

    /// Apply the produced package and check the result equals the after tree.
    pub fn round_trip(&self) -> Manifest {
        let dest = self.dir.path().join("rebuilt");
        let _ = fs::remove_dir_all(&dest);
        let manifest = apply_package(&self.before, &self.output, &dest);
        assert_eq!(collect_dir_tree(&dest), collect_dir_tree(&self.after));
        manifest
    }
}
