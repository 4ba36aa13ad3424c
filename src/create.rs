use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::assemble::{OutputDir, PatchPlan};
use crate::classify::classify;
use crate::config::PatchConfig;
use crate::delta::{BlockDelta, DeltaEncoder};
use crate::error::{PatchError, Result};
use crate::manifest::{Integrity, Manifest};
use crate::matcher::match_libraries;
use crate::partition::{partition, LibraryFilter};
use crate::tree::{self, FileTree};

/// Counts reported after a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    pub files_added: usize,
    pub files_removed: usize,
    pub files_changed: usize,
    pub files_unchanged: usize,
    pub libraries_renamed: usize,
    pub symlinks_skipped: usize,
    pub blob_bytes: u64,
    pub manifest: PathBuf,
    pub tree_digest: blake3::Hash,
}

/// Create a patch package turning `before_dir` into `after_dir`, using the
/// built-in block delta encoder.
pub async fn create_patch(
    before_dir: &Path,
    after_dir: &Path,
    config: &PatchConfig,
) -> Result<PatchSummary> {
    let encoder = Arc::new(BlockDelta::new(config.compression_level));
    create_patch_with(before_dir, after_dir, config, encoder).await
}

/// Same as [`create_patch`] with a caller-supplied delta encoder.
pub async fn create_patch_with(
    before_dir: &Path,
    after_dir: &Path,
    config: &PatchConfig,
    encoder: Arc<dyn DeltaEncoder>,
) -> Result<PatchSummary> {
    // Stage 0: claim the output location before any real work
    check_output_location(&config.output, &[before_dir, after_dir])?;
    let output = OutputDir::prepare(&config.output)?;

    // Stage 1: walk both trees concurrently
    let before_owned = before_dir.to_path_buf();
    let after_owned = after_dir.to_path_buf();
    let (before, after) = tokio::try_join!(
        tokio::task::spawn_blocking(move || tree::list_tree(&before_owned)),
        tokio::task::spawn_blocking(move || tree::list_tree(&after_owned)),
    )?;
    let before = before?;
    let after = after?;
    info!(
        before = before.files.len(),
        after = after.files.len(),
        "listed trees"
    );

    // Stage 2+: classification, matching and assembly are CPU/IO bound
    let config = config.clone();
    tokio::task::spawn_blocking(move || {
        build_package(&before, &after, &config, encoder.as_ref(), output)
    })
    .await?
}

/// Run partition, classification, library matching and assembly over two
/// listed trees, publishing into `output`.
pub fn build_package(
    before: &FileTree,
    after: &FileTree,
    config: &PatchConfig,
    encoder: &dyn DeltaEncoder,
    output: OutputDir,
) -> Result<PatchSummary> {
    let filter = LibraryFilter::new(config.library_suffixes.iter().cloned());
    let before_parts = partition(&before.files, &filter);
    let after_parts = partition(&after.files, &filter);

    let files = classify(&before_parts.regular, &after_parts.regular, tree::same_content)?;
    let libraries = match_libraries(
        &before_parts.libraries,
        &after_parts.libraries,
        &filter,
        encoder,
        config.parallel,
    )?;
    info!(
        new = files.new.len() + libraries.new.len(),
        removed = files.removed.len() + libraries.removed.len(),
        changed = files.changed.len() + libraries.changed.len(),
        renamed = libraries.renamed.len(),
        unchanged = files.unchanged.len(),
        "classified"
    );

    let plan = PatchPlan::build(&files, &libraries);
    let blob_bytes = output.write_blobs(&plan, encoder, config.parallel)?;

    let integrity = Integrity {
        tree_digest: tree::tree_digest(after)?,
    };
    let manifest_path = output.publish(&Manifest {
        integrity,
        records: plan.records,
    })?;
    info!(
        path = %manifest_path.display(),
        blobs = plan.blobs.len(),
        blob_bytes,
        "published patch"
    );

    Ok(PatchSummary {
        files_added: files.new.len() + libraries.new.len(),
        files_removed: files.removed.len() + libraries.removed.len(),
        files_changed: files.changed.len() + libraries.changed.len(),
        files_unchanged: files.unchanged.len(),
        libraries_renamed: libraries.renamed.len(),
        symlinks_skipped: before.symlinks.len() + after.symlinks.len(),
        blob_bytes,
        manifest: manifest_path,
        tree_digest: integrity.tree_digest,
    })
}

/// The output directory is wiped at the start of a run, so it must not be,
/// contain, or sit inside either input tree.
fn check_output_location(output: &Path, inputs: &[&Path]) -> Result<()> {
    let output_abs = absolute(output);
    for input in inputs {
        let input_abs = absolute(input);
        if output_abs.starts_with(&input_abs) || input_abs.starts_with(&output_abs) {
            return Err(PatchError::OutputLocation {
                path: output.to_path_buf(),
                source: std::io::Error::other(format!(
                    "overlaps input tree {}",
                    input.display()
                )),
            });
        }
    }
    Ok(())
}

/// Canonical form of `path`, resolving only the ancestors that exist.
fn absolute(path: &Path) -> PathBuf {
    let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut existing = path.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return path,
        }
    }
    let mut resolved = existing
        .canonicalize()
        .unwrap_or_else(|_| existing.to_path_buf());
    resolved.extend(tail.iter().rev());
    resolved
}
