use rayon::prelude::*;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::classify::Classification;
use crate::delta::DeltaEncoder;
use crate::error::{PatchError, Result};
use crate::manifest::{blob_name, Manifest, TocRecord, MANIFEST_FILE};
use crate::matcher::LibraryMatches;
use crate::tree::FileEntry;

/// How the blob for one record is produced.
#[derive(Debug, Clone, Copy)]
pub enum BlobSource<'a> {
    /// Verbatim copy of an after-tree file.
    Copy(&'a FileEntry),
    Delta {
        source: &'a FileEntry,
        target: &'a FileEntry,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct PlannedBlob<'a> {
    pub id: u64,
    pub source: BlobSource<'a>,
}

/// Records in emission order, and one planned blob per non-remove record.
#[derive(Debug, Default)]
pub struct PatchPlan<'a> {
    pub records: Vec<TocRecord>,
    pub blobs: Vec<PlannedBlob<'a>>,
}

impl<'a> PatchPlan<'a> {
    /// Lay out records as removes, adds, in-place changes, then renames, with
    /// one id counter shared by everything that owns a blob.
    pub fn build(files: &Classification<'a>, libraries: &LibraryMatches<'a>) -> Self {
        let mut plan = PatchPlan::default();

        for entry in files.removed.iter().chain(&libraries.removed) {
            plan.records.push(TocRecord::Remove {
                path: entry.relative_path.clone(),
            });
        }

        for &entry in files.new.iter().chain(&libraries.new) {
            let id = plan.next_id();
            plan.records.push(TocRecord::Add {
                id,
                path: entry.relative_path.clone(),
            });
            plan.blobs.push(PlannedBlob {
                id,
                source: BlobSource::Copy(entry),
            });
        }

        for pair in files.changed.iter().chain(&libraries.changed) {
            let id = plan.next_id();
            plan.records.push(TocRecord::ChangeInPlace {
                id,
                path: pair.path().to_string(),
            });
            plan.blobs.push(PlannedBlob {
                id,
                source: BlobSource::Delta {
                    source: pair.before,
                    target: pair.after,
                },
            });
        }

        for matched in &libraries.renamed {
            let id = plan.next_id();
            plan.records.push(TocRecord::Rename {
                id,
                source: matched.source_path().to_string(),
                target: matched.target_path().to_string(),
            });
            plan.blobs.push(PlannedBlob {
                id,
                source: BlobSource::Delta {
                    source: matched.source,
                    target: matched.target,
                },
            });
        }

        plan
    }

    fn next_id(&self) -> u64 {
        self.blobs.len() as u64
    }
}

/// A freshly emptied output directory. Dropping it without [`OutputDir::publish`]
/// deletes everything written so far.
#[derive(Debug)]
pub struct OutputDir {
    path: PathBuf,
    published: bool,
}

impl OutputDir {
    /// Remove whatever is at `path` and create an empty directory there.
    pub fn prepare(path: &Path) -> Result<Self> {
        let location_error = |source: std::io::Error| PatchError::OutputLocation {
            path: path.to_path_buf(),
            source,
        };

        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map_err(location_error)?,
            Ok(_) => fs::remove_file(path).map_err(location_error)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(location_error(e)),
        }
        fs::create_dir_all(path).map_err(location_error)?;

        Ok(Self {
            path: path.to_path_buf(),
            published: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every planned blob, returning the total bytes written.
    pub fn write_blobs(
        &self,
        plan: &PatchPlan<'_>,
        encoder: &dyn DeltaEncoder,
        parallel: bool,
    ) -> Result<u64> {
        let write = |blob: &PlannedBlob<'_>| self.write_blob(blob, encoder);
        let sizes: Vec<u64> = if parallel {
            plan.blobs.par_iter().map(write).collect::<Result<_>>()?
        } else {
            plan.blobs.iter().map(write).collect::<Result<_>>()?
        };
        Ok(sizes.into_iter().sum())
    }

    fn write_blob(&self, blob: &PlannedBlob<'_>, encoder: &dyn DeltaEncoder) -> Result<u64> {
        let dest = self.path.join(blob_name(blob.id));
        let written = match blob.source {
            BlobSource::Copy(entry) => {
                fs::copy(&entry.full_path, &dest).map_err(|e| PatchError::write(&dest, e))?
            }
            BlobSource::Delta { source, target } => {
                let delta = encoder.diff(&source.full_path, &target.full_path)?;
                fs::write(&dest, delta.as_bytes()).map_err(|e| PatchError::write(&dest, e))?;
                delta.size()
            }
        };
        debug!(id = blob.id, bytes = written, "wrote blob");
        Ok(written)
    }

    /// Write the manifest last, through a temporary name, so it only becomes
    /// visible once every blob is in place.
    pub fn publish(mut self, manifest: &Manifest) -> Result<PathBuf> {
        let staged = self.path.join(format!("{MANIFEST_FILE}.partial"));
        let target = self.path.join(MANIFEST_FILE);

        let mut file = fs::File::create(&staged).map_err(|e| PatchError::write(&staged, e))?;
        file.write_all(manifest.render().as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| PatchError::write(&staged, e))?;
        drop(file);
        fs::rename(&staged, &target).map_err(|e| PatchError::write(&target, e))?;

        self.published = true;
        Ok(target)
    }
}

impl Drop for OutputDir {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to discard partial patch");
            }
        }
    }
}
