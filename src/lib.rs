//! # treedelta
//!
//! Builds patch packages that turn a "before" directory tree into an "after"
//! tree. Regular files are added, removed or diffed by path; shared libraries
//! whose names changed between releases are paired with the before-tree
//! library that produces the smallest delta.
//!
//! Every delta blob in a package, `c` and `C` alike, is encoded against the
//! before-tree file it names, so an applier must read delta sources from an
//! untouched copy of the before tree rather than patching strictly in place.
//! See [`manifest`] for the record grammar.
//!
//! ```no_run
//! use std::path::Path;
//! use treedelta::{create_patch, PatchConfig};
//!
//! # async fn run() -> Result<(), treedelta::PatchError> {
//! let config = PatchConfig::new("out/patch").with_library_suffixes([".so"]);
//! let summary = create_patch(Path::new("v1"), Path::new("v2"), &config).await?;
//! println!("{} blob bytes", summary.blob_bytes);
//! # Ok(())
//! # }
//! ```

pub mod assemble;
pub mod classify;
pub mod config;
pub mod create;
pub mod delta;
pub mod error;
pub mod manifest;
pub mod matcher;
pub mod partition;
pub mod tree;

pub use config::PatchConfig;
pub use create::{build_package, create_patch, create_patch_with, PatchSummary};
pub use delta::{BlockDelta, Delta, DeltaEncoder};
pub use error::PatchError;
pub use manifest::{Manifest, TocRecord};
