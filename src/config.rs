use std::path::PathBuf;

/// Default zstd level for delta blobs.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Run configuration, passed explicitly through the pipeline.
#[derive(Debug, Clone)]
pub struct PatchConfig {
    /// Directory that receives the patch package. Emptied at the start of a run.
    pub output: PathBuf,
    /// Filename suffixes that mark a file as a shared library.
    pub library_suffixes: Vec<String>,
    /// Run library probes and blob encodes on the rayon pool.
    pub parallel: bool,
    pub compression_level: i32,
}

impl PatchConfig {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            library_suffixes: vec![std::env::consts::DLL_SUFFIX.to_string()],
            parallel: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn with_library_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.library_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self::new("patch")
    }
}
