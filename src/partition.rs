use crate::tree::FileEntry;

/// Suffix predicate that marks shared libraries.
#[derive(Debug, Clone)]
pub struct LibraryFilter {
    suffixes: Vec<String>,
}

impl LibraryFilter {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    /// The configured suffix `path` ends with, if any. Longest suffix wins so
    /// that `.so.1` beats `.1` when both are configured.
    pub fn suffix_of(&self, path: &str) -> Option<&str> {
        self.suffixes
            .iter()
            .filter(|s| path.ends_with(s.as_str()))
            .max_by_key(|s| s.len())
            .map(String::as_str)
    }

    pub fn is_library(&self, path: &str) -> bool {
        self.suffix_of(path).is_some()
    }
}

/// One tree's files split into regular files and shared libraries, both in
/// listing order.
#[derive(Debug, Default)]
pub struct Partitioned<'a> {
    pub regular: Vec<&'a FileEntry>,
    pub libraries: Vec<&'a FileEntry>,
}

/// Split `files` without touching the source listing.
pub fn partition<'a>(files: &'a [FileEntry], filter: &LibraryFilter) -> Partitioned<'a> {
    let (libraries, regular): (Vec<_>, Vec<_>) = files
        .iter()
        .partition(|f| filter.is_library(&f.relative_path));
    Partitioned { regular, libraries }
}
