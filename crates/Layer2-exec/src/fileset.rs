//! Filesets and exec results

use dockyard_foundation::ContentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One content-addressed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct File {
    /// Digest of the file contents
    pub id: ContentId,

    /// Length in bytes
    pub size: u64,
}

/// Mapping from relative path to file.
///
/// A single-file output is stored under the path `"."`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fileset {
    pub map: BTreeMap<String, File>,
}

impl Fileset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fileset holding one file at `"."`
    pub fn single(file: File) -> Self {
        let mut fs = Self::new();
        fs.insert(".", file);
        fs
    }

    pub fn insert(&mut self, path: impl Into<String>, file: File) {
        self.map.insert(path.into(), file);
    }

    pub fn get(&self, path: &str) -> Option<&File> {
        self.map.get(path)
    }

    /// Number of files
    pub fn n(&self) -> usize {
        self.map.len()
    }

    /// Total size in bytes
    pub fn size(&self) -> u64 {
        self.map.values().map(|f| f.size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &File)> {
        self.map.iter().map(|(p, f)| (p.as_str(), f))
    }
}

impl std::fmt::Display for Fileset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (path, file)) in self.files().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {} ({} B)", path, file.id.short(), file.size)?;
        }
        write!(f, "}}")
    }
}

/// Terminal outcome of an exec.
///
/// `err` is set only when the task itself failed; errors talking to the
/// executor are returned from the call instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub fileset: Fileset,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl ExecResult {
    pub fn success(fileset: Fileset) -> Self {
        Self { fileset, err: None }
    }

    pub fn failure(err: impl Into<String>) -> Self {
        Self {
            fileset: Fileset::new(),
            err: Some(err.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }
}
