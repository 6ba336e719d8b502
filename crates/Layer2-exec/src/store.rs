//! Content-addressed object store
//!
//! Objects live at `<dir>/<hex digest>`. Installing a file hashes it while
//! copying it into a temporary object, then renames that into place; an
//! object that already exists is reused.

use crate::fileset::{File, Fileset};
use dockyard_foundation::{ContentHasher, ContentId, Error, Result};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ContentStore {
    dir: PathBuf,
}

impl ContentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::storage(&self.dir, e))
    }

    /// Location of object `id` (whether or not it exists)
    pub fn path(&self, id: &ContentId) -> PathBuf {
        self.dir.join(id.to_hex())
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.path(id).is_file()
    }

    pub fn read(&self, id: &ContentId) -> Result<Vec<u8>> {
        let path = self.path(id);
        std::fs::read(&path).map_err(|e| Error::storage(&path, e))
    }

    /// Copy `path` into the store, returning its identity
    pub fn install(&self, path: &Path) -> Result<File> {
        self.ensure_dir()?;
        let tmp = self.dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        let file = match copy_hashing(path, &tmp) {
            Ok(file) => file,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                return Err(e);
            }
        };

        let target = self.path(&file.id);
        if target.exists() {
            std::fs::remove_file(&tmp).map_err(|e| Error::storage(&tmp, e))?;
        } else {
            std::fs::rename(&tmp, &target).map_err(|e| Error::storage(&target, e))?;
        }
        Ok(file)
    }

    /// Install every regular file under `root`.
    ///
    /// Paths are relative to `root`, `/`-separated. Directories produce no
    /// entries and symlinks are not followed. If `root` is itself a regular
    /// file the result is a single entry at `"."`; if it does not exist the
    /// result is empty.
    pub fn install_tree(&self, root: &Path) -> Result<Fileset> {
        let meta = match std::fs::symlink_metadata(root) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Fileset::new()),
            Err(e) => return Err(Error::storage(root, e)),
        };
        if meta.is_file() {
            return Ok(Fileset::single(self.install(root)?));
        }

        let mut fileset = Fileset::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| Error::storage(root, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::storage(entry.path(), e))?;
            let file = self.install(entry.path())?;
            fileset.insert(relative_key(rel), file);
        }
        debug!(
            "Installed {} files ({} bytes) from {}",
            fileset.n(),
            fileset.size(),
            root.display()
        );
        Ok(fileset)
    }
}

fn copy_hashing(src: &Path, dst: &Path) -> Result<File> {
    let mut reader = std::fs::File::open(src).map_err(|e| Error::storage(src, e))?;
    let mut writer = std::fs::File::create(dst).map_err(|e| Error::storage(dst, e))?;
    let mut hasher = ContentHasher::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let len = reader.read(&mut buffer).map_err(|e| Error::storage(src, e))?;
        if len == 0 {
            break;
        }
        hasher.update(&buffer[..len]);
        writer
            .write_all(&buffer[..len])
            .map_err(|e| Error::storage(dst, e))?;
    }
    writer.sync_all().map_err(|e| Error::storage(dst, e))?;
    let size = hasher.len();
    Ok(File {
        id: hasher.finish(),
        size,
    })
}

fn relative_key(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
