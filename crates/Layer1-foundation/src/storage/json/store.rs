//! JSON 파일 저장소

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// JSON record store rooted at one directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a half-written record after a crash.
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Global store (`<data dir>/dockyard/`)
    pub fn global() -> Result<Self> {
        let dir = dirs::data_local_dir()
            .ok_or_else(|| Error::Config("Cannot find data directory".to_string()))?
            .join("dockyard");
        Ok(Self::new(dir))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    pub fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            std::fs::create_dir_all(&self.base_dir)
                .map_err(|e| Error::storage(&self.base_dir, e))?;
        }
        Ok(())
    }

    /// JSON 로드
    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.file_path(filename);
        let content = std::fs::read_to_string(&path).map_err(|e| Error::storage(&path, e))?;
        serde_json::from_str(&content).map_err(|e| Error::storage(&path, e))
    }

    /// JSON 로드 (기본값)
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, filename: &str) -> T {
        self.load(filename).unwrap_or_default()
    }

    /// JSON 로드 (Optional)
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.file_path(filename);
        if !path.exists() {
            return Ok(None);
        }
        self.load(filename).map(Some)
    }

    /// JSON 저장
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.file_path(filename);
        let tmp = self.file_path(&format!(".{}.tmp", filename));
        let content =
            serde_json::to_string_pretty(data).map_err(|e| Error::storage(&path, e))?;
        std::fs::write(&tmp, content).map_err(|e| Error::storage(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| Error::storage(&path, e))
    }

    /// 파일 존재 여부
    pub fn exists(&self, filename: &str) -> bool {
        self.file_path(filename).exists()
    }

    /// 파일 삭제
    pub fn remove(&self, filename: &str) -> Result<()> {
        let path = self.file_path(filename);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| Error::storage(&path, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("nested"));

        let record = Record {
            name: "x".into(),
            count: 3,
        };
        store.save("record.json", &record).unwrap();

        assert!(store.exists("record.json"));
        assert!(!store.exists(".record.json.tmp"));
        let loaded: Record = store.load("record.json").unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        let missing: Option<Record> = store.load_optional("nope.json").unwrap();
        assert!(missing.is_none());

        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let err = store.load::<Record>("bad.json").unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        let fallback: Record = store.load_or_default("bad.json");
        assert_eq!(fallback, Record::default());
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store.save("r.json", &Record::default()).unwrap();
        store.remove("r.json").unwrap();
        assert!(!store.exists("r.json"));
        // removing twice is fine
        store.remove("r.json").unwrap();
    }
}
