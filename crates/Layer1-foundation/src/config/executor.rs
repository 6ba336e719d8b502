//! Executor Config - 실행기 설정
//!
//! Loaded from `executor.json` in the global store and merged with an
//! optional store next to the working directory (the latter wins).

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// 설정 파일명
pub const EXECUTOR_CONFIG_FILE: &str = "executor.json";

/// Local executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Working directory holding per-exec state and the object store
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Container names are `<prefix>-<exec id>`
    #[serde(default = "default_prefix")]
    pub container_prefix: String,

    /// Runtime stats (cpu, mem) sampling period
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,

    /// Filesystem usage (disk, tmp) sampling period
    #[serde(default = "default_disk_interval_ms")]
    pub disk_interval_ms: u64,

    /// Total capacity available for admission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<BTreeMap<String, f64>>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            container_prefix: default_prefix(),
            stats_interval_ms: default_stats_interval_ms(),
            disk_interval_ms: default_disk_interval_ms(),
            resources: None,
        }
    }
}

impl ExecutorConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 작업 디렉토리 병합 로드
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.load_optional::<ExecutorConfig>(EXECUTOR_CONFIG_FILE)? {
                config.merge(global_config);
            }
        }

        let local = JsonStore::new(&config.dir);
        if let Some(local_config) = local.load_optional::<ExecutorConfig>(EXECUTOR_CONFIG_FILE)? {
            config.merge(local_config);
        }

        debug!("Loaded executor config: dir={}", config.dir.display());
        Ok(config)
    }

    /// Load from a specific store, falling back to defaults
    pub fn load_from(store: &JsonStore) -> Self {
        store.load_or_default(EXECUTOR_CONFIG_FILE)
    }

    pub fn save_to(&self, store: &JsonStore) -> Result<()> {
        store.save(EXECUTOR_CONFIG_FILE, self)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// 다른 설정과 병합 (other가 우선)
    pub fn merge(&mut self, other: ExecutorConfig) {
        if other.dir != default_dir() {
            self.dir = other.dir;
        }
        if other.container_prefix != default_prefix() {
            self.container_prefix = other.container_prefix;
        }
        if other.stats_interval_ms != default_stats_interval_ms() {
            self.stats_interval_ms = other.stats_interval_ms;
        }
        if other.disk_interval_ms != default_disk_interval_ms() {
            self.disk_interval_ms = other.disk_interval_ms;
        }
        if other.resources.is_some() {
            self.resources = other.resources;
        }
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_container_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.container_prefix = prefix.into();
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_disk_interval(mut self, interval: Duration) -> Self {
        self.disk_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.resources
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), amount);
        self
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }

    pub fn disk_interval(&self) -> Duration {
        Duration::from_millis(self.disk_interval_ms.max(1))
    }
}

fn default_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dockyard")
}

fn default_prefix() -> String {
    "dockyard".to_string()
}

fn default_stats_interval_ms() -> u64 {
    1_000
}

fn default_disk_interval_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: ExecutorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.container_prefix, "dockyard");
        assert_eq!(config.stats_interval(), Duration::from_secs(1));
        assert_eq!(config.disk_interval(), Duration::from_secs(60));
        assert!(config.resources.is_none());
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = ExecutorConfig::new("/var/lib/a");
        let other = ExecutorConfig::default()
            .with_container_prefix("ci")
            .with_stats_interval(Duration::from_millis(250))
            .with_resource("cpu", 8.0);
        base.merge(other);

        assert_eq!(base.dir, PathBuf::from("/var/lib/a"));
        assert_eq!(base.container_prefix, "ci");
        assert_eq!(base.stats_interval_ms, 250);
        assert_eq!(base.resources.unwrap().get("cpu"), Some(&8.0));
    }

    #[test]
    fn test_roundtrip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let config = ExecutorConfig::new(dir.path()).with_resource("mem", 1024.0);
        config.save_to(&store).unwrap();

        let raw = std::fs::read_to_string(store.file_path(EXECUTOR_CONFIG_FILE)).unwrap();
        assert!(raw.contains("containerPrefix"));

        let loaded = ExecutorConfig::load_from(&store);
        assert_eq!(loaded.dir, dir.path());
        assert_eq!(loaded.resources.unwrap().get("mem"), Some(&1024.0));
    }
}
