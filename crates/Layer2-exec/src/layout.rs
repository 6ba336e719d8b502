//! Durable per-exec directory
//!
//! ```text
//! <dir>/execs/<id>/
//!     config.json      ExecConfig
//!     container.json   { id, name }
//!     result.json      ExecResult (terminal only)
//!     profile.json     { gauges, profile }
//!     state.json       { state, updated }
//!     run/tmp          mounted at /tmp/dockyard
//!     run/return       mounted at /return; $out is /return/default
//! ```

use crate::config::ExecConfig;
use crate::fileset::ExecResult;
use crate::profile::{Gauges, Profile};
use crate::state::ExecState;
use chrono::{DateTime, Utc};
use dockyard_foundation::{ContentId, Error, JsonStore, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";
pub const CONTAINER_FILE: &str = "container.json";
pub const RESULT_FILE: &str = "result.json";
pub const PROFILE_FILE: &str = "profile.json";
pub const STATE_FILE: &str = "state.json";

/// Scratch mount point inside the container
pub const TMP_MOUNT: &str = "/tmp/dockyard";
/// Return mount point inside the container
pub const RETURN_MOUNT: &str = "/return";
/// `$out` inside the container
pub const OUT_PATH: &str = "/return/default";

/// Handle sufficient to find the container again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub gauges: Gauges,
    pub profile: Profile,
}

/// Last state written; informational only, restore never trusts it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: ExecState,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExecDir {
    store: JsonStore,
}

impl ExecDir {
    /// Directory of exec `id` under `execs_root`
    pub fn new(execs_root: &Path, id: &ContentId) -> Self {
        Self::open(execs_root.join(id.to_hex()))
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(path),
        }
    }

    pub fn root(&self) -> &Path {
        self.store.base_dir()
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root().join("run").join("tmp")
    }

    pub fn return_dir(&self) -> PathBuf {
        self.root().join("run").join("return")
    }

    /// Host side of `$out`
    pub fn out_path(&self) -> PathBuf {
        self.return_dir().join("default")
    }

    /// Create the directory and its run mounts
    pub fn create(&self) -> Result<()> {
        for dir in [self.tmp_dir(), self.return_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| Error::storage(&dir, e))?;
        }
        Ok(())
    }

    pub fn remove_all(&self) -> Result<()> {
        match std::fs::remove_dir_all(self.root()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(self.root(), e)),
        }
    }

    // ========================================================================
    // Records
    // ========================================================================

    pub fn save_config(&self, config: &ExecConfig) -> Result<()> {
        self.store.save(CONFIG_FILE, config)
    }

    pub fn load_config(&self) -> Result<ExecConfig> {
        self.store.load(CONFIG_FILE)
    }

    pub fn save_container(&self, record: &ContainerRecord) -> Result<()> {
        self.store.save(CONTAINER_FILE, record)
    }

    pub fn load_container(&self) -> Result<Option<ContainerRecord>> {
        self.store.load_optional(CONTAINER_FILE)
    }

    pub fn save_result(&self, result: &ExecResult) -> Result<()> {
        self.store.save(RESULT_FILE, result)
    }

    pub fn load_result(&self) -> Result<Option<ExecResult>> {
        self.store.load_optional(RESULT_FILE)
    }

    pub fn save_profile(&self, gauges: &Gauges, profile: &Profile) -> Result<()> {
        let record = ProfileRecord {
            gauges: gauges.clone(),
            profile: profile.clone(),
        };
        self.store.save(PROFILE_FILE, &record)
    }

    pub fn load_profile(&self) -> Result<Option<ProfileRecord>> {
        self.store.load_optional(PROFILE_FILE)
    }

    pub fn save_state(&self, state: ExecState) -> Result<()> {
        let record = StateRecord {
            state,
            updated: Utc::now(),
        };
        self.store.save(STATE_FILE, &record)
    }
}
