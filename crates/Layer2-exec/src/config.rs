//! Exec configuration

use crate::resources::Resources;
use dockyard_foundation::ContentId;
use serde::{Deserialize, Serialize};

/// What an exec does. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecConfig {
    /// Run `cmd` with bash inside `image`.
    ///
    /// The command sees `$tmp` (scratch directory) and `$out` (the output
    /// path, a file or a directory).
    Exec {
        image: String,
        cmd: String,
        #[serde(default, skip_serializing_if = "Resources::is_empty")]
        resources: Resources,
    },

    /// Import the directory tree at `url` (`localfile://`, `file://` or an
    /// absolute path) into the object store.
    Intern { url: String },
}

impl ExecConfig {
    pub fn exec(image: impl Into<String>, cmd: impl Into<String>) -> Self {
        ExecConfig::Exec {
            image: image.into(),
            cmd: cmd.into(),
            resources: Resources::new(),
        }
    }

    pub fn intern(url: impl Into<String>) -> Self {
        ExecConfig::Intern { url: url.into() }
    }

    /// Set declared resources (no effect on intern configs)
    pub fn with_resources(mut self, declared: Resources) -> Self {
        if let ExecConfig::Exec { resources, .. } = &mut self {
            *resources = declared;
        }
        self
    }

    /// Declared resources; interns declare none
    pub fn resources(&self) -> Resources {
        match self {
            ExecConfig::Exec { resources, .. } => resources.clone(),
            ExecConfig::Intern { .. } => Resources::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecConfig::Exec { .. } => "exec",
            ExecConfig::Intern { .. } => "intern",
        }
    }

    /// Content digest of the configuration.
    ///
    /// Hashes the canonical JSON form: image, command and resources for
    /// execs, the source URL for interns.
    pub fn digest(&self) -> ContentId {
        // Field order is fixed by the type and resources are a BTreeMap, so
        // the encoding is deterministic.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        ContentId::of_bytes(&canonical)
    }
}

impl std::fmt::Display for ExecConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecConfig::Exec {
                image,
                cmd,
                resources,
            } => write!(f, "exec image={} resources={} cmd={:?}", image, resources, cmd),
            ExecConfig::Intern { url } => write!(f, "intern url={}", url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::CPU;

    #[test]
    fn test_tagged_serde() {
        let config = ExecConfig::exec("alpine", "echo hi");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "exec");
        assert_eq!(json["image"], "alpine");
        assert!(json.get("resources").is_none());

        let intern: ExecConfig =
            serde_json::from_str(r#"{"type":"intern","url":"localfile:///tmp/x"}"#).unwrap();
        assert_eq!(intern, ExecConfig::intern("localfile:///tmp/x"));
    }

    #[test]
    fn test_digest_is_stable_and_discriminating() {
        let a = ExecConfig::exec("alpine", "echo hi");
        let b = ExecConfig::exec("alpine", "echo hi");
        let c = ExecConfig::exec("alpine", "echo bye");
        let d = a.clone().with_resources(Resources::new().with(CPU, 1.0));

        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_ne!(a.digest(), d.digest());
    }

    #[test]
    fn test_intern_has_no_resources() {
        let config = ExecConfig::intern("/data").with_resources(Resources::new().with(CPU, 4.0));
        assert!(config.resources().is_empty());
        assert_eq!(config.kind(), "intern");
    }
}
