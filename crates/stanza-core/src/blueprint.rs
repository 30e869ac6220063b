//! Blueprint model
//!
//! A [`Blueprint`] is a named collection of [`Action`]s; each action is an
//! ordered list of [`Phase`]s. Blueprints are read-only configuration, read
//! from YAML or JSON.

use crate::value::ArgMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Errors reading or parsing a blueprint
#[derive(Debug, thiserror::Error)]
pub enum BlueprintError {
    /// File could not be read
    #[error("failed to read blueprint {path}: {source}")]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// YAML document is malformed
    #[error("failed to parse blueprint: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON document is malformed
    #[error("failed to parse blueprint: {0}")]
    Json(#[from] serde_json::Error),
}

/// Declarative collection of named actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    /// Optional blueprint name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Actions by name
    #[serde(default)]
    pub actions: BTreeMap<String, Action>,
}

impl Blueprint {
    /// Create empty blueprint
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With an action
    #[must_use]
    pub fn with_action(mut self, name: impl Into<String>, action: Action) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    /// Get an action by name
    #[inline]
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Parse a YAML blueprint (JSON is valid YAML)
    ///
    /// # Errors
    /// [`BlueprintError::Yaml`] on malformed input
    pub fn from_yaml_str(s: &str) -> Result<Self, BlueprintError> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Parse a JSON blueprint
    ///
    /// # Errors
    /// [`BlueprintError::Json`] on malformed input
    pub fn from_json_str(s: &str) -> Result<Self, BlueprintError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read a blueprint file; `.json` files are parsed as JSON, anything else
    /// as YAML
    ///
    /// # Errors
    /// [`BlueprintError`] if the file cannot be read or parsed
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, BlueprintError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| BlueprintError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_yaml_str(&raw),
        }
    }
}

/// Ordered sequence of phases implementing one workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Phases in execution order
    #[serde(default)]
    pub phases: Vec<Phase>,
}

impl Action {
    /// Create action from phases
    #[inline]
    #[must_use]
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { phases }
    }
}

/// One step invoking a registered function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Label, not necessarily unique
    pub name: String,
    /// Registry key of the function to invoke
    pub func: String,
    /// Untyped arguments
    #[serde(default)]
    pub args: ArgMap,
}

impl Phase {
    /// Create phase without arguments
    #[must_use]
    pub fn new(name: impl Into<String>, func: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: func.into(),
            args: ArgMap::new(),
        }
    }

    /// With an argument
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const BACKUP_YAML: &str = r#"
name: mysql-blueprint
actions:
  backup:
    phases:
      - name: dump
        func: KubeTask
        args:
          image: mysql:8
          command: ["sh", "-c", "mysqldump --all-databases"]
      - name: snapshot
        func: CreateCSISnapshot
        args:
          pvc: data
          namespace: db
          snapshotClass: csi-hostpath
          labels:
            app: mysql
"#;

    #[test]
    fn parse_yaml_preserves_phase_order() {
        let bp = Blueprint::from_yaml_str(BACKUP_YAML).unwrap();
        assert_eq!(bp.name.as_deref(), Some("mysql-blueprint"));

        let backup = bp.action("backup").unwrap();
        let names: Vec<_> = backup.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["dump", "snapshot"]);
        assert_eq!(backup.phases[1].args["labels"], json!({"app": "mysql"}));
    }

    #[test]
    fn phase_args_default_to_empty() {
        let bp = Blueprint::from_json_str(
            r#"{"actions": {"noop": {"phases": [{"name": "a", "func": "KubeTask"}]}}}"#,
        )
        .unwrap();
        assert!(bp.actions["noop"].phases[0].args.is_empty());
    }

    #[test]
    fn read_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bp.yaml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(BACKUP_YAML.as_bytes())
            .unwrap();

        let bp = Blueprint::read_from_file(&path).unwrap();
        assert!(bp.action("backup").is_some());

        let missing = Blueprint::read_from_file(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(BlueprintError::Io { .. })));
    }

    #[test]
    fn builder_helpers() {
        let bp = Blueprint::new().with_action(
            "backup",
            Action::new(vec![Phase::new("00", "KubeTask").with_arg("image", "busybox")]),
        );
        assert_eq!(bp.actions["backup"].phases[0].args["image"], json!("busybox"));
    }
}
