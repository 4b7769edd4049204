//! Artifact definition files.
//!
//! Each artifact is one YAML document:
//!
//! ```yaml
//! kind: model
//! name: orders          # optional, defaults to the file stem
//! sql: select * from raw_orders
//! depends_on: [raw_orders]
//! ```
//!
//! `kind` is one of `source` (requires `connector`), `model` (requires `sql`)
//! or `metrics_view` (requires `model`, which is also a dependency).

use crate::domain::{
    EntryDefinition, MetricsViewDefinition, ModelDefinition, ObjectType, SourceDefinition,
};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Maximum length of an entry name.
pub const MAX_NAME_LENGTH: usize = 128;

/// A parsed artifact file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Entry name
    pub name: String,

    /// Repository path of the file
    pub path: PathBuf,

    /// Definition payload
    pub definition: EntryDefinition,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArtifact {
    kind: String,
    name: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    connector: Option<String>,
    uri: Option<String>,
    sql: Option<String>,
    model: Option<String>,
    #[serde(default)]
    dimensions: Vec<String>,
    #[serde(default)]
    measures: Vec<String>,
}

/// Validate an entry name.
///
/// Names are 1-128 characters of ASCII letters, digits, `_` and `-`.
pub fn validate_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(format!("name cannot exceed {MAX_NAME_LENGTH} characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!(
            "name '{name}' may only contain letters, digits, '_' and '-'"
        ));
    }
    Ok(())
}

/// Parse one artifact file.
///
/// # Errors
///
/// Returns `Error::InvalidArtifact` naming `path` if the YAML is malformed,
/// the kind is unknown, a required field is missing, or a name is invalid.
pub fn parse_artifact(path: &Path, contents: &str) -> Result<Artifact> {
    let invalid = |reason: String| Error::InvalidArtifact {
        path: path.to_path_buf(),
        reason,
    };

    let raw: RawArtifact = serde_yaml::from_str(contents).map_err(|e| invalid(e.to_string()))?;

    let name = match raw.name {
        Some(name) => name.trim().to_string(),
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string(),
    };
    validate_name(&name).map_err(invalid)?;

    for dep in &raw.depends_on {
        validate_name(dep).map_err(|e| invalid(format!("depends_on: {e}")))?;
    }

    let kind: ObjectType = raw.kind.parse().map_err(invalid)?;
    let required = |field: Option<String>, key: &str| {
        field
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| invalid(format!("{kind} requires '{key}'")))
    };

    let definition = match kind {
        ObjectType::Source => EntryDefinition::Source(SourceDefinition {
            connector: required(raw.connector, "connector")?,
            uri: raw.uri,
            depends_on: raw.depends_on,
        }),
        ObjectType::Model => EntryDefinition::Model(ModelDefinition {
            sql: required(raw.sql, "sql")?,
            depends_on: raw.depends_on,
        }),
        ObjectType::MetricsView => {
            let model = required(raw.model, "model")?;
            validate_name(&model).map_err(|e| invalid(format!("model: {e}")))?;
            EntryDefinition::MetricsView(MetricsViewDefinition {
                model,
                dimensions: raw.dimensions,
                measures: raw.measures,
                depends_on: raw.depends_on,
            })
        }
    };

    Ok(Artifact {
        name,
        path: path.to_path_buf(),
        definition,
    })
}
