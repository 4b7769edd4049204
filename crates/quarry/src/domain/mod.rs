//! Domain types for the artifact catalog.
//!
//! A [`CatalogEntry`] is one data artifact (source, model or metrics view)
//! known to an instance. Entries are persisted by a
//! [`CatalogStore`](crate::drivers::CatalogStore); their `parents` and
//! `children` are never persisted and are filled in at read time from the
//! live dependency graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Kind of catalog artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// Ingested data from an external connector
    Source,

    /// SQL transformation over sources or other models
    Model,

    /// Dimension/measure definitions over a model
    MetricsView,
}

impl ObjectType {
    /// Stable lowercase name used in artifacts and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Source => "source",
            ObjectType::Model => "model",
            ObjectType::MetricsView => "metrics_view",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(ObjectType::Source),
            "model" => Ok(ObjectType::Model),
            "metrics_view" | "metricsview" => Ok(ObjectType::MetricsView),
            other => Err(format!(
                "unknown object type '{other}' (expected source, model or metrics_view)"
            )),
        }
    }
}

/// Definition of a source artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Connector name (e.g. "s3", "local_file")
    pub connector: String,

    /// Location the connector reads from
    pub uri: Option<String>,

    /// Declared upstream entries
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Definition of a model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Transformation query, opaque to the runtime
    pub sql: String,

    /// Declared upstream entries
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Definition of a metrics view artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsViewDefinition {
    /// Model the view is defined over
    pub model: String,

    /// Dimension column names
    #[serde(default)]
    pub dimensions: Vec<String>,

    /// Measure expressions
    #[serde(default)]
    pub measures: Vec<String>,

    /// Declared upstream entries besides `model`
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Type-specific definition payload of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryDefinition {
    /// Source payload
    Source(SourceDefinition),

    /// Model payload
    Model(ModelDefinition),

    /// Metrics view payload
    MetricsView(MetricsViewDefinition),
}

impl EntryDefinition {
    /// The object type this payload describes.
    #[must_use]
    pub fn object_type(&self) -> ObjectType {
        match self {
            EntryDefinition::Source(_) => ObjectType::Source,
            EntryDefinition::Model(_) => ObjectType::Model,
            EntryDefinition::MetricsView(_) => ObjectType::MetricsView,
        }
    }

    /// Names this definition depends on, in declaration order, without
    /// duplicates. A metrics view implicitly depends on its model.
    #[must_use]
    pub fn dependencies(&self) -> Vec<&str> {
        let declared: Vec<&str> = match self {
            EntryDefinition::Source(def) => def.depends_on.iter().map(String::as_str).collect(),
            EntryDefinition::Model(def) => def.depends_on.iter().map(String::as_str).collect(),
            EntryDefinition::MetricsView(def) => std::iter::once(def.model.as_str())
                .chain(def.depends_on.iter().map(String::as_str))
                .collect(),
        };

        let mut seen = std::collections::HashSet::new();
        declared
            .into_iter()
            .filter(|name| seen.insert(crate::dag::normalize_name(name)))
            .collect()
    }
}

/// A named data artifact tracked in an instance's catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Tenant-scoped unique name
    pub name: String,

    /// Artifact kind; always matches `definition`
    pub object_type: ObjectType,

    /// Repository path of the defining artifact file
    pub path: PathBuf,

    /// Type-specific definition payload
    pub definition: EntryDefinition,

    /// When the entry was first persisted
    pub created_on: DateTime<Utc>,

    /// When the entry's definition last changed
    pub updated_on: DateTime<Utc>,

    /// Entries this one depends on (derived from the live graph, never persisted)
    #[serde(skip)]
    pub parents: Vec<String>,

    /// Entries that depend on this one (derived from the live graph, never persisted)
    #[serde(skip)]
    pub children: Vec<String>,
}

impl CatalogEntry {
    /// Create an entry with empty derived edges.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        definition: EntryDefinition,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            object_type: definition.object_type(),
            path: path.into(),
            definition,
            created_on: now,
            updated_on: now,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// One tenant's registered runtime instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance identifier
    pub id: String,

    /// Name of the OLAP driver backing the instance
    pub olap_driver: String,

    /// Name of the repository driver backing the instance
    pub repo_driver: String,

    /// Registration time
    pub created_on: DateTime<Utc>,
}

impl Instance {
    /// Create an instance record registered now.
    pub fn new(
        id: impl Into<String>,
        olap_driver: impl Into<String>,
        repo_driver: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            olap_driver: olap_driver.into(),
            repo_driver: repo_driver.into(),
            created_on: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("source", ObjectType::Source)]
    #[case("model", ObjectType::Model)]
    #[case("metrics_view", ObjectType::MetricsView)]
    #[case("metricsview", ObjectType::MetricsView)]
    fn test_object_type_from_str(#[case] input: &str, #[case] expected: ObjectType) {
        assert_eq!(input.parse::<ObjectType>().unwrap(), expected);
    }

    #[test]
    fn test_object_type_from_str_rejects_unknown() {
        let err = "dashboard".parse::<ObjectType>().unwrap_err();
        assert!(err.contains("dashboard"));
    }

    #[test]
    fn test_metrics_view_depends_on_model() {
        let def = EntryDefinition::MetricsView(MetricsViewDefinition {
            model: "orders".to_string(),
            dimensions: vec!["country".to_string()],
            measures: vec!["count(*)".to_string()],
            depends_on: vec!["Orders".to_string(), "fx_rates".to_string()],
        });

        // "Orders" is the same node as "orders" and is reported once
        assert_eq!(def.dependencies(), vec!["orders", "fx_rates"]);
    }

    #[test]
    fn test_derived_edges_are_not_serialized() {
        let mut entry = CatalogEntry::new(
            "orders",
            "models/orders.yaml",
            EntryDefinition::Model(ModelDefinition {
                sql: "select * from raw".to_string(),
                depends_on: vec!["raw".to_string()],
            }),
        );
        entry.parents = vec!["raw".to_string()];
        entry.children = vec!["dash".to_string()];

        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("parents").is_none());
        assert!(json.get("children").is_none());

        let back: CatalogEntry = serde_json::from_value(json).unwrap();
        assert!(back.parents.is_empty());
        assert!(back.children.is_empty());
        assert_eq!(back.object_type, ObjectType::Model);
    }
}
