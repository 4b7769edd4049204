//! Caller claims checked before any instance-scoped call.
//!
//! Extracting claims from a transport (tokens, headers) happens outside this
//! crate; handlers only consume the [`Claims`] capability.

use std::collections::{BTreeMap, BTreeSet};

/// An action on an instance that requires authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    /// Read catalog entries and their dependencies
    ReadCatalog,
    /// Run table profiling queries
    ReadProfiling,
    /// Trigger reconciliation from the repository
    EditRepo,
}

/// What the caller may do.
pub trait Claims: Send + Sync {
    /// Identifies the caller in logs.
    fn subject(&self) -> &str;

    /// Whether the caller holds `permission` on `instance_id`.
    fn can_instance(&self, instance_id: &str, permission: Permission) -> bool;
}

/// Claims that allow everything. For local, single-user setups and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenClaims;

impl Claims for OpenClaims {
    fn subject(&self) -> &str {
        "anonymous"
    }

    fn can_instance(&self, _instance_id: &str, _permission: Permission) -> bool {
        true
    }
}

/// Claims granting explicit permissions per instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceClaims {
    subject: String,
    grants: BTreeMap<String, BTreeSet<Permission>>,
}

impl InstanceClaims {
    /// Claims for `subject` with no grants.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            grants: BTreeMap::new(),
        }
    }

    /// Grant `permissions` on `instance_id`.
    #[must_use]
    pub fn grant(mut self, instance_id: impl Into<String>, permissions: &[Permission]) -> Self {
        self.grants
            .entry(instance_id.into())
            .or_default()
            .extend(permissions.iter().copied());
        self
    }
}

impl Claims for InstanceClaims {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn can_instance(&self, instance_id: &str, permission: Permission) -> bool {
        self.grants
            .get(instance_id)
            .is_some_and(|granted| granted.contains(&permission))
    }
}
