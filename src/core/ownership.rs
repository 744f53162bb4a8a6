//! # Ownership policy module
//!
//! Per-reconciler configuration deciding, for every applied object, whether
//! the operator asserts controller ownership, excludes the GVK entirely, or
//! leaves an externally-managed object untouched while still restoring it on
//! deletion. Read-only after the builder's `Build(ctx)` returns (spec.md §5).

use std::collections::HashSet;

use kube::core::{DynamicObject, GroupVersionKind};
use kube::runtime::watcher;

use super::object;

// -----------------------------------------------------------------------------
// OwnershipDecision

/// the outcome of evaluating the matrix in spec.md §4.8 for a single object.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum OwnershipDecision {
    /// no owner reference; no reconciliation on drift; no restoration.
    Excluded,
    /// owner reference set; drift is reconciled; restored on delete.
    Owned,
    /// no owner reference; drift is tolerated; restored on delete via the
    /// dynamic watch's delete-only predicate.
    SoftManaged,
}

impl OwnershipDecision {
    pub fn sets_owner_reference(&self) -> bool {
        matches!(self, Self::Owned)
    }

    pub fn restored_on_delete(&self) -> bool {
        matches!(self, Self::Owned | Self::SoftManaged)
    }
}

// -----------------------------------------------------------------------------
// ManagedByFalseMatcher

/// decides whether an object counts as externally-managed. The default
/// matches the `managed-by-operator=false` annotation; configurable so a
/// consumer can key off a different annotation or label scheme.
pub trait ManagedByFalseMatcher: Send + Sync {
    fn matches(&self, obj: &DynamicObject) -> bool;
}

pub struct DefaultManagedByFalseMatcher;

impl ManagedByFalseMatcher for DefaultManagedByFalseMatcher {
    fn matches(&self, obj: &DynamicObject) -> bool {
        object::is_managed_by_false(obj)
    }
}

// -----------------------------------------------------------------------------
// OwnershipPolicy

pub struct OwnershipPolicy {
    dynamic_ownership_enabled: bool,
    excluded_gvks: HashSet<GroupVersionKind>,
    gvk_predicates: std::collections::HashMap<GroupVersionKind, watcher::Config>,
    matcher: Box<dyn ManagedByFalseMatcher>,
}

impl OwnershipPolicy {
    pub fn new(dynamic_ownership_enabled: bool, excluded_gvks: HashSet<GroupVersionKind>) -> Self {
        Self {
            dynamic_ownership_enabled,
            excluded_gvks,
            gvk_predicates: std::collections::HashMap::new(),
            matcher: Box::new(DefaultManagedByFalseMatcher),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, HashSet::new())
    }

    pub fn with_matcher(mut self, matcher: Box<dyn ManagedByFalseMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_gvk_predicate(mut self, gvk: GroupVersionKind, config: watcher::Config) -> Self {
        self.gvk_predicates.insert(gvk, config);
        self
    }

    pub fn dynamic_ownership_enabled(&self) -> bool {
        self.dynamic_ownership_enabled
    }

    pub fn is_excluded(&self, gvk: &GroupVersionKind) -> bool {
        self.excluded_gvks.contains(gvk)
    }

    pub fn predicate_for(&self, gvk: &GroupVersionKind) -> Option<&watcher::Config> {
        self.gvk_predicates.get(gvk)
    }

    /// evaluates the decision matrix of spec.md §4.8 for a single object
    /// against its already-extracted GVK.
    pub fn decide(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> OwnershipDecision {
        if !self.dynamic_ownership_enabled {
            return OwnershipDecision::Excluded;
        }
        if self.is_excluded(gvk) {
            return OwnershipDecision::Excluded;
        }
        if self.matcher.matches(obj) {
            OwnershipDecision::SoftManaged
        } else {
            OwnershipDecision::Owned
        }
    }
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{ObjectMeta, TypeMeta};
    use std::collections::BTreeMap;

    fn object_with(annotations: Option<BTreeMap<String, String>>) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
            }),
            metadata: ObjectMeta {
                annotations,
                ..Default::default()
            },
            data: serde_json::Value::Null,
        }
    }

    fn gvk(kind: &str) -> GroupVersionKind {
        GroupVersionKind {
            group: String::new(),
            version: "v1".to_string(),
            kind: kind.to_string(),
        }
    }

    #[test]
    fn dynamic_ownership_disabled_excludes_everything() {
        let policy = OwnershipPolicy::disabled();
        let obj = object_with(None);
        assert_eq!(
            policy.decide(&gvk("ConfigMap"), &obj),
            OwnershipDecision::Excluded
        );
    }

    #[test]
    fn explicitly_excluded_gvk_is_excluded_even_when_enabled() {
        let mut excluded = HashSet::new();
        excluded.insert(gvk("Secret"));
        let policy = OwnershipPolicy::new(true, excluded);

        let obj = object_with(None);
        assert_eq!(policy.decide(&gvk("Secret"), &obj), OwnershipDecision::Excluded);
    }

    #[test]
    fn non_matching_object_is_owned() {
        let policy = OwnershipPolicy::new(true, HashSet::new());
        let obj = object_with(None);
        assert_eq!(policy.decide(&gvk("ConfigMap"), &obj), OwnershipDecision::Owned);
    }

    #[test]
    fn matching_managed_by_false_object_is_soft_managed() {
        let policy = OwnershipPolicy::new(true, HashSet::new());
        let mut annotations = BTreeMap::new();
        annotations.insert("managed-by-operator".to_string(), "false".to_string());
        let obj = object_with(Some(annotations));

        assert_eq!(
            policy.decide(&gvk("ConfigMap"), &obj),
            OwnershipDecision::SoftManaged
        );
    }

    #[test]
    fn soft_managed_is_restored_but_not_owned() {
        assert!(!OwnershipDecision::SoftManaged.sets_owner_reference());
        assert!(OwnershipDecision::SoftManaged.restored_on_delete());
    }

    #[test]
    fn excluded_is_never_restored() {
        assert!(!OwnershipDecision::Excluded.restored_on_delete());
    }
}
