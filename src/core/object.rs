//! # Untyped object module
//!
//! This module provides the generic "untyped object" currency shared by the
//! manifest loader, resource applier, ownership policy and dynamic watch
//! engine: a [`kube::core::DynamicObject`] plus helpers to extract its GVK
//! and the `managed-by-operator` annotation the rest of the core keys off.

use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};

// -----------------------------------------------------------------------------
// constants

pub const MANAGED_BY_OPERATOR_ANNOTATION: &str = "managed-by-operator";
pub const INSTANCE_NAME_ANNOTATION: &str = "instance-name";

// -----------------------------------------------------------------------------
// ObjectError enum

#[derive(thiserror::Error, Debug)]
pub enum ObjectError {
    #[error("object is missing apiVersion/kind type metadata")]
    MissingTypeMeta,
    #[error("failed to parse apiVersion '{0}'")]
    InvalidApiVersion(String),
}

// -----------------------------------------------------------------------------
// helpers

/// extracts the group/version/kind identity of an untyped object.
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind, ObjectError> {
    let types: &TypeMeta = obj.types.as_ref().ok_or(ObjectError::MissingTypeMeta)?;
    gvk_from_type_meta(types)
}

pub fn gvk_from_type_meta(types: &TypeMeta) -> Result<GroupVersionKind, ObjectError> {
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), types.api_version.clone()),
    };

    if version.is_empty() {
        return Err(ObjectError::InvalidApiVersion(types.api_version.clone()));
    }

    Ok(GroupVersionKind {
        group,
        version,
        kind: types.kind.clone(),
    })
}

/// reads the `managed-by-operator` annotation, if present, as a boolean.
/// Absence is treated as `true` (managed), matching §4.8's "missing"
/// branch of the ownership matrix.
pub fn is_managed_by_operator(obj: &DynamicObject) -> bool {
    match obj
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(MANAGED_BY_OPERATOR_ANNOTATION))
        .map(String::as_str)
    {
        Some("false") => false,
        _ => true,
    }
}

/// returns whether the `managed-by-operator` annotation is explicitly
/// present and set to `"false"`.
pub fn is_managed_by_false(obj: &DynamicObject) -> bool {
    !is_managed_by_operator(obj)
}

/// sets the `managed-by-operator=true` annotation unless one is already
/// present, respecting a user override (invariant I2 of spec.md §3).
pub fn mark_as_managed(obj: &mut DynamicObject) {
    let annotations = obj.metadata.annotations.get_or_insert_with(Default::default);
    annotations
        .entry(MANAGED_BY_OPERATOR_ANNOTATION.to_string())
        .or_insert_with(|| "true".to_string());
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap;

    use super::*;

    fn object_with(api_version: &str, kind: &str) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            }),
            metadata: ObjectMeta::default(),
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn gvk_splits_group_and_version() {
        let obj = object_with("apps/v1", "Deployment");
        let gvk = gvk_of(&obj).unwrap();
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Deployment");
    }

    #[test]
    fn gvk_handles_core_group() {
        let obj = object_with("v1", "ConfigMap");
        let gvk = gvk_of(&obj).unwrap();
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
    }

    #[test]
    fn missing_annotation_defaults_to_managed() {
        let obj = object_with("v1", "ConfigMap");
        assert!(is_managed_by_operator(&obj));
        assert!(!is_managed_by_false(&obj));
    }

    #[test]
    fn explicit_false_annotation_is_soft_managed() {
        let mut obj = object_with("v1", "ConfigMap");
        let mut annotations = BTreeMap::new();
        annotations.insert(MANAGED_BY_OPERATOR_ANNOTATION.to_string(), "false".to_string());
        obj.metadata.annotations = Some(annotations);

        assert!(!is_managed_by_operator(&obj));
        assert!(is_managed_by_false(&obj));
    }

    #[test]
    fn mark_as_managed_respects_existing_override() {
        let mut obj = object_with("v1", "ConfigMap");
        let mut annotations = BTreeMap::new();
        annotations.insert(MANAGED_BY_OPERATOR_ANNOTATION.to_string(), "false".to_string());
        obj.metadata.annotations = Some(annotations);

        mark_as_managed(&mut obj);
        assert!(is_managed_by_false(&obj));
    }

    #[test]
    fn mark_as_managed_sets_true_when_absent() {
        let mut obj = object_with("v1", "ConfigMap");
        mark_as_managed(&mut obj);
        assert!(is_managed_by_operator(&obj));
    }
}
