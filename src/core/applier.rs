//! # Resource applier module
//!
//! Idempotent create/patch of an ordered list of untyped objects, each run
//! through a chain of decorators before being sent to the cluster. Grounded
//! in the teacher's `svc::k8s::resource` patch/diff helpers, generalized from
//! a single typed resource to [`DynamicObject`] driven by a runtime GVK.

use std::fmt;

use kube::{
    api::{Api, ApiResource, Patch, PatchParams},
    core::{DynamicObject, GroupVersionKind},
};
use serde_json::Value;
use tracing::debug;

use super::object;

// -----------------------------------------------------------------------------
// ApplierError enum

#[derive(thiserror::Error, Debug)]
pub enum ApplierError {
    #[error("object '{0}' is missing a name")]
    MissingName(String),
    #[error("decorator '{decorator}' rejected object '{object}', {source}")]
    Decorator {
        decorator: String,
        object: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Gvk(#[from] object::ObjectError),
    #[error("failed to fetch existing object '{0}', {1}")]
    Get(String, kube::Error),
    #[error("failed to apply object '{0}', {1}")]
    Apply(String, kube::Error),
    #[error("failed to create object '{0}', {1}")]
    Create(String, kube::Error),
}

// -----------------------------------------------------------------------------
// Decorator

/// an `object -> object | error` transform run in order before an object is
/// sent to the cluster. Aborts the whole object on its first error.
pub trait Decorator: Send + Sync {
    fn name(&self) -> &str;

    fn decorate(&self, object: DynamicObject) -> Result<DynamicObject, ApplierError>;
}

pub type BoxedDecorator = Box<dyn Decorator>;

struct FnDecorator<F> {
    name: String,
    func: F,
}

impl<F> Decorator for FnDecorator<F>
where
    F: Fn(DynamicObject) -> Result<DynamicObject, ApplierError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn decorate(&self, object: DynamicObject) -> Result<DynamicObject, ApplierError> {
        (self.func)(object)
    }
}

fn decorator<F>(name: impl Into<String>, func: F) -> BoxedDecorator
where
    F: Fn(DynamicObject) -> Result<DynamicObject, ApplierError> + Send + Sync + 'static,
{
    Box::new(FnDecorator {
        name: name.into(),
        func,
    })
}

/// sets the owner reference naming `owner`, as directed by the ownership
/// policy at the call site (spec.md §4.3 point 4).
pub fn owner_reference_decorator(
    owner: k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference,
) -> BoxedDecorator {
    decorator("owner-reference", move |mut object| {
        object
            .metadata
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(owner.clone());
        Ok(object)
    })
}

/// sets `managed-by-operator=true` unless the object already carries the
/// annotation (invariant I2).
pub fn managed_by_operator_decorator() -> BoxedDecorator {
    decorator("managed-by-operator", |mut object| {
        object::mark_as_managed(&mut object);
        Ok(object)
    })
}

/// defaults `metadata.namespace` to `namespace` for every kind except
/// `Namespace` itself.
pub fn default_namespace_decorator(namespace: impl Into<String>) -> BoxedDecorator {
    let namespace = namespace.into();
    decorator("default-namespace", move |mut object| {
        let is_namespace_kind = object
            .types
            .as_ref()
            .map(|t| t.kind == "Namespace")
            .unwrap_or(false);

        if !is_namespace_kind && object.metadata.namespace.is_none() {
            object.metadata.namespace = Some(namespace.clone());
        }
        Ok(object)
    })
}

// -----------------------------------------------------------------------------
// ApplyKind

/// the caller-supplied hint distinguishing a patch-kind manifest's output
/// from every other manifest kind (spec.md §4.3 point 3).
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ApplyKind {
    Patch,
    NonPatch,
}

impl fmt::Display for ApplyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Patch => write!(f, "patch"),
            Self::NonPatch => write!(f, "non-patch"),
        }
    }
}

// -----------------------------------------------------------------------------
// ResourceApplier

pub struct ResourceApplier {
    client: kube::Client,
    field_manager: String,
}

impl ResourceApplier {
    pub fn new(client: kube::Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// applies every object in order, running `decorators` ahead of each and
    /// halting at the first failure. No transactional rollback; the cluster
    /// may be left in an intermediate state on error (spec.md §4.3).
    pub async fn apply_all(
        &self,
        objects: Vec<DynamicObject>,
        kind: ApplyKind,
        decorators: &[BoxedDecorator],
    ) -> Result<(), ApplierError> {
        for object in objects {
            self.apply_one(object, kind, decorators).await?;
        }
        Ok(())
    }

    async fn apply_one(
        &self,
        mut object: DynamicObject,
        kind: ApplyKind,
        decorators: &[BoxedDecorator],
    ) -> Result<(), ApplierError> {
        for dec in decorators {
            object = dec.decorate(object).map_err(|err| match err {
                ApplierError::Decorator { .. } => err,
                other => ApplierError::Decorator {
                    decorator: dec.name().to_string(),
                    object: object::gvk_of(&object)
                        .map(|gvk| gvk.kind)
                        .unwrap_or_default(),
                    source: Box::new(other),
                },
            })?;
        }

        let gvk = object::gvk_of(&object)?;
        let name = object
            .metadata
            .name
            .clone()
            .ok_or_else(|| ApplierError::MissingName(gvk.kind.clone()))?;
        let api = self.api_for(&gvk, object.metadata.namespace.as_deref());

        match kind {
            ApplyKind::Patch => self.merge_patch(&api, &name, &object).await,
            ApplyKind::NonPatch => {
                let existing = api
                    .get_opt(&name)
                    .await
                    .map_err(|err| ApplierError::Get(name.clone(), err))?;

                match existing {
                    None => self.create(&api, &object).await,
                    Some(current) if object::is_managed_by_false(&current) => {
                        debug!(name = %name, "skip apply, object is managed-by-operator=false");
                        Ok(())
                    }
                    Some(_) => self.server_side_apply(&api, &name, &object).await,
                }
            }
        }
    }

    fn api_for(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let api_resource = ApiResource::from_gvk(gvk);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            None => Api::all_with(self.client.clone(), &api_resource),
        }
    }

    async fn server_side_apply(
        &self,
        api: &Api<DynamicObject>,
        name: &str,
        object: &DynamicObject,
    ) -> Result<(), ApplierError> {
        let params = PatchParams::apply(&self.field_manager).force();
        api.patch(name, &params, &Patch::Apply(object))
            .await
            .map_err(|err| ApplierError::Apply(name.to_string(), err))?;
        Ok(())
    }

    /// merge-patches fields onto a resource this operator does not own,
    /// rather than server-side-applying it like every other manifest kind
    /// (spec.md §4.3 point 3: a patch manifest mutates an object it never
    /// takes ownership of).
    async fn merge_patch(
        &self,
        api: &Api<DynamicObject>,
        name: &str,
        object: &DynamicObject,
    ) -> Result<(), ApplierError> {
        api.patch(name, &PatchParams::default(), &Patch::Merge(object))
            .await
            .map_err(|err| ApplierError::Apply(name.to_string(), err))?;
        Ok(())
    }

    async fn create(&self, api: &Api<DynamicObject>, object: &DynamicObject) -> Result<(), ApplierError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        api.create(&Default::default(), object)
            .await
            .map_err(|err| ApplierError::Create(name, err))?;
        Ok(())
    }
}

#[allow(dead_code)]
fn as_value(object: &DynamicObject) -> Result<Value, serde_json::Error> {
    serde_json::to_value(object)
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::core::{ObjectMeta, TypeMeta};

    fn object_with(kind: &str, namespace: Option<&str>) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: kind.to_string(),
            }),
            metadata: ObjectMeta {
                name: Some("cm-1".to_string()),
                namespace: namespace.map(str::to_string),
                ..Default::default()
            },
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn default_namespace_decorator_skips_namespace_kind() {
        let dec = default_namespace_decorator("ns-1");
        let object = object_with("Namespace", None);
        let decorated = dec.decorate(object).unwrap();
        assert!(decorated.metadata.namespace.is_none());
    }

    #[test]
    fn default_namespace_decorator_fills_in_missing_namespace() {
        let dec = default_namespace_decorator("ns-1");
        let object = object_with("ConfigMap", None);
        let decorated = dec.decorate(object).unwrap();
        assert_eq!(decorated.metadata.namespace.as_deref(), Some("ns-1"));
    }

    #[test]
    fn default_namespace_decorator_does_not_override_existing() {
        let dec = default_namespace_decorator("ns-1");
        let object = object_with("ConfigMap", Some("ns-2"));
        let decorated = dec.decorate(object).unwrap();
        assert_eq!(decorated.metadata.namespace.as_deref(), Some("ns-2"));
    }

    #[test]
    fn owner_reference_decorator_appends_a_reference() {
        let owner = OwnerReference {
            api_version: "platform.opendatahub.io/v1".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
            kind: "DataScienceCluster".to_string(),
            name: "default".to_string(),
            uid: "uid-1".to_string(),
        };
        let dec = owner_reference_decorator(owner);
        let object = object_with("ConfigMap", Some("ns-1"));
        let decorated = dec.decorate(object).unwrap();

        let refs = decorated.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "DataScienceCluster");
        assert!(refs[0].controller.unwrap());
    }

    #[test]
    fn managed_by_operator_decorator_respects_override() {
        let mut object = object_with("ConfigMap", Some("ns-1"));
        let mut annotations = std::collections::BTreeMap::new();
        annotations.insert("managed-by-operator".to_string(), "false".to_string());
        object.metadata.annotations = Some(annotations);

        let decorated = managed_by_operator_decorator().decorate(object).unwrap();
        assert!(object::is_managed_by_false(&decorated));
    }
}
