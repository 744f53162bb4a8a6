//! # Instance capability module
//!
//! The reconciler is generic over a "top-level custom resource" type; rather
//! than requiring one monolithic trait, the engine only asks for the
//! capabilities spec.md §3 actually names: *named*, *generationed*,
//! *deletable*, *condition-bearing*. `Named`/`Generationed`/`Deletable` are
//! blanket-implemented for anything that is a [`kube::Resource`], since that
//! metadata is generic across every custom resource. `ConditionBearing` is
//! implemented per concrete instance type because the conditions live under
//! a type-specific `status`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::{Resource, ResourceExt};

// -----------------------------------------------------------------------------
// Named

pub trait Named {
    fn instance_name(&self) -> String;
}

impl<T> Named for T
where
    T: ResourceExt,
{
    fn instance_name(&self) -> String {
        self.name_any()
    }
}

// -----------------------------------------------------------------------------
// Generationed

pub trait Generationed {
    fn generation(&self) -> i64;
}

impl<T> Generationed for T
where
    T: Resource,
{
    fn generation(&self) -> i64 {
        self.meta().generation.unwrap_or(0)
    }
}

// -----------------------------------------------------------------------------
// Deletable

pub trait Deletable {
    fn deletion_timestamp(&self) -> Option<&Time>;

    fn is_deleted(&self) -> bool {
        self.deletion_timestamp().is_some()
    }
}

impl<T> Deletable for T
where
    T: Resource,
{
    fn deletion_timestamp(&self) -> Option<&Time> {
        self.meta().deletion_timestamp.as_ref()
    }
}

// -----------------------------------------------------------------------------
// ConditionBearing

/// implemented once per top-level instance type, since conditions live
/// under a type-specific `status.conditions`.
pub trait ConditionBearing {
    fn conditions(&self) -> &[Condition];

    fn set_conditions(&mut self, conditions: Vec<Condition>);
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(CustomResource, JsonSchema, Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[kube(group = "test.local", version = "v1", kind = "Widget")]
    struct WidgetSpec {
        name: String,
    }

    #[test]
    fn named_uses_resource_metadata() {
        let widget = Widget {
            metadata: ObjectMeta {
                name: Some("my-widget".to_string()),
                ..Default::default()
            },
            spec: WidgetSpec {
                name: "ignored".to_string(),
            },
        };

        assert_eq!(widget.instance_name(), "my-widget");
    }

    #[test]
    fn deletable_reflects_timestamp() {
        let widget = Widget {
            metadata: ObjectMeta::default(),
            spec: WidgetSpec {
                name: "w".to_string(),
            },
        };

        assert!(!widget.is_deleted());
    }
}
