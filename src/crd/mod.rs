//! # Custom resource definitions
//!
//! The concrete top-level instance this binary wires through
//! [`crate::core::builder::ReconcilerBuilder`] (`SPEC_FULL.md` §4): a
//! cluster-scoped `DataScienceCluster` carrying the capability set
//! [`crate::core::reconciler::Instance`] requires (generation,
//! deletionTimestamp, finalizers, `status.conditions`). Concrete
//! per-component manifest bundles (dashboard, workbenches, serving stacks)
//! are out of scope; this type only proves the core pipeline assembles and
//! runs end to end.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::instance::ConditionBearing;

// -----------------------------------------------------------------------------
// ManagementState

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default, JsonSchema)]
pub enum ManagementState {
    #[default]
    Managed,
    Removed,
    Unmanaged,
}

// -----------------------------------------------------------------------------
// ComponentSpec

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default, JsonSchema)]
pub struct ComponentSpec {
    #[serde(rename = "managementState", default)]
    pub management_state: ManagementState,
}

// -----------------------------------------------------------------------------
// DataScienceClusterSpec

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[kube(
    group = "platform.opendatahub.io",
    version = "v1",
    kind = "DataScienceCluster",
    plural = "datascienceclusters",
    singular = "datasciencecluster",
    shortname = "dsc",
    status = "DataScienceClusterStatus",
    scope = "Cluster",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct DataScienceClusterSpec {
    /// components this cluster enables, keyed by component name; an absent
    /// entry is treated as `Removed`.
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSpec>,
}

// -----------------------------------------------------------------------------
// DataScienceClusterStatus

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataScienceClusterStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ConditionBearing for DataScienceCluster {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }

    fn set_conditions(&mut self, conditions: Vec<Condition>) {
        self.status
            .get_or_insert_with(DataScienceClusterStatus::default)
            .conditions = conditions;
    }
}
