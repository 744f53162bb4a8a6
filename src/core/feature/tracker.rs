//! # Feature tracker module
//!
//! The cluster-scoped entity that owns everything a feature creates, so
//! deleting it garbage-collects the feature's footprint (spec.md §3, wire
//! shape in §6). Derived the same way the teacher derives its addon CRDs,
//! generalized to a cluster-scoped kind with no spec-side user input beyond
//! identifying the feature's source.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, OwnerReference, Time};
use kube::{CustomResource, CustomResourceExt, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// SourceType / Source

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub enum SourceType {
    #[serde(rename = "DSCI")]
    Dsci,
    Component,
    Unknown,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Source {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub name: String,
}

// -----------------------------------------------------------------------------
// FeatureTracker custom resource

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "features.opendatahub.io")]
#[kube(version = "v1")]
#[kube(kind = "FeatureTracker")]
#[kube(singular = "featuretracker")]
#[kube(plural = "featuretrackers")]
#[kube(status = "FeatureTrackerStatus")]
#[kube(derive = "PartialEq")]
pub struct FeatureTrackerSpec {
    pub source: Source,
    #[serde(rename = "appNamespace")]
    pub app_namespace: String,
}

// -----------------------------------------------------------------------------
// FeatureTrackerStatus

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub enum FeatureTrackerPhase {
    #[default]
    Progressing,
    Ready,
    Error,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct FeatureTrackerStatus {
    pub phase: FeatureTrackerPhase,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// -----------------------------------------------------------------------------
// FeatureTracker helpers

impl FeatureTracker {
    /// an owner reference naming this tracker, for objects the feature
    /// produces (invariant I1).
    pub fn owner_reference(&self) -> OwnerReference {
        let api_resource = Self::api_resource();
        OwnerReference {
            api_version: api_resource.api_version,
            kind: api_resource.kind,
            name: self.name_any(),
            uid: self.uid().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// builds the terminal `Ready=True` condition written on a successful apply.
pub fn ready_condition(reason: &str, message: &str) -> Condition {
    Condition {
        type_: "Ready".to_string(),
        status: "True".to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation: None,
        last_transition_time: Time(Utc::now()),
    }
}

/// builds the terminal `Degraded=True` condition written on a failed apply,
/// tagged with the phase the failure occurred in.
pub fn degraded_condition(phase: &str, message: &str) -> Condition {
    Condition {
        type_: "Degraded".to_string(),
        status: "True".to_string(),
        reason: phase.to_string(),
        message: message.to_string(),
        observed_generation: None,
        last_transition_time: Time(Utc::now()),
    }
}

// -----------------------------------------------------------------------------
// naming

/// derives the deterministic tracker name of spec.md §3:
/// `<featureName>-<sourceType>-<sourceName>`.
pub fn tracker_name(feature_name: &str, source: &Source) -> String {
    let source_type = match source.source_type {
        SourceType::Dsci => "dsci",
        SourceType::Component => "component",
        SourceType::Unknown => "unknown",
    };
    format!("{feature_name}-{source_type}-{}", source.name)
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_name_is_deterministic_from_its_three_parts() {
        let source = Source {
            source_type: SourceType::Component,
            name: "dashboard".to_string(),
        };
        assert_eq!(tracker_name("service-mesh", &source), "service-mesh-component-dashboard");
    }
}
