//! # Reconciler context module
//!
//! Shared, read-only-after-construction state handed to every action and
//! every reconciler. Mirrors the teacher's `svc::k8s::Context`, generalized
//! away from a single third-party API client towards the manifest source and
//! dynamic watch engine the core needs.

use std::sync::Arc;

use crate::{
    core::{manifest::fs::ManifestSource, ownership::OwnershipPolicy, watch::DynamicWatchEngine},
    svc::cfg::Configuration,
};

// -----------------------------------------------------------------------------
// Context structure

/// contains everything actions need to interact with the cluster and the
/// manifest tree, independent of which instance type is being reconciled.
#[derive(Clone)]
pub struct Context {
    pub kube: kube::Client,
    pub config: Arc<Configuration>,
    pub manifests: Arc<dyn ManifestSource>,
    pub ownership: Arc<OwnershipPolicy>,
    pub dynamic_watch: Arc<DynamicWatchEngine>,
    /// identifies the running controller for metrics labels, e.g.
    /// `datascienceclusters.platform.opendatahub.io`.
    pub controller: String,
}

impl Context {
    pub fn new(
        kube: kube::Client,
        config: Arc<Configuration>,
        manifests: Arc<dyn ManifestSource>,
        ownership: Arc<OwnershipPolicy>,
        dynamic_watch: Arc<DynamicWatchEngine>,
        controller: impl Into<String>,
    ) -> Self {
        Self {
            kube,
            config,
            manifests,
            ownership,
            dynamic_watch,
            controller: controller.into(),
        }
    }
}
