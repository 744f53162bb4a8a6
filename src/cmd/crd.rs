//! # Custom resource definition module
//!
//! This module provides custom resource module command line interface function
//! implementation

use std::sync::Arc;

use kube::CustomResourceExt;

use crate::{
    core::feature::tracker::FeatureTracker, crd::DataScienceCluster, svc::cfg::Configuration,
};

// -----------------------------------------------------------------------------
// CustomResourceDefinitionError enum

#[derive(thiserror::Error, Debug)]
pub enum CustomResourceDefinitionError {
    #[error("failed to serialize custom resource definition, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// view function

/// prints every custom resource definition this operator owns, so a cluster
/// operator can `kubectl apply` the whole set from one invocation.
pub async fn view(_config: Arc<Configuration>) -> Result<(), CustomResourceDefinitionError> {
    let crds = vec![
        serde_yaml::to_string(&DataScienceCluster::crd())
            .map_err(CustomResourceDefinitionError::Serialize)?,
        serde_yaml::to_string(&FeatureTracker::crd())
            .map_err(CustomResourceDefinitionError::Serialize)?,
    ];

    print!("{}", crds.join("---\n"));
    Ok(())
}
