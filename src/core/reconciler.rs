//! # Reconciler module
//!
//! Loads an instance, manages the platform finalizer, runs the configured
//! action pipeline, and materializes status conditions (spec.md §4.6). The
//! generic shape is grounded on the teacher's `svc::k8s::Reconciler` trait,
//! narrowed from a namespaced-resource blanket impl to a concrete struct
//! driving a single cluster-scoped instance type.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::{
    api::{Patch, PatchParams},
    runtime::controller::Action as ControllerAction,
    Api, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, time::Duration};
use tracing::{debug, error, info, warn};

use crate::svc::k8s::finalizer;

use super::{
    action::{ActionError, BoxedAction},
    condition::{ConditionManager, PipelineOutcome},
    context::Context,
    instance::{ConditionBearing, Deletable, Generationed, Named},
    request::ReconciliationRequest,
};

pub const PLATFORM_FINALIZER: &str = "platform.opendatahub.io/finalizer";

// -----------------------------------------------------------------------------
// ReconcileError

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error("failed to update finalizers, {0}")]
    Finalizer(kube::Error),
    #[error("failed to write status, {0}")]
    Status(kube::Error),
}

// -----------------------------------------------------------------------------
// trait alias for reconcilable instances

/// the capability set the reconciler requires of the top-level custom
/// resource it drives (spec.md §3).
pub trait Instance:
    Resource<Scope = k8s_openapi::ClusterResourceScope>
    + Named
    + Generationed
    + Deletable
    + ConditionBearing
    + ResourceExt
    + Serialize
    + DeserializeOwned
    + Clone
    + Debug
    + Send
    + Sync
    + 'static
where
    <Self as Resource>::DynamicType: Default,
{
}

impl<T> Instance for T
where
    T: Resource<Scope = k8s_openapi::ClusterResourceScope>
        + Named
        + Generationed
        + Deletable
        + ConditionBearing
        + ResourceExt
        + Serialize
        + DeserializeOwned
        + Clone
        + Debug
        + Send
        + Sync
        + 'static,
    <T as Resource>::DynamicType: Default,
{
}

// -----------------------------------------------------------------------------
// Reconciler

/// the assembled reconciler for a single instance type, produced by
/// [`super::builder::ReconcilerBuilder::build`].
pub struct Reconciler<T> {
    pub(super) context: Context,
    pub(super) release: String,
    pub(super) actions: Vec<BoxedAction<T>>,
    pub(super) finalizers: Vec<BoxedAction<T>>,
    pub(super) condition_manager: ConditionManager,
    pub(super) dynamic_ownership_enabled: bool,
    /// when `false` (the default), an upsert whose `metadata.generation`
    /// hasn't moved since the happy condition's last `observedGeneration`
    /// skips the action pipeline entirely (spec.md §4.10).
    pub(super) broad_predicate: bool,
}

impl<T> Reconciler<T>
where
    T: Instance,
    <T as Resource>::DynamicType: Default,
{
    /// the per-event entry point handed to [`kube::runtime::Controller::run`].
    pub async fn reconcile(
        instance: Arc<T>,
        reconciler: Arc<Self>,
    ) -> Result<ControllerAction, ReconcileError> {
        let name = instance.instance_name();
        let api: Api<T> = Api::all(reconciler.context.kube.clone());

        if instance.is_deleted() {
            return reconciler.reconcile_deletion(&api, instance, &name).await;
        }

        reconciler.reconcile_upsert(&api, instance, &name).await
    }

    async fn reconcile_deletion(
        &self,
        api: &Api<T>,
        instance: Arc<T>,
        name: &str,
    ) -> Result<ControllerAction, ReconcileError> {
        if !finalizer::contains(instance.as_ref(), PLATFORM_FINALIZER) {
            return Ok(ControllerAction::await_change());
        }

        let mut request = ReconciliationRequest::new(instance.clone(), self.release.clone());
        let outcome = self.run_pipeline(&self.finalizers, &mut request).await;

        if let PipelineOutcome::Failed { reason, message, .. } = &outcome {
            warn!(name, reason, message, "finalizer pipeline failed, finalizer left in place");
            return Ok(ControllerAction::requeue(Duration::from_secs(30)));
        }

        let current = api.get(name).await.map_err(ReconcileError::Finalizer)?;
        let updated = finalizer::remove(current, PLATFORM_FINALIZER);
        api.replace(name, &PatchParams::default().into(), &updated)
            .await
            .map_err(ReconcileError::Finalizer)?;

        info!(name, "removed platform finalizer after successful cleanup");
        Ok(ControllerAction::await_change())
    }

    async fn reconcile_upsert(
        &self,
        api: &Api<T>,
        instance: Arc<T>,
        name: &str,
    ) -> Result<ControllerAction, ReconcileError> {
        if !self.finalizers.is_empty() && !finalizer::contains(instance.as_ref(), PLATFORM_FINALIZER) {
            let current = api.get(name).await.map_err(ReconcileError::Finalizer)?;
            let updated = finalizer::add(current, PLATFORM_FINALIZER);
            api.replace(name, &PatchParams::default().into(), &updated)
                .await
                .map_err(ReconcileError::Finalizer)?;
            debug!(name, "added platform finalizer");
        }

        if !self.broad_predicate && self.generation_already_observed(instance.as_ref()) {
            debug!(name, generation = instance.generation(), "generation already observed, skipping pipeline");
            return Ok(ControllerAction::await_change());
        }

        let mut request = ReconciliationRequest::new(instance.clone(), self.release.clone());
        let outcome = self.run_pipeline(&self.actions, &mut request).await;

        if self.dynamic_ownership_enabled {
            self.context
                .dynamic_watch
                .register_for_generated(&self.context.ownership, name, &request.generated)
                .await;
        }

        self.write_status(api, instance.as_ref(), name, &outcome).await?;

        Ok(ControllerAction::await_change())
    }

    /// true when the happy condition's last `observedGeneration` already
    /// matches the instance's current generation, i.e. nothing the
    /// generation-only predicate cares about has changed since the last run.
    fn generation_already_observed(&self, instance: &T) -> bool {
        instance
            .conditions()
            .iter()
            .find(|c| c.type_ == self.condition_manager.happy_condition())
            .and_then(|c| c.observed_generation)
            .map_or(false, |observed| observed == instance.generation())
    }

    /// runs `pipeline` in registration order, halting at the first
    /// non-`Stop` error (spec.md §4.1, §4.6).
    async fn run_pipeline(
        &self,
        pipeline: &[BoxedAction<T>],
        request: &mut ReconciliationRequest<T>,
    ) -> PipelineOutcome {
        for action in pipeline {
            match action.run(&self.context, request).await {
                Ok(()) => continue,
                Err(ActionError::Stop(message)) => {
                    debug!(action = action.name(), "detected stop marker");
                    return PipelineOutcome::Stopped {
                        phase: action.condition_type().to_string(),
                        message,
                    };
                }
                Err(err) => {
                    error!(action = action.name(), error = %err, "action failed");
                    let reason = err.reason().unwrap_or("FailedApplying").to_string();
                    return PipelineOutcome::Failed {
                        phase: action.condition_type().to_string(),
                        reason,
                        message: err.to_string(),
                    };
                }
            }
        }
        PipelineOutcome::Success
    }

    async fn write_status(
        &self,
        api: &Api<T>,
        instance: &T,
        name: &str,
        outcome: &PipelineOutcome,
    ) -> Result<(), ReconcileError> {
        let conditions: &[Condition] = instance.conditions();
        let derived = self
            .condition_manager
            .derive(instance.generation(), conditions, outcome);

        let patch = serde_json::json!({ "status": { "conditions": derived } });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(ReconcileError::Status)?;

        Ok(())
    }

    /// maps a reconciliation error to a retry policy, used as the
    /// `Controller::run` error handler.
    pub fn error_policy(_instance: Arc<T>, error: &ReconcileError, _reconciler: Arc<Self>) -> ControllerAction {
        warn!(error = %error, "reconciliation failed, requeueing");
        ControllerAction::requeue(Duration::from_secs(5))
    }
}
