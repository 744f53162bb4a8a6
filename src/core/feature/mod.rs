//! # Feature module
//!
//! A bounded unit of work bundling preconditions, data providers, resource
//! creators, manifest appliers, postconditions and cleanups, owning a
//! persisted [`tracker::FeatureTracker`] (spec.md §3, §4.4). Assembled via
//! [`FeatureBuilder`], the same fluent-assembly idiom as the reconciler
//! builder (§4.10).

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::{api::PatchParams, Api, ResourceExt};
use serde_json::Value;
use tracing::{info, warn};

use crate::core::{
    action::ActionError,
    applier::{owner_reference_decorator, ApplierError, ApplyKind, BoxedDecorator, ResourceApplier},
    context::Context,
    error::MultiError,
    manifest::{Manifest, ManifestError, ManifestVariantKind, TemplateData},
};

use self::tracker::{FeatureTracker, FeatureTrackerPhase, FeatureTrackerSpec, FeatureTrackerStatus, Source};

pub mod handler;
pub mod tracker;
pub mod wait;

// -----------------------------------------------------------------------------
// FeatureData

/// the feature's key-value data bag, populated by data providers and
/// consumed by templated manifests.
#[derive(Clone, Debug, Default)]
pub struct FeatureData(BTreeMap<String, Value>);

impl FeatureData {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn as_template_data(&self) -> TemplateData {
        TemplateData::from_map(self.0.clone())
    }
}

// -----------------------------------------------------------------------------
// FeatureError

#[derive(thiserror::Error, Debug)]
pub enum FeatureError {
    #[error("preconditions failed, {0}")]
    PreConditions(MultiError),
    #[error("data provider '{0}' failed, {1}")]
    DataProvider(String, Box<dyn std::error::Error + Send + Sync>),
    #[error("resource creator '{0}' failed, {1}")]
    ResourceCreator(String, Box<dyn std::error::Error + Send + Sync>),
    #[error("manifest rendering failed, {0}")]
    Manifest(#[from] ManifestError),
    #[error("applying rendered objects failed, {0}")]
    Apply(#[from] ApplierError),
    #[error("postcondition '{0}' failed, {1}")]
    Postcondition(String, Box<dyn std::error::Error + Send + Sync>),
    #[error("cleanup failed, {0}")]
    Cleanup(MultiError),
    #[error("enabled predicate failed, {0}")]
    Enabled(Box<dyn std::error::Error + Send + Sync>),
    #[error("tracker operation failed, {0}")]
    Tracker(#[source] kube::Error),
}

impl FeatureError {
    /// the phase tag written as the tracker's `Degraded` reason on failure.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::PreConditions(_) => "PreConditions",
            Self::DataProvider(_, _) => "DataProviders",
            Self::ResourceCreator(_, _) => "ResourceCreators",
            Self::Manifest(_) | Self::Apply(_) => "ManifestApplication",
            Self::Postcondition(_, _) => "PostConditions",
            Self::Cleanup(_) => "Cleanup",
            Self::Enabled(_) => "Enabled",
            Self::Tracker(_) => "Tracker",
        }
    }
}

impl From<FeatureError> for ActionError {
    fn from(err: FeatureError) -> Self {
        ActionError::failed_with_reason(err.phase(), err)
    }
}

// -----------------------------------------------------------------------------
// step traits

#[async_trait]
pub trait Precondition: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, ctx: &Context, data: &FeatureData) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn provide(&self, ctx: &Context, data: &mut FeatureData) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
pub trait ResourceCreator: Send + Sync {
    fn name(&self) -> &str;
    async fn create(&self, ctx: &Context, data: &FeatureData) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
pub trait Postcondition: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, ctx: &Context, data: &FeatureData) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
pub trait Cleanup: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ctx: &Context, data: &FeatureData) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
pub trait EnabledPredicate: Send + Sync {
    async fn evaluate(&self, ctx: &Context) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

pub struct AlwaysEnabled;

#[async_trait]
impl EnabledPredicate for AlwaysEnabled {
    async fn evaluate(&self, _ctx: &Context) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        Ok(true)
    }
}

// -----------------------------------------------------------------------------
// ManifestEntry

pub struct ManifestEntry {
    pub manifest: Manifest,
    pub managed: bool,
}

// -----------------------------------------------------------------------------
// Feature

pub struct Feature {
    name: String,
    source: Source,
    app_namespace: String,
    enabled: Box<dyn EnabledPredicate>,
    preconditions: Vec<Box<dyn Precondition>>,
    data_providers: Vec<Box<dyn DataProvider>>,
    resource_creators: Vec<Box<dyn ResourceCreator>>,
    manifests: Vec<ManifestEntry>,
    postconditions: Vec<Box<dyn Postcondition>>,
    cleanups: Vec<Box<dyn Cleanup>>,
    data: FeatureData,
    tracker: Option<FeatureTracker>,
}

impl Feature {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracker(&self) -> Option<&FeatureTracker> {
        self.tracker.as_ref()
    }

    /// runs the apply sequence of spec.md §4.4, steps 1-8.
    pub async fn apply(&mut self, ctx: &Context) -> Result<(), FeatureError> {
        let enabled = self
            .enabled
            .evaluate(ctx)
            .await
            .map_err(FeatureError::Enabled)?;

        if !enabled {
            info!(feature = %self.name, "feature disabled, skipping apply");
            return Ok(());
        }

        let tracker_api: Api<FeatureTracker> = Api::all(ctx.kube.clone());
        let name = tracker::tracker_name(&self.name, &self.source);

        let tracker = match tracker_api.get_opt(&name).await.map_err(FeatureError::Tracker)? {
            Some(existing) => existing,
            None => {
                let created = FeatureTracker::new(
                    &name,
                    FeatureTrackerSpec {
                        source: self.source.clone(),
                        app_namespace: self.app_namespace.clone(),
                    },
                );
                tracker_api
                    .create(&Default::default(), &created)
                    .await
                    .map_err(FeatureError::Tracker)?
            }
        };
        self.tracker = Some(tracker);

        let result = self.apply_inner(ctx).await;
        self.write_terminal_condition(ctx, &result).await;
        result
    }

    async fn apply_inner(&mut self, ctx: &Context) -> Result<(), FeatureError> {
        let mut precondition_errors = MultiError::new();
        for precondition in &self.preconditions {
            if let Err(err) = precondition.check(ctx, &self.data).await {
                warn!(feature = %self.name, precondition = precondition.name(), error = %err, "precondition failed");
                precondition_errors.push(NamedError(precondition.name().to_string(), err));
            }
        }
        precondition_errors
            .into_result()
            .map_err(FeatureError::PreConditions)?;

        for provider in &self.data_providers {
            provider
                .provide(ctx, &mut self.data)
                .await
                .map_err(|err| FeatureError::DataProvider(provider.name().to_string(), err))?;
        }

        for creator in &self.resource_creators {
            creator
                .create(ctx, &self.data)
                .await
                .map_err(|err| FeatureError::ResourceCreator(creator.name().to_string(), err))?;
        }

        self.apply_manifests(ctx).await?;

        for postcondition in &self.postconditions {
            postcondition
                .check(ctx, &self.data)
                .await
                .map_err(|err| FeatureError::Postcondition(postcondition.name().to_string(), err))?;
        }

        Ok(())
    }

    async fn apply_manifests(&self, ctx: &Context) -> Result<(), FeatureError> {
        let applier = ResourceApplier::new(ctx.kube.clone(), "platform-operator");
        let owner = self
            .tracker
            .as_ref()
            .expect("tracker to be set before manifests are applied")
            .owner_reference();

        let decorators: Vec<BoxedDecorator> = vec![owner_reference_decorator(owner)];

        for entry in &self.manifests {
            let mut objects = entry.manifest.process(ctx.manifests.as_ref(), &self.data.as_template_data())?;

            let kind = match entry.manifest.kind() {
                ManifestVariantKind::Patch => ApplyKind::Patch,
                ManifestVariantKind::NonPatch => {
                    if entry.managed {
                        Manifest::mark_as_managed(&mut objects);
                    }
                    ApplyKind::NonPatch
                }
            };

            applier.apply_all(objects, kind, &decorators).await?;
        }

        Ok(())
    }

    /// runs cleanups in reverse registration order, then deletes the
    /// tracker last so its cascade garbage-collects anything a cleanup step
    /// left behind (spec.md §4.4).
    pub async fn cleanup(&mut self, ctx: &Context) -> Result<(), FeatureError> {
        let enabled = self
            .enabled
            .evaluate(ctx)
            .await
            .map_err(FeatureError::Enabled)?;

        let mut errors = MultiError::new();

        if enabled {
            for cleanup in self.cleanups.iter().rev() {
                if let Err(err) = cleanup.run(ctx, &self.data).await {
                    warn!(feature = %self.name, cleanup = cleanup.name(), error = %err, "cleanup step failed");
                    errors.push(NamedError(cleanup.name().to_string(), err));
                }
            }
        }

        let tracker_api: Api<FeatureTracker> = Api::all(ctx.kube.clone());
        let name = tracker::tracker_name(&self.name, &self.source);
        if tracker_api.get_opt(&name).await.map_err(FeatureError::Tracker)?.is_some() {
            if let Err(err) = tracker_api.delete(&name, &Default::default()).await {
                errors.push(NamedError("tracker-deletion".to_string(), Box::new(err)));
            }
        }

        errors.into_result().map_err(FeatureError::Cleanup)
    }

    async fn write_terminal_condition(&self, ctx: &Context, result: &Result<(), FeatureError>) {
        let Some(tracker) = &self.tracker else { return };
        let tracker_api: Api<FeatureTracker> = Api::all(ctx.kube.clone());

        let (phase, condition) = match result {
            Ok(()) => (
                FeatureTrackerPhase::Ready,
                tracker::ready_condition("FeatureCreated", ""),
            ),
            Err(err) => (
                FeatureTrackerPhase::Error,
                tracker::degraded_condition(err.phase(), &err.to_string()),
            ),
        };

        let status = FeatureTrackerStatus {
            phase,
            conditions: vec![condition],
        };

        let patch = serde_json::json!({ "status": status });
        if let Err(err) = tracker_api
            .patch_status(
                tracker.name_any().as_str(),
                &PatchParams::default(),
                &kube::api::Patch::Merge(patch),
            )
            .await
        {
            warn!(feature = %self.name, error = %err, "failed to write terminal condition to tracker");
        }
    }
}

/// adapts a boxed error with a step name attached, so [`MultiError`]'s
/// aggregated display still identifies which precondition/cleanup failed.
#[derive(Debug)]
struct NamedError(String, Box<dyn std::error::Error + Send + Sync>);

impl std::fmt::Display for NamedError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}: {}", self.0, self.1)
    }
}

impl std::error::Error for NamedError {}

// -----------------------------------------------------------------------------
// FeatureBuilder

#[derive(Default)]
pub struct FeatureBuilder {
    name: Option<String>,
    source: Option<Source>,
    app_namespace: Option<String>,
    enabled: Option<Box<dyn EnabledPredicate>>,
    preconditions: Vec<Box<dyn Precondition>>,
    data_providers: Vec<Box<dyn DataProvider>>,
    resource_creators: Vec<Box<dyn ResourceCreator>>,
    manifests: Vec<ManifestEntry>,
    postconditions: Vec<Box<dyn Postcondition>>,
    cleanups: Vec<Box<dyn Cleanup>>,
}

impl FeatureBuilder {
    pub fn new(name: impl Into<String>, source: Source, app_namespace: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            source: Some(source),
            app_namespace: Some(app_namespace.into()),
            ..Default::default()
        }
    }

    pub fn enabled_when(mut self, predicate: Box<dyn EnabledPredicate>) -> Self {
        self.enabled = Some(predicate);
        self
    }

    pub fn with_precondition(mut self, precondition: Box<dyn Precondition>) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn with_data_provider(mut self, provider: Box<dyn DataProvider>) -> Self {
        self.data_providers.push(provider);
        self
    }

    pub fn with_resource_creator(mut self, creator: Box<dyn ResourceCreator>) -> Self {
        self.resource_creators.push(creator);
        self
    }

    pub fn with_manifest(mut self, manifest: Manifest, managed: bool) -> Self {
        self.manifests.push(ManifestEntry { manifest, managed });
        self
    }

    pub fn with_postcondition(mut self, postcondition: Box<dyn Postcondition>) -> Self {
        self.postconditions.push(postcondition);
        self
    }

    pub fn with_cleanup(mut self, cleanup: Box<dyn Cleanup>) -> Self {
        self.cleanups.push(cleanup);
        self
    }

    pub fn build(self) -> Feature {
        Feature {
            name: self.name.expect("feature name to be set"),
            source: self.source.expect("feature source to be set"),
            app_namespace: self.app_namespace.expect("feature app namespace to be set"),
            enabled: self.enabled.unwrap_or_else(|| Box::new(AlwaysEnabled)),
            preconditions: self.preconditions,
            data_providers: self.data_providers,
            resource_creators: self.resource_creators,
            manifests: self.manifests,
            postconditions: self.postconditions,
            cleanups: self.cleanups,
            data: FeatureData::default(),
            tracker: None,
        }
    }
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_data_round_trips_a_value() {
        let mut data = FeatureData::default();
        data.set("key", Value::String("value".to_string()));
        assert_eq!(data.get("key"), Some(&Value::String("value".to_string())));
    }

    #[test]
    fn feature_error_phase_matches_its_variant() {
        let err = FeatureError::PreConditions(MultiError::new());
        assert_eq!(err.phase(), "PreConditions");
    }
}
