//! # Feature handler module
//!
//! Registers feature providers and applies/deletes the resulting features in
//! FIFO/LIFO order with error aggregation (spec.md §4.5). The provider list
//! is rebuilt on every call, never mutated across calls (spec.md §5).

use crate::core::{context::Context, error::MultiError};

use super::Feature;

// -----------------------------------------------------------------------------
// FeatureProvider

/// registers zero or more features with the handler. A single provider
/// typically corresponds to one cross-cutting integration (service mesh,
/// serverless, ...).
pub trait FeatureProvider: Send + Sync {
    fn provide(&self, ctx: &Context, registry: &mut Vec<Feature>);
}

struct FnProvider<F>(F);

impl<F> FeatureProvider for FnProvider<F>
where
    F: Fn(&Context, &mut Vec<Feature>) + Send + Sync,
{
    fn provide(&self, ctx: &Context, registry: &mut Vec<Feature>) {
        (self.0)(ctx, registry)
    }
}

pub fn provider<F>(func: F) -> Box<dyn FeatureProvider>
where
    F: Fn(&Context, &mut Vec<Feature>) + Send + Sync + 'static,
{
    Box::new(FnProvider(func))
}

// -----------------------------------------------------------------------------
// FeatureHandler

#[derive(Default)]
pub struct FeatureHandler {
    providers: Vec<Box<dyn FeatureProvider>>,
}

impl FeatureHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Box<dyn FeatureProvider>) {
        self.providers.push(provider);
    }

    fn build_registry(&self, ctx: &Context) -> Vec<Feature> {
        let mut registry = Vec::new();
        for provider in &self.providers {
            provider.provide(ctx, &mut registry);
        }
        registry
    }

    /// repopulates the feature list and applies every feature in
    /// registration order, aggregating errors across peers rather than
    /// aborting on the first failure (spec.md §4.5).
    pub async fn apply(&self, ctx: &Context) -> Result<(), MultiError> {
        let mut registry = self.build_registry(ctx);
        let mut errors = MultiError::new();

        for feature in registry.iter_mut() {
            if let Err(err) = feature.apply(ctx).await {
                errors.push(err);
            }
        }

        errors.into_result()
    }

    /// repopulates the feature list, then cleans up in **reverse**
    /// registration order so dependent features undo patches before the
    /// resources they patched are deleted (spec.md §4.5).
    pub async fn delete(&self, ctx: &Context) -> Result<(), MultiError> {
        let mut registry = self.build_registry(ctx);
        let mut errors = MultiError::new();

        for feature in registry.iter_mut().rev() {
            if let Err(err) = feature.cleanup(ctx).await {
                errors.push(err);
            }
        }

        errors.into_result()
    }
}
