//! # Builder module
//!
//! Fluent assembly of a [`reconciler::Reconciler`] with watches, ownership
//! options, actions and finalizers, terminating in `build()`. Modeled on the
//! teacher's `svc::k8s::ControllerBuilder` trait, generalized from a fixed
//! `(Reconciler, Controller)` pair per custom resource kind into a reusable
//! fluent options table any instance type can drive.

use std::{
    collections::HashSet,
    fmt::Debug,
    hash::Hash,
    sync::Arc,
};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::Api,
    core::GroupVersionKind,
    runtime::{watcher, Controller},
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;

use super::{
    action::{Action, ActionError, BoxedAction},
    condition::ConditionManager,
    context::Context,
    ownership::OwnershipPolicy,
    reconciler::{Instance, Reconciler},
    request::ReconciliationRequest,
    watch::DynamicWatchEngine,
};

/// `(ctx, request) -> bool, error`, re-evaluated every reconciliation; a
/// watch declared [`ReconcilerBuilder::dynamic`] only registers once every
/// predicate in the list passes (spec.md §4.10).
pub type DynamicPredicate<T> =
    Box<dyn Fn(&Context, &ReconciliationRequest<T>) -> Result<bool, ActionError> + Send + Sync>;

// -----------------------------------------------------------------------------
// dynamic watch gate action

/// the terminal action appended by [`ReconcilerBuilder::with_dynamic_ownership`].
/// Registration itself happens in [`Reconciler::reconcile_upsert`] once the
/// pipeline completes; this action only evaluates the configured dynamic
/// predicates so a watch whose prerequisite CRD is still absent is skipped
/// for the cycle (spec.md open question: registration is monotonic, so a
/// later `false` never unregisters an already-registered watch).
struct DynamicGate<T> {
    predicates: Vec<DynamicPredicate<T>>,
}

#[async_trait]
impl<T> Action<T> for DynamicGate<T>
where
    T: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "dynamic-watch-gate"
    }

    async fn run(&self, ctx: &Context, request: &mut ReconciliationRequest<T>) -> Result<(), ActionError> {
        for predicate in &self.predicates {
            if !predicate(ctx, request)? {
                return Ok(());
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// BuiltReconciler

/// the output of [`ReconcilerBuilder::build`]: a ready-to-run reconciler
/// paired with the `Controller` that drives it, already wired with the
/// "for" watch, every statically declared owned/watched source, and the
/// dynamic-ownership gate when configured.
pub struct BuiltReconciler<T>
where
    T: Instance,
    <T as Resource>::DynamicType: Default,
{
    pub reconciler: Arc<Reconciler<T>>,
    pub controller: Controller<T>,
}

impl<T> BuiltReconciler<T>
where
    T: Instance,
    <T as Resource>::DynamicType: Default + Eq + Hash + Clone,
{
    /// drains the controller's reconciliation stream to completion, logging
    /// every terminal outcome. Re-entry beyond this call is event-driven.
    pub async fn run(self) {
        use futures::StreamExt;

        let reconciler = self.reconciler;
        self.controller
            .run(Reconciler::reconcile, Reconciler::error_policy, reconciler)
            .for_each(|result| async move {
                match result {
                    Ok(action) => tracing::debug!(?action, "reconciliation completed"),
                    Err(err) => tracing::warn!(error = %err, "reconciliation stream reported an error"),
                }
            })
            .await;
    }
}

// -----------------------------------------------------------------------------
// ReconcilerBuilder

pub struct ReconcilerBuilder<T>
where
    T: Instance,
    <T as Resource>::DynamicType: Default + Eq + Hash + Clone,
{
    context: Context,
    release: String,
    instance_name: Option<String>,
    actions: Vec<BoxedAction<T>>,
    finalizers: Vec<BoxedAction<T>>,
    condition_manager: ConditionManager,
    dynamic_ownership_enabled: bool,
    excluded_gvks: HashSet<GroupVersionKind>,
    dynamic_predicates: Vec<DynamicPredicate<T>>,
    static_gvks: HashSet<GroupVersionKind>,
    owns: Vec<Box<dyn FnOnce(Controller<T>) -> Controller<T> + Send>>,
    dynamic_watch_trigger: Option<(mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>)>,
    broad_predicate: bool,
}

impl<T> ReconcilerBuilder<T>
where
    T: Instance,
    <T as Resource>::DynamicType: Default + Eq + Hash + Clone,
{
    pub fn new(context: Context, release: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            context,
            release: release.into(),
            instance_name: None,
            actions: Vec::new(),
            finalizers: Vec::new(),
            condition_manager: ConditionManager::default(),
            dynamic_ownership_enabled: false,
            excluded_gvks: HashSet::new(),
            dynamic_predicates: Vec::new(),
            static_gvks: HashSet::new(),
            owns: Vec::new(),
            dynamic_watch_trigger: Some((tx, rx)),
            broad_predicate: false,
        }
    }

    /// overrides the name used by the condition manager and log scope;
    /// defaults to the instance kind's plural.
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    pub fn with_action(mut self, action: BoxedAction<T>) -> Self {
        self.actions.push(action);
        self
    }

    /// opts the instance watch into reacting to every change (status-only
    /// edits included). The default is generation-only: the reconciler skips
    /// the action pipeline when `metadata.generation` hasn't moved since the
    /// last reported `observedGeneration` on the happy condition (spec.md
    /// §4.10).
    pub fn with_broad_predicate(mut self) -> Self {
        self.broad_predicate = true;
        self
    }

    /// appends to the finalizer pipeline and enables automatic finalizer
    /// management (spec.md §4.10): an instance with none of these registered
    /// never carries the platform finalizer.
    pub fn with_finalizer(mut self, action: BoxedAction<T>) -> Self {
        self.finalizers.push(action);
        self
    }

    /// declares a static controller-owner watch over `Child`, using the
    /// same unfiltered `watcher::Config::default()` as every watch this
    /// builder registers.
    pub fn owns<Child>(mut self, namespace: Option<String>) -> Self
    where
        Child: Resource<DynamicType = ()>
            + Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
    {
        let gvk = GroupVersionKind {
            group: Child::group(&()).to_string(),
            version: Child::version(&()).to_string(),
            kind: Child::kind(&()).to_string(),
        };
        self.static_gvks.insert(gvk);

        let client = self.context.kube.clone();
        self.owns.push(Box::new(move |controller| {
            let api: Api<Child> = match namespace {
                Some(ns) => Api::namespaced(client, &ns),
                None => Api::all(client),
            };
            controller.owns(api, watcher::Config::default())
        }));
        self
    }

    /// declares a watch not based on owner references, keyed to the owning
    /// instance by a caller-supplied mapping function.
    pub fn watches<Other>(
        mut self,
        api: Api<Other>,
        mapper: impl Fn(Other) -> Option<String> + Send + Sync + 'static,
    ) -> Self
    where
        Other: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        Other::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
    {
        self.owns.push(Box::new(move |controller| {
            controller.watches(api, watcher::Config::default(), move |obj| {
                mapper(obj).map(|name| kube::runtime::reflector::ObjectRef::<T>::new(&name))
            })
        }));
        self
    }

    /// registers a predicate gating whether the dynamic-watch action
    /// registers any watch this cycle. Re-evaluated every reconcile; once a
    /// watch is registered it is never unregistered even if a later
    /// evaluation returns `false` (spec.md §9 open question, resolved
    /// monotonic).
    pub fn dynamic(
        mut self,
        predicate: impl Fn(&Context, &ReconciliationRequest<T>) -> Result<bool, ActionError> + Send + Sync + 'static,
    ) -> Self {
        self.dynamic_predicates.push(Box::new(predicate));
        self
    }

    /// enables the ownership policy engine (C8) and the terminal
    /// dynamic-watch action.
    pub fn with_dynamic_ownership(mut self, excluded_gvks: HashSet<GroupVersionKind>) -> Self {
        self.dynamic_ownership_enabled = true;
        self.excluded_gvks = excluded_gvks;
        self
    }

    /// extends the dependent-condition list managed by the condition
    /// manager (C9).
    pub fn with_conditions(mut self, dependents: impl IntoIterator<Item = String>) -> Self {
        for dependent in dependents {
            self.condition_manager = std::mem::take(&mut self.condition_manager).with_dependent(dependent);
        }
        self
    }

    /// resolves the instance GVK, constructs the reconciler, registers the
    /// "for" watch with the chosen predicate, registers static
    /// owned/watched sources, and returns the assembled pair (spec.md
    /// §4.10). Fatal configuration mistakes (e.g. an unregistered scheme)
    /// surface here, never at reconcile time.
    pub fn build(mut self) -> BuiltReconciler<T> {
        let (trigger, rx) = self
            .dynamic_watch_trigger
            .take()
            .expect("dynamic watch trigger to be set exactly once");

        let controller_name = self
            .instance_name
            .clone()
            .unwrap_or_else(|| T::kind(&Default::default()).to_string());

        let ownership = Arc::new(if self.dynamic_ownership_enabled {
            OwnershipPolicy::new(true, self.excluded_gvks.clone())
        } else {
            OwnershipPolicy::disabled()
        });

        let dynamic_watch = Arc::new(DynamicWatchEngine::new(
            self.context.kube.clone(),
            controller_name.clone(),
            self.static_gvks.clone(),
            trigger,
        ));

        let context = Context {
            ownership,
            dynamic_watch,
            controller: controller_name,
            ..self.context
        };

        if !self.dynamic_predicates.is_empty() {
            self.actions.push(Box::new(DynamicGate {
                predicates: std::mem::take(&mut self.dynamic_predicates),
            }));
        }

        let reconciler = Arc::new(Reconciler {
            context: context.clone(),
            release: self.release,
            actions: self.actions,
            finalizers: self.finalizers,
            condition_manager: self.condition_manager,
            dynamic_ownership_enabled: self.dynamic_ownership_enabled,
            broad_predicate: self.broad_predicate,
        });

        // the Kubernetes-level watch itself stays unfiltered, same as every
        // controller the teacher builds: `watcher::Config::default()` still
        // delivers every event. Whether a delivered event actually runs the
        // action pipeline is decided application-side in
        // `Reconciler::reconcile_upsert`, gated on `broad_predicate`
        // (spec.md §4.10's default/opt-in generation predicate).
        let mut controller = Controller::new(Api::<T>::all(context.kube.clone()), watcher::Config::default());
        for attach in self.owns {
            controller = attach(controller);
        }

        // the dynamic watch engine only knows which owning instance to
        // re-reconcile by name, but a newly discovered GVK is relevant to
        // every watch it registers against; `reconcile_all_on` (rather than a
        // name-keyed `ObjectRef` trigger) sweeps the whole instance set on any
        // such event, acceptable for a small cluster-scoped population.
        let trigger_stream = {
            use futures::StreamExt;
            tokio_stream::wrappers::UnboundedReceiverStream::new(rx).map(|_name| ())
        };
        controller = controller.reconcile_all_on(trigger_stream);

        BuiltReconciler {
            reconciler,
            controller,
        }
    }
}
