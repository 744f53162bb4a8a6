//! # Dynamic watch engine module
//!
//! Discovers the GVKs of objects produced mid-reconcile and registers
//! deduplicated watches for them under a single shared mutex (spec.md §4.7).
//! The metrics counter pattern is grounded on the teacher's
//! `svc::k8s::RECONCILIATION_*` counters; actual watch registration is
//! modeled as spawning a raw `kube::runtime::watcher` stream that forwards
//! matching events onto a reconcile-trigger channel, since a `Controller<T>`
//! cannot be extended with new watches once built.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

#[cfg(feature = "metrics")]
use std::sync::LazyLock;

use futures::StreamExt;
use kube::{
    api::{Api, ApiResource},
    core::{DynamicObject, GroupVersionKind},
    runtime::watcher,
};
#[cfg(feature = "metrics")]
use prometheus::{opts, register_int_counter_vec, IntCounterVec};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{object, ownership::OwnershipPolicy};

pub const CUSTOM_RESOURCE_DEFINITION_KIND: &str = "CustomResourceDefinition";

#[cfg(feature = "metrics")]
static DYNAMIC_WATCH_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        opts!(
            "action_dynamic_watch_total",
            "number of dynamic watch registrations performed, one per successful registration"
        ),
        &["controller"]
    )
    .expect("metrics 'action_dynamic_watch_total' to not be already initialized")
});

// -----------------------------------------------------------------------------
// WatchKey

/// indexes already-registered dynamic watches; distinct GVK/managed-false
/// pairs are distinct registrations (invariant I2).
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct WatchKey {
    pub gvk: GroupVersionKind,
    pub managed_by_false: bool,
}

// -----------------------------------------------------------------------------
// Trigger

/// the terminal action's effect on a matched watch event: enqueue a name for
/// reconciliation. Cluster-scoped instances only, so a bare name suffices.
pub type Trigger = mpsc::UnboundedSender<String>;

// -----------------------------------------------------------------------------
// DynamicWatchEngine

pub struct DynamicWatchEngine {
    client: kube::Client,
    controller: String,
    /// GVKs already covered by a static `Owns`/`Watches` declaration at
    /// build time; these never need a dynamic registration.
    static_gvks: HashSet<GroupVersionKind>,
    watched: Mutex<HashSet<WatchKey>>,
    watched_crds: Mutex<HashSet<String>>,
    trigger: Trigger,
}

impl DynamicWatchEngine {
    pub fn new(
        client: kube::Client,
        controller: impl Into<String>,
        static_gvks: HashSet<GroupVersionKind>,
        trigger: Trigger,
    ) -> Self {
        Self {
            client,
            controller: controller.into(),
            static_gvks,
            watched: Mutex::new(HashSet::new()),
            watched_crds: Mutex::new(HashSet::new()),
            trigger,
        }
    }

    /// registers dynamic watches for every object generated this cycle, by
    /// the algorithm of spec.md §4.7. Failures are logged, never propagated:
    /// the next reconciliation retries.
    pub async fn register_for_generated(
        &self,
        ownership: &OwnershipPolicy,
        owner_name: &str,
        generated: &[DynamicObject],
    ) {
        for obj in generated {
            let gvk = match object::gvk_of(obj) {
                Ok(gvk) => gvk,
                Err(err) => {
                    warn!(error = %err, "skip dynamic watch registration, object has no usable gvk");
                    continue;
                }
            };

            if ownership.is_excluded(&gvk) {
                continue;
            }

            if gvk.kind == CUSTOM_RESOURCE_DEFINITION_KIND {
                self.register_crd_watch(ownership, &gvk, owner_name).await;
                continue;
            }

            self.register_object_watch(ownership, &gvk, obj, owner_name).await;
        }
    }

    async fn register_crd_watch(&self, ownership: &OwnershipPolicy, gvk: &GroupVersionKind, owner_name: &str) {
        let name = gvk.kind.clone();
        {
            let mut watched = self.watched_crds.lock().expect("mutex not poisoned");
            if !watched.insert(name.clone()) {
                return;
            }
        }

        let config = ownership.predicate_for(gvk).cloned().unwrap_or_default();
        self.spawn_watch(
            ApiResource::erase::<
                k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
            >(&()),
            None,
            owner_name.to_string(),
            WatchSelectivity::AnyEvent,
            config,
        );

        self.increment_registration();
    }

    async fn register_object_watch(
        &self,
        ownership: &OwnershipPolicy,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
        owner_name: &str,
    ) {
        let managed_by_false = object::is_managed_by_false(obj);
        let key = WatchKey {
            gvk: gvk.clone(),
            managed_by_false,
        };

        if self.static_gvks.contains(gvk) {
            return;
        }
        {
            let watched = self.watched.lock().expect("mutex not poisoned");
            if watched.contains(&key) {
                return;
            }
        }

        if !self.is_api_available(gvk).await {
            trace!(kind = %gvk.kind, "skip dynamic watch registration, api not yet available");
            return;
        }

        {
            let mut watched = self.watched.lock().expect("mutex not poisoned");
            if !watched.insert(key.clone()) {
                return;
            }
        }

        let selectivity = if managed_by_false {
            WatchSelectivity::DeleteOnly
        } else {
            WatchSelectivity::AnyEvent
        };

        // a per-gvk predicate installed via `OwnershipPolicy::with_gvk_predicate`
        // overrides the plain `watcher::Config::default()` this dynamic watch
        // would otherwise use, letting a consumer narrow (e.g. label-select)
        // what triggers a reconcile for a noisy GVK (spec.md §4.7/§4.8).
        let config = ownership.predicate_for(gvk).cloned().unwrap_or_default();

        let namespace = obj.metadata.namespace.clone();
        self.spawn_watch(
            ApiResource::from_gvk(gvk),
            namespace,
            owner_name.to_string(),
            selectivity,
            config,
        );

        self.increment_registration();
        debug!(kind = %gvk.kind, managed_by_false, "registered dynamic watch");
    }

    async fn is_api_available(&self, gvk: &GroupVersionKind) -> bool {
        kube::discovery::pinned_kind(&self.client, gvk).await.is_ok()
    }

    fn spawn_watch(
        &self,
        api_resource: ApiResource,
        namespace: Option<String>,
        owner_name: String,
        selectivity: WatchSelectivity,
        config: watcher::Config,
    ) {
        let client = self.client.clone();
        let trigger = self.trigger.clone();

        tokio::spawn(async move {
            let api: Api<DynamicObject> = match namespace {
                Some(ns) => Api::namespaced_with(client, &ns, &api_resource),
                None => Api::all_with(client, &api_resource),
            };

            let mut stream = Box::pin(watcher::watcher(api, config));
            while let Some(event) = stream.next().await {
                match event {
                    Ok(watcher::Event::Deleted(_)) => {
                        let _ = trigger.send(owner_name.clone());
                    }
                    Ok(_) if selectivity == WatchSelectivity::AnyEvent => {
                        let _ = trigger.send(owner_name.clone());
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "dynamic watch stream error"),
                }
            }
        });
    }

    fn increment_registration(&self) {
        #[cfg(feature = "metrics")]
        DYNAMIC_WATCH_TOTAL
            .with_label_values(&[self.controller.as_str()])
            .inc();
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum WatchSelectivity {
    /// the conservative default: any create/update/delete triggers a
    /// reconciliation of the owner.
    AnyEvent,
    /// only delete events trigger a reconciliation; restores managed-by-false
    /// resources without fighting drift on their spec.
    DeleteOnly,
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;

    fn gvk(kind: &str) -> GroupVersionKind {
        GroupVersionKind {
            group: String::new(),
            version: "v1".to_string(),
            kind: kind.to_string(),
        }
    }

    #[test]
    fn watch_key_distinguishes_managed_by_false() {
        let a = WatchKey {
            gvk: gvk("ConfigMap"),
            managed_by_false: false,
        };
        let b = WatchKey {
            gvk: gvk("ConfigMap"),
            managed_by_false: true,
        };
        assert_ne!(a, b);
    }

    #[test]
    fn watch_key_equal_for_identical_gvk_and_flag() {
        let a = WatchKey {
            gvk: gvk("Secret"),
            managed_by_false: true,
        };
        let b = WatchKey {
            gvk: gvk("Secret"),
            managed_by_false: true,
        };
        assert_eq!(a, b);
    }
}
