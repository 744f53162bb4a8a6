//! # Reconciliation request module
//!
//! The mutable per-call context threaded through every action in a single
//! pipeline run. Owned exclusively by the current reconciliation call; no
//! action holds a reference past its own `run`.

use std::sync::Arc;

use kube::core::DynamicObject;

// -----------------------------------------------------------------------------
// ReconciliationRequest structure

pub struct ReconciliationRequest<T> {
    /// the instance being reconciled, as observed at the start of this call.
    pub instance: Arc<T>,
    /// identifies the running release/build of the operator, surfaced in
    /// events and owner-reference field managers.
    pub release: String,
    /// objects produced so far this cycle by manifest rendering or resource
    /// creator actions; consumed by the terminal dynamic-watch action.
    pub generated: Vec<DynamicObject>,
    /// set by any action that appended to `generated` this cycle, so later
    /// actions can cheaply tell whether there is new output to act on
    /// without re-scanning the vector.
    pub generated_this_cycle: bool,
}

impl<T> ReconciliationRequest<T> {
    pub fn new(instance: Arc<T>, release: impl Into<String>) -> Self {
        Self {
            instance,
            release: release.into(),
            generated: Vec::new(),
            generated_this_cycle: false,
        }
    }

    pub fn push_generated(&mut self, object: DynamicObject) {
        self.generated.push(object);
        self.generated_this_cycle = true;
    }

    pub fn extend_generated<I: IntoIterator<Item = DynamicObject>>(&mut self, objects: I) {
        let mut any = false;
        for object in objects {
            self.generated.push(object);
            any = true;
        }
        if any {
            self.generated_this_cycle = true;
        }
    }
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{ObjectMeta, TypeMeta};

    fn configmap(name: &str) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn push_generated_flags_the_cycle() {
        let mut request = ReconciliationRequest::new(Arc::new(()), "v1.0.0");
        assert!(!request.generated_this_cycle);

        request.push_generated(configmap("cm-1"));
        assert!(request.generated_this_cycle);
        assert_eq!(request.generated.len(), 1);
    }

    #[test]
    fn extend_generated_with_empty_iterator_leaves_flag_unset() {
        let mut request = ReconciliationRequest::new(Arc::new(()), "v1.0.0");
        request.extend_generated(Vec::new());
        assert!(!request.generated_this_cycle);
    }
}
