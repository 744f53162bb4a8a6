//! # Kubernetes module
//!
//! Thin kubernetes helpers shared by [`crate::core`]: client construction
//! and finalizer bookkeeping. The generic `ControllerBuilder`/`Reconciler`/
//! `Watcher` abstraction the teacher kept here is superseded by
//! [`crate::core::builder`] and [`crate::core::reconciler`], which drive a
//! single cluster-scoped instance type instead of a namespaced resource per
//! addon kind.

pub mod client;
pub mod finalizer;
