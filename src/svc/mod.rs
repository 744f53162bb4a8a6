//! # Services module
//!
//! Ambient infrastructure shared across the binary: configuration loading,
//! the health/metrics HTTP surface, and thin kubernetes client helpers. The
//! reconciliation engine itself lives under [`crate::core`].

pub mod cfg;
pub mod http;
pub mod k8s;
