//! # Action module
//!
//! This module defines the single-step operation that the reconciler's
//! pipeline is built out of, and its `StopError` sentinel.

use std::{error::Error as StdError, fmt};

use async_trait::async_trait;

use crate::core::{context::Context, request::ReconciliationRequest};

// -----------------------------------------------------------------------------
// ActionError enum

/// outcome of a single [`Action`] invocation. `Stop` is detected by pattern
/// matching on this variant, never by inspecting an error message, so that a
/// policy-halt can never be confused with a failure that merely happens to
/// share a message.
#[derive(Debug)]
pub enum ActionError {
    /// halts the pipeline cleanly; not treated as a reconciliation failure.
    Stop(String),
    /// halts the pipeline and is treated as a reconciliation failure.
    Failed(Box<dyn StdError + Send + Sync>),
    /// same as `Failed`, but carries an explicit condition-reason tag the
    /// condition manager uses verbatim instead of falling back to
    /// `FailedApplying` (spec.md §4.9).
    FailedWithReason(String, Box<dyn StdError + Send + Sync>),
}

impl ActionError {
    pub fn stop<S: Into<String>>(message: S) -> Self {
        Self::Stop(message.into())
    }

    pub fn failed<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Failed(Box::new(err))
    }

    pub fn failed_with_reason<S, E>(reason: S, err: E) -> Self
    where
        S: Into<String>,
        E: StdError + Send + Sync + 'static,
    {
        Self::FailedWithReason(reason.into(), Box::new(err))
    }

    /// returns the stop message, if this is a [`ActionError::Stop`]
    pub fn as_stop(&self) -> Option<&str> {
        match self {
            Self::Stop(message) => Some(message.as_str()),
            Self::Failed(_) | Self::FailedWithReason(_, _) => None,
        }
    }

    /// returns the condition-reason tag carried by [`ActionError::FailedWithReason`].
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::FailedWithReason(reason, _) => Some(reason.as_str()),
            Self::Stop(_) | Self::Failed(_) => None,
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Stop(message) => write!(f, "stopped, {message}"),
            Self::Failed(err) => write!(f, "failed, {err}"),
            Self::FailedWithReason(reason, err) => write!(f, "failed ({reason}), {err}"),
        }
    }
}

impl StdError for ActionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Stop(_) => None,
            Self::Failed(err) => Some(err.as_ref()),
            Self::FailedWithReason(_, err) => Some(err.as_ref()),
        }
    }
}

impl<E> From<E> for ActionError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::Failed(Box::new(err))
    }
}

// -----------------------------------------------------------------------------
// Action trait

/// a single step of the reconciliation pipeline for instance type `T`.
/// Implementors MAY mutate `request.generated` and MAY issue client calls;
/// they MUST be safe to re-run across reconciliations, idempotency being the
/// contract the engine assumes rather than one it enforces.
#[async_trait]
pub trait Action<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// short, stable identifier surfaced in logs.
    fn name(&self) -> &str;

    /// the dependent condition type this action's outcome should be
    /// reported under (spec.md §4.9). Defaults to [`Action::name`], but an
    /// action whose debug name doesn't match any configured dependent
    /// condition (the common case for ad hoc/one-off actions) MUST override
    /// this so a `Stop`/`Failed` outcome lands on the right condition
    /// instead of silently falling through to the "not this phase" branch.
    fn condition_type(&self) -> &str {
        self.name()
    }

    async fn run(
        &self,
        ctx: &Context,
        request: &mut ReconciliationRequest<T>,
    ) -> Result<(), ActionError>;
}

/// boxed pipeline entry; actions are referenced by index in a plain `Vec`,
/// never by back-edge or shared ownership.
pub type BoxedAction<T> = Box<dyn Action<T>>;

// -----------------------------------------------------------------------------
// function adapter

/// wraps a bare async closure into an [`Action`], for trivial one-off steps
/// that don't warrant a dedicated type.
pub struct FnAction<T, F> {
    name: String,
    func: F,
    _marker: std::marker::PhantomData<fn(&mut ReconciliationRequest<T>)>,
}

impl<T, F> FnAction<T, F> {
    pub fn new<S: Into<String>>(name: S, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> Action<T> for FnAction<T, F>
where
    T: Send + Sync + 'static,
    F: for<'a> Fn(&'a Context, &'a mut ReconciliationRequest<T>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), ActionError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        ctx: &Context,
        request: &mut ReconciliationRequest<T>,
    ) -> Result<(), ActionError> {
        (self.func)(ctx, request).await
    }
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_detected_by_variant_not_message() {
        let stop = ActionError::stop("blocked by policy");
        let failed = ActionError::Failed(Box::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            "blocked by policy",
        )));

        assert_eq!(stop.as_stop(), Some("blocked by policy"));
        assert_eq!(failed.as_stop(), None);
    }
}
