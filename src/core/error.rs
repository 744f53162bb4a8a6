//! # Error aggregation module
//!
//! This module provides a small multi-error container used wherever the
//! specification requires peers (features, preconditions, postconditions) to
//! be run independently and have their failures aggregated rather than
//! short-circuited.

use std::{
    error::Error as StdError,
    fmt::{self, Display, Formatter},
};

// -----------------------------------------------------------------------------
// MultiError structure

/// holds zero or more errors collected from a batch of independent
/// operations. An empty [`MultiError`] is considered a success and callers
/// should check [`MultiError::into_result`] rather than constructing one
/// directly when they want `Result` semantics.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Box<dyn StdError + Send + Sync>>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<E>(&mut self, err: E)
    where
        E: StdError + Send + Sync + 'static,
    {
        self.errors.push(Box::new(err));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[Box<dyn StdError + Send + Sync>] {
        &self.errors
    }

    /// collapses the aggregate into `Ok(())` when empty, or `Err(self)`
    /// otherwise
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Display for MultiError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|err| err.to_string())
            .collect::<Vec<_>>()
            .join("; ");

        write!(f, "{} error(s) occurred: {}", self.errors.len(), joined)
    }
}

impl StdError for MultiError {}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(thiserror::Error, Debug)]
    #[error("boom {0}")]
    struct Boom(&'static str);

    #[test]
    fn empty_is_ok() {
        let multi = MultiError::new();
        assert!(multi.into_result().is_ok());
    }

    #[test]
    fn aggregates_peers_without_short_circuiting() {
        let mut multi = MultiError::new();
        multi.push(Boom("a"));
        multi.push(Boom("b"));

        assert_eq!(multi.len(), 2);
        let err = multi.into_result().unwrap_err();
        assert_eq!(err.to_string(), "2 error(s) occurred: boom a; boom b");
    }
}
