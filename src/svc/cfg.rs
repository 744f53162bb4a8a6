//! # Configuration module
//!
//! This module provide utilities and helpers to interact with the configuration

use std::{
    convert::TryFrom,
    env::{self, VarError},
    path::PathBuf,
};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// -----------------------------------------------------------------------------
// Constants

pub const OPERATOR_LISTEN: &str = "0.0.0.0:8000";
pub const MANIFESTS_ROOT: &str = "/usr/share/platform-operator/manifests";

// -----------------------------------------------------------------------------
// Operator structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Operator {
    #[serde(rename = "listen")]
    pub listen: String,
    /// identity stamped on every manifest's `managed-by-operator` annotation
    /// and used by [`crate::core::feature`] to name its tracked entities.
    #[serde(rename = "release")]
    pub release: String,
    /// filesystem root [`crate::core::manifest::fs::LocalManifestSource`]
    /// resolves bundle paths against.
    #[serde(rename = "manifestsRoot")]
    pub manifests_root: PathBuf,
}

// -----------------------------------------------------------------------------
// ConfigurationError enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to load configuration, {0}")]
    Build(ConfigError),
    #[error("failed to deserialize configuration, {0}")]
    Deserialize(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
    #[error("failed to retrieve environment variable '{0}', {1}")]
    EnvironmentVariable(&'static str, VarError),
}

// -----------------------------------------------------------------------------
// Configuration structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Configuration {
    #[serde(rename = "operator")]
    pub operator: Operator,
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    #[tracing::instrument]
    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Config::builder()
            .set_default("operator.listen", OPERATOR_LISTEN)
            .map_err(|err| Error::Default("operator.listen".into(), err))?
            .set_default("operator.release", env!("CARGO_PKG_NAME"))
            .map_err(|err| Error::Default("operator.release".into(), err))?
            .set_default("operator.manifestsRoot", MANIFESTS_ROOT)
            .map_err(|err| Error::Default("operator.manifestsRoot".into(), err))?
            .add_source(Environment::with_prefix(
                &env!("CARGO_PKG_NAME").replace('-', "_"),
            ))
            .add_source(File::from(path).required(true))
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Deserialize)
    }
}

impl Configuration {
    #[tracing::instrument]
    pub fn try_default() -> Result<Self, Error> {
        Config::builder()
            .set_default("operator.listen", OPERATOR_LISTEN)
            .map_err(|err| Error::Default("operator.listen".into(), err))?
            .set_default("operator.release", env!("CARGO_PKG_NAME"))
            .map_err(|err| Error::Default("operator.release".into(), err))?
            .set_default("operator.manifestsRoot", MANIFESTS_ROOT)
            .map_err(|err| Error::Default("operator.manifestsRoot".into(), err))?
            .add_source(Environment::with_prefix(
                &env!("CARGO_PKG_NAME").replace('-', "_"),
            ))
            .add_source(
                File::from(PathBuf::from(format!(
                    "/usr/share/{}/config",
                    env!("CARGO_PKG_NAME")
                )))
                .required(false),
            )
            .add_source(
                File::from(PathBuf::from(format!(
                    "/etc/{}/config",
                    env!("CARGO_PKG_NAME")
                )))
                .required(false),
            )
            .add_source(
                File::from(PathBuf::from(format!(
                    "{}/.config/{}/config",
                    env::var("HOME").map_err(|err| Error::EnvironmentVariable("HOME", err))?,
                    env!("CARGO_PKG_NAME")
                )))
                .required(false),
            )
            .add_source(File::from(PathBuf::from("config")).required(false))
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Deserialize)
    }

    /// logs a warning for every configuration key left at a suspicious default.
    #[tracing::instrument]
    pub fn help(&self) {
        #[cfg(feature = "metrics")]
        info!("Build with 'metrics' feature flag");

        if self.operator.release.is_empty() {
            warn!("Configuration key 'operator.release' has an empty value");
        }

        if !self.operator.manifests_root.exists() {
            warn!(
                path = %self.operator.manifests_root.display(),
                "configured manifests root does not exist yet"
            );
        }
    }
}
