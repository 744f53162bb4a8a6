//! # Command module
//!
//! This module provides the command line interface structures and the
//! daemon entry point that wires the reconciliation core to a concrete
//! instance type.

use std::{collections::HashSet, io, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use kube::ResourceExt;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::{
    cmd::crd::CustomResourceDefinitionError,
    core::{
        action::{Action, ActionError},
        applier::{
            managed_by_operator_decorator, owner_reference_decorator, ApplyKind, BoxedDecorator,
            ResourceApplier,
        },
        builder::ReconcilerBuilder,
        context::Context,
        manifest::{
            fs::{classify, LocalManifestSource, ManifestKind, ManifestSource},
            Manifest, ManifestVariantKind, TemplateData,
        },
        ownership::OwnershipPolicy,
        request::ReconciliationRequest,
        watch::DynamicWatchEngine,
    },
    crd::DataScienceCluster,
    svc::{cfg::Configuration, http, k8s::client},
};

pub mod crd;

// -----------------------------------------------------------------------------
// RenderAndApply action

/// renders every manifest directly under the configured manifests root and
/// applies the result, owning each object by the reconciled instance
/// (`SPEC_FULL.md` §4: "render manifests -> apply -> dynamic watch").
struct RenderAndApply {
    manifests_root: PathBuf,
    field_manager: String,
}

#[async_trait]
impl Action<DataScienceCluster> for RenderAndApply {
    fn name(&self) -> &str {
        "render-and-apply"
    }

    fn condition_type(&self) -> &str {
        crate::core::condition::DEFAULT_DEPENDENT_CONDITION
    }

    async fn run(
        &self,
        ctx: &Context,
        request: &mut ReconciliationRequest<DataScienceCluster>,
    ) -> Result<(), ActionError> {
        let entries = ctx
            .manifests
            .list_dir(&self.manifests_root)
            .map_err(ActionError::failed)?;

        let owner = request.instance.controller_owner_ref(&()).ok_or_else(|| {
            ActionError::stop("instance is missing a name, cannot own generated objects yet")
        })?;

        let decorators: Vec<BoxedDecorator> =
            vec![owner_reference_decorator(owner), managed_by_operator_decorator()];

        let applier = ResourceApplier::new(ctx.kube.clone(), self.field_manager.clone());

        for path in entries {
            // `list_dir` yields kustomize composition roots as the directory
            // itself (never descending into one), so a directory entry here
            // is always a `kustomization.yaml` root to compose as a unit.
            let manifest = if ctx.manifests.is_dir(&path) {
                Manifest::Kustomized { dir: path.clone() }
            } else {
                match classify(&path) {
                    ManifestKind::Raw => Manifest::Raw { path: path.clone() },
                    ManifestKind::Templated => Manifest::Templated { path: path.clone() },
                    ManifestKind::Patch => Manifest::Patch { path: path.clone() },
                    ManifestKind::Kustomized => continue,
                }
            };

            let mut objects = manifest
                .process(ctx.manifests.as_ref(), &TemplateData::default())
                .map_err(ActionError::failed)?;

            if manifest.kind() == ManifestVariantKind::NonPatch {
                Manifest::mark_as_managed(&mut objects);
            }

            request.extend_generated(objects.clone());

            let apply_kind = match manifest.kind() {
                ManifestVariantKind::Patch => ApplyKind::Patch,
                ManifestVariantKind::NonPatch => ApplyKind::NonPatch,
            };

            applier
                .apply_all(objects, apply_kind, &decorators)
                .await
                .map_err(ActionError::failed)?;
        }

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// CommandError enum

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<CommandError>),
    #[error("failed to execute command, {0}")]
    CustomResourceDefinition(CustomResourceDefinitionError),
}

// -----------------------------------------------------------------------------
// Command enum

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Interact with custom resource definitions
    #[command(name = "custom-resource-definition", alias = "crd")]
    CustomResourceDefinition,
}

#[async_trait]
impl Executor for Command {
    type Error = CommandError;

    #[tracing::instrument]
    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::CustomResourceDefinition => crd::view(config)
                .await
                .map_err(CommandError::CustomResourceDefinition)
                .map_err(|err| {
                    CommandError::Execution("custom-resource-definition".into(), Arc::new(err))
                }),
        }
    }
}

// -----------------------------------------------------------------------------
// Args struct

#[derive(Parser, Clone, Debug)]
#[command(about = env!("CARGO_PKG_DESCRIPTION"), version)]
pub struct Args {
    /// Increase log verbosity, repeatable
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of kubeconfig
    #[arg(short = 'k', long = "kubeconfig", global = true)]
    pub kubeconfig: Option<PathBuf>,
    /// Specify location of configuration
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy and exit
    #[arg(short = 't', long = "check", global = true)]
    pub check: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

// -----------------------------------------------------------------------------
// DaemonError enum

#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("failed to handle termination signal, {0}")]
    SigTerm(io::Error),
    #[error("failed to create kubernetes client, {0}")]
    Client(kube::Error),
    #[error("failed to serve http endpoint, {0}")]
    Http(http::server::Error),
}

// -----------------------------------------------------------------------------
// daemon function

/// assembles the kubernetes client, the reconciliation context and the
/// `DataScienceCluster` reconciler, then runs both it and the health/metrics
/// server until a termination signal arrives.
#[tracing::instrument(skip(config))]
pub async fn daemon(kubeconfig: Option<PathBuf>, config: Arc<Configuration>) -> Result<(), DaemonError> {
    let kube_client = client::try_new(kubeconfig)
        .await
        .map_err(DaemonError::Client)?;

    let manifests: Arc<dyn ManifestSource> =
        Arc::new(LocalManifestSource::new(config.operator.manifests_root.clone()));

    // placeholder state, replaced wholesale by `ReconcilerBuilder::build`
    // once the instance GVK and the static `owns`/`watches` set are known.
    let (trigger, _rx) = mpsc::unbounded_channel();
    let bootstrap_watch = Arc::new(DynamicWatchEngine::new(
        kube_client.clone(),
        "datascienceclusters.platform.opendatahub.io",
        HashSet::new(),
        trigger,
    ));

    let context = Context::new(
        kube_client,
        config.clone(),
        manifests,
        Arc::new(OwnershipPolicy::disabled()),
        bootstrap_watch,
        "datascienceclusters.platform.opendatahub.io",
    );

    let manifests_root = config.operator.manifests_root.clone();
    let field_manager = config.operator.release.clone();

    let built = ReconcilerBuilder::<DataScienceCluster>::new(context, config.operator.release.clone())
        .with_instance_name("datascienceclusters.platform.opendatahub.io")
        .with_action(Box::new(RenderAndApply {
            manifests_root,
            field_manager,
        }))
        .build();

    let reconciler = tokio::spawn(built.run());
    let server = tokio::spawn(http::server::serve(config.clone()));

    tokio::signal::ctrl_c().await.map_err(DaemonError::SigTerm)?;
    info!("received termination signal, shutting down");

    reconciler.abort();
    server.abort();

    if let Err(err) = server.await {
        if !err.is_cancelled() {
            error!(error = %err, "http server task did not shut down cleanly");
        }
    }

    Ok(())
}
