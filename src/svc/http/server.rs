//! # Server module
//!
//! This module provide a HTTP server to handle health and metrics requests

use std::{net::AddrParseError, sync::Arc};

use axum::{middleware, routing::get, Router};
use tracing::info;

use crate::svc::cfg::Configuration;

use super::{healthz, not_found};

// -----------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse listen address '{0}', {1}")]
    Listen(String, AddrParseError),
    #[error("failed to serve content, {0}")]
    Serve(hyper::Error),
}

#[tracing::instrument]
pub async fn serve(config: Arc<Configuration>) -> Result<(), Error> {
    let addr = config
        .operator
        .listen
        .parse()
        .map_err(|err| Error::Listen(config.operator.listen.to_owned(), err))?;

    let app = Router::new()
        .route("/healthz", get(healthz))
        .fallback(not_found);

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(super::metrics::handler));

    let app = app.layer(middleware::from_fn(super::layer::access));

    info!("Start to listen for http request on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(Error::Serve)?;

    Ok(())
}
