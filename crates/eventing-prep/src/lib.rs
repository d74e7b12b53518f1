//! Eventing end-to-end test preparation
//!
//! Prepares a Kyma cluster so the eventing test suite can run against it:
//!
//! - [`config`] - Run configuration resolved once from flags and environment
//! - [`sequencer`] - The fixed step plan, per-step isolation and the run summary
//! - [`assets`] - Commerce mock preparation, with or without the Compass registry
//! - [`reachability`] - Bounded wait for the sink function's public host
//! - [`cluster`], [`broker`], [`functions`], [`fixture`], [`runtime`], [`cleanup`] -
//!   The collaborators the steps drive, each behind a trait
//! - [`manifests`] - Resource specs for APIRules, Functions and Subscriptions

#![deny(missing_docs)]

pub mod assets;
pub mod broker;
pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod fixture;
pub mod functions;
pub mod manifests;
pub mod reachability;
pub mod runtime;
pub mod sequencer;

use std::sync::Arc;
use std::time::Duration;

use eventing_prep_common::kube_utils::{create_client, KubeContext};
use eventing_prep_common::Error;
use eventing_prep_compass::auth::OAuthCredentials;
use eventing_prep_compass::{ApplicationRegistry, DirectorClient, DirectorConfig, RegistryClient};

use crate::broker::JetStreamMonitor;
use crate::cleanup::KubeCleanup;
use crate::cluster::KubeClusterOps;
use crate::config::{Connections, RunConfiguration};
use crate::fixture::KubeMockFixture;
use crate::functions::{KubeFunctionOps, SinkSettings};
use crate::runtime::{
    GardenerRuntimeResolver, KebKubeconfigSource, KubeconfigSource, RuntimeResolver,
};
use crate::sequencer::Collaborators;

pub use sequencer::{Preparation, RunReport};

/// Per-request timeout for Director calls
const DIRECTOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the production collaborators for a run.
///
/// Optional services (Director, Gardener, KEB) are only wired when their
/// connection settings are present; steps that need a missing one fail with
/// a configuration error.
pub async fn build_collaborators(
    config: &RunConfiguration,
    connections: &Connections,
    kube: Arc<KubeContext>,
) -> Result<Collaborators, Error> {
    let director = match &connections.compass {
        Some(compass) => Some(Arc::new(DirectorClient::new(DirectorConfig {
            url: compass.url.clone(),
            tenant: compass.tenant.clone(),
            credentials: OAuthCredentials {
                token_url: compass.token_url.clone(),
                client_id: compass.client_id.clone(),
                client_secret: compass.client_secret.clone(),
            },
            timeout: DIRECTOR_TIMEOUT,
        })?)),
        None => None,
    };
    let registry = director.clone().map(|d| d as Arc<dyn RegistryClient>);
    let applications = director.map(|d| d as Arc<dyn ApplicationRegistry>);

    let runtimes = match &connections.gardener {
        Some((path, namespace)) => {
            let client = create_client(Some(path.as_path())).await?;
            Some(Arc::new(GardenerRuntimeResolver::new(client, namespace.clone()))
                as Arc<dyn RuntimeResolver>)
        }
        None => None,
    };

    let kubeconfigs = match &connections.keb {
        Some((url, token)) => Some(Arc::new(KebKubeconfigSource::new(
            url.clone(),
            token.clone(),
            kube.clone(),
        )?) as Arc<dyn KubeconfigSource>),
        None => None,
    };

    Ok(Collaborators {
        cluster: Arc::new(KubeClusterOps::new(kube.clone())),
        broker: Arc::new(JetStreamMonitor::new(config.stream_name.clone())?),
        functions: Arc::new(KubeFunctionOps::new(
            kube.clone(),
            SinkSettings {
                sink_name: config.sink_name.clone(),
                namespace: config.test_namespace.clone(),
                app_name: config.app_name.clone(),
            },
        )?),
        fixture: Arc::new(KubeMockFixture::new(
            kube.clone(),
            applications,
            config.app_name.clone(),
        )),
        cleanup: Arc::new(KubeCleanup::new(
            kube,
            config.test_namespace.clone(),
            config.mock_namespace.clone(),
        )),
        registry,
        runtimes,
        kubeconfigs,
    })
}
