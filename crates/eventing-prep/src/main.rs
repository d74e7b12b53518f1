//! Eventing test preparation binary

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use eventing_prep::config::{Args, Connections, RunConfiguration};
use eventing_prep::{build_collaborators, Preparation};
use eventing_prep_common::kube_utils::{create_client, KubeContext};
use eventing_prep_common::telemetry::{init_logging, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(TelemetryConfig {
        json: args.log_json,
    })?;

    let config = RunConfiguration::from(&args);
    config.validate()?;
    let connections = Connections::from(&args);

    let client = create_client(connections.kubeconfig.as_deref())
        .await
        .context("failed to create cluster client")?;
    let kube = Arc::new(KubeContext::new(client));
    let deps = build_collaborators(&config, &connections, kube).await?;

    let timeout = config.timeout;
    let preparation = Preparation::new(config, deps);

    info!(timeout_secs = timeout.as_secs(), "Starting eventing tests preparation");
    match tokio::time::timeout(timeout, preparation.run()).await {
        Ok(Ok(_)) => {
            info!("Eventing tests preparation finished");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Eventing tests preparation failed");
            Err(e.into())
        }
        Err(_) => {
            error!(timeout_secs = timeout.as_secs(), "Eventing tests preparation timed out");
            anyhow::bail!("preparation did not finish within {}s", timeout.as_secs())
        }
    }
}
