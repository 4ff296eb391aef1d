mod config;
mod coordinator;
mod drain;
mod errors;
mod host;
mod labels_and_annotations;
mod logging;
mod node;
mod state;
#[cfg(test)]
mod testing;
mod utils;

use crate::config::Config;
use crate::coordinator::{Collaborators, Coordinator};
use crate::drain::KubeWorkloadStore;
use crate::errors::Error;
use crate::host::reboot::SystemdReboot;
use crate::host::release::HostIdentity;
use crate::host::update_engine::UpdateEngineClient;
use crate::node::KubeNodeStore;
use crate::utils::strings::get_version_string;
use kube::Client;
use std::env;
use std::sync::Arc;
use tracing::{error, info};

const FIELD_MANAGER: &str = "node-reboot-agent";

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args: Vec<String> = env::args().collect();

    if args.contains(&String::from("--version")) {
        println!("{}", get_version_string());
        return Ok(());
    }

    let _provider = logging::setup_tracing()?;
    let config = Config::from_env()?;
    info!(node = %config.node_name, version = %get_version_string(), "starting reboot agent");

    // Connections to the cluster and the host are opened once and live for
    // the whole process; a failure here is fatal.
    let client = Client::try_default().await?;
    let identity = HostIdentity::read(&config.host_root)?;
    let update_engine = UpdateEngineClient::connect(config.update_poll_interval).await?;
    let reboot_sink = SystemdReboot::connect().await?;

    let coordinator = Coordinator::new(
        config,
        identity,
        Collaborators {
            nodes: Arc::new(KubeNodeStore::new(client.clone())),
            workloads: Arc::new(KubeWorkloadStore::new(client)),
            update_engine: Arc::new(update_engine),
            reboot_sink: Arc::new(reboot_sink),
        },
    );

    match coordinator.run().await {
        Ok(never) => match never {},
        Err(e) => {
            error!("reboot coordination failed: {}", e);
            Err(e)
        }
    }
}
